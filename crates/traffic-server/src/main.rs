//! Traffic Server - always-on traffic monitor

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use traffic_core::{GeoPoint, RoadSegment, RoadStore};
use traffic_server::config::Config;
use traffic_server::loops::{monitor_loop, simulation_loop};
use traffic_server::sim::{city_scenario, Simulation};
use traffic_server::state::{AppState, MemoryAlertSink};

/// Traffic monitor: road matching, congestion scoring and anomaly alerts
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Drive simulated city traffic through the pipeline
    #[arg(long)]
    simulate: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    /// Simulation centre latitude (default: Beijing)
    #[arg(long, default_value_t = 39.9042)]
    center_lat: f64,

    /// Simulation centre longitude (default: Beijing)
    #[arg(long, default_value_t = 116.4074)]
    center_lon: f64,

    /// JSON file with road segments to load at startup
    #[arg(long)]
    roads: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env();

    let filter = EnvFilter::from_default_env().add_directive("traffic_server=debug".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    tracing::info!("Starting Traffic Server...");

    let rules = config.load_rules()?;
    let sink = Arc::new(MemoryAlertSink::new());
    let state = Arc::new(AppState::with_sink(
        rules,
        config.ping_retention(),
        sink.clone(),
    ));

    if let Some(path) = &args.roads {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading roads file {}", path.display()))?;
        let roads: Vec<RoadSegment> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing roads file {}", path.display()))?;
        let loaded = state.seed_roads(roads)?;
        tracing::info!("Loaded {} road segment(s) from {}", loaded, path.display());
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut handles = Vec::new();

    handles.push(tokio::spawn(monitor_loop::run_monitor_loop(
        state.clone(),
        config.tick(),
        shutdown_tx.subscribe(),
    )));

    if args.simulate {
        // Number scenario roads after any loaded from file so none are replaced.
        let first_id = state
            .roads
            .list_all()?
            .iter()
            .map(|road| road.id)
            .max()
            .map_or(1, |id| id + 1);
        let scenario = city_scenario(
            GeoPoint::new(args.center_lon, args.center_lat),
            config.sim_vehicles,
        )
        .with_road_ids_from(first_id);
        let loaded = state.seed_roads(scenario.roads)?;
        tracing::info!(
            "Scenario '{}': {} road(s), {} vehicle(s)",
            scenario.name,
            loaded,
            scenario.vehicles.len()
        );
        handles.push(tokio::spawn(simulation_loop::run_simulation_loop(
            state.clone(),
            Simulation::new(scenario.vehicles),
            config.tick(),
            shutdown_tx.subscribe(),
        )));
    } else if state.matcher.is_empty() {
        tracing::warn!("No roads loaded; pass --roads or --simulate");
    }

    match args.duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(());
    for handle in handles {
        handle.await??;
    }

    for (road_id, stats) in state.congestion.all_statistics() {
        let reading = state.congestion.level(road_id);
        tracing::info!(
            "Road {}: {} vehicle(s), avg {:.1} km/h, {} ({:.2})",
            road_id,
            stats.vehicle_count,
            stats.average_speed,
            reading.level.description(),
            reading.score
        );
    }
    let anomalies = state.anomaly.statistics(chrono::Duration::hours(1));
    tracing::info!(
        "{} alert(s) written, {} unresolved, {} anomaly detection(s) in the last hour",
        sink.len(),
        sink.unresolved(),
        anomalies.total_anomalies
    );

    Ok(())
}
