//! Simulation loop: drives simulated vehicles through the ping pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::pipeline::process_ping;
use crate::sim::Simulation;
use crate::state::AppState;

pub async fn run_simulation_loop(
    state: Arc<AppState>,
    mut simulation: Simulation,
    tick: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let Some(_guard) = state.claim_simulation() else {
        bail!("simulation already running");
    };

    let mut ticker = interval(tick);
    // The first tick completes immediately; vehicles start moving on the next.
    ticker.tick().await;
    tracing::info!(
        "Simulation started with {} vehicle(s)",
        simulation.vehicle_count()
    );

    let mut alerts = 0usize;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Simulation stopping ({} alert(s) raised)", alerts);
                break;
            }
            _ = ticker.tick() => {
                for ping in simulation.step(tick.as_secs_f64(), Utc::now()) {
                    let vehicle_id = ping.vehicle_id.clone();
                    match process_ping(&state, ping) {
                        Ok(outcome) => alerts += outcome.alerts.len(),
                        Err(e) => tracing::warn!("Dropped simulated ping from {}: {}", vehicle_id, e),
                    }
                }
            }
        }
    }

    Ok(())
}
