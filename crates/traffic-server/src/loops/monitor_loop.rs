//! Background monitor loop.
//!
//! Recomputes congestion for every loaded road and prunes the rolling
//! histories once per tick. A tick runs to completion before shutdown is
//! observed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub scored: usize,
    /// Roads with no pings in the congestion window
    pub idle: usize,
    pub failed: usize,
    pub pruned_pings: usize,
    pub pruned_samples: usize,
    pub pruned_detections: usize,
}

pub async fn run_monitor_loop(
    state: Arc<AppState>,
    tick: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let Some(_guard) = state.claim_monitor() else {
        bail!("monitor loop already running");
    };

    let mut ticker = interval(tick);
    tracing::info!("Monitor loop started ({}ms tick)", tick.as_millis());

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Monitor loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let summary = monitor_tick(&state);
                tracing::debug!(
                    "Tick: {} scored, {} idle, {} failed, pruned {} pings / {} samples / {} detections",
                    summary.scored,
                    summary.idle,
                    summary.failed,
                    summary.pruned_pings,
                    summary.pruned_samples,
                    summary.pruned_detections
                );
            }
        }
    }

    Ok(())
}

pub fn monitor_tick(state: &AppState) -> TickSummary {
    let mut summary = TickSummary::default();

    for road in state.matcher.segments() {
        match state.congestion.try_recompute(road.id) {
            Ok(Some(_)) => summary.scored += 1,
            Ok(None) => summary.idle += 1,
            Err(e) => {
                tracing::warn!("Congestion recompute failed for road {}: {}", road.id, e);
                summary.failed += 1;
            }
        }
    }

    summary.pruned_pings = state.pings.prune();
    summary.pruned_samples = state.speed.prune();
    summary.pruned_detections = state.anomaly.prune();
    summary
}
