//! Per-ping processing: match, check, detect, alert, record.

use serde::Serialize;
use traffic_core::{Alert, CoreError, DetectionRecord, Ping, PingStore, RoadId};

use crate::state::AppState;

/// Earlier pings handed to the anomaly pattern pass.
const PATTERN_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PingOutcome {
    pub road_id: Option<RoadId>,
    /// Distance to the matched road in km
    pub distance_km: Option<f64>,
    pub overspeed: bool,
    pub detections: Vec<DetectionRecord>,
    pub alerts: Vec<Alert>,
    /// Alerts the sink refused; the ping is still recorded
    pub failed_alerts: usize,
}

/// Run one ping through every component.
///
/// Only a malformed ping is an error. Alert write failures and a failed
/// history lookup are logged and reflected in the outcome.
pub fn process_ping(state: &AppState, mut ping: Ping) -> Result<PingOutcome, CoreError> {
    ping.validate()?;

    let (segment, distance) = state.matcher.resolve(&ping);
    let mut outcome = PingOutcome::default();
    if let Some(road) = &segment {
        ping.road_id = Some(road.id);
        outcome.road_id = Some(road.id);
        outcome.distance_km = Some(distance);
    }

    outcome.overspeed = state.speed.check_overspeed(&ping, segment.as_ref());
    if let (true, Some(road)) = (outcome.overspeed, &segment) {
        match state.speed.emit_speed_alert(&ping, road, &state.emitter) {
            Ok(alert) => outcome.alerts.push(alert),
            Err(e) => {
                tracing::warn!("Failed to write speed alert for {}: {}", ping.vehicle_id, e);
                outcome.failed_alerts += 1;
            }
        }
    }

    let history = match state.pings.find_by_vehicle(&ping.vehicle_id, PATTERN_HISTORY_LIMIT) {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(
                "History lookup failed for {}, skipping pattern rules: {}",
                ping.vehicle_id,
                e
            );
            Vec::new()
        }
    };

    outcome.detections = state.anomaly.evaluate(&ping, segment.as_ref(), &history);
    for record in &outcome.detections {
        match state
            .anomaly
            .emit_anomaly_alert(record, segment.as_ref(), &state.emitter)
        {
            Ok(alert) => outcome.alerts.push(alert),
            Err(e) => {
                tracing::warn!(
                    "Failed to write {} alert for {}: {}",
                    record.anomaly_type,
                    record.vehicle_id,
                    e
                );
                outcome.failed_alerts += 1;
            }
        }
    }

    if !outcome.alerts.is_empty() {
        tracing::debug!(
            "{} raised {} alert(s) on road {:?}",
            ping.vehicle_id,
            outcome.alerts.len(),
            outcome.road_id
        );
    }

    state.pings.record(ping);
    Ok(outcome)
}
