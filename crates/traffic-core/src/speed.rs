//! Per-vehicle speed monitoring.
//!
//! Each vehicle keeps a rolling window of [`SpeedSample`]s, pruned against
//! the wall clock on every write.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::AlertEmitter;
use crate::error::CoreError;
use crate::models::{Alert, AlertType, Ping, RoadId, RoadSegment, SpeedSample};
use crate::rules::SpeedRules;

/// Overall trend of a vehicle's recent speed changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedPattern {
    InsufficientData,
    Accelerating,
    Decelerating,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverspeedStatistics {
    pub overspeed_count: usize,
    pub total_count: usize,
    pub overspeed_rate: f64,
    /// Highest speed among the overspeed samples, 0 when there are none
    pub max_speed: i32,
    pub duration_hours: f64,
}

pub struct SpeedMonitor {
    rules: SpeedRules,
    history: RwLock<HashMap<String, Vec<SpeedSample>>>,
}

impl Default for SpeedMonitor {
    fn default() -> Self {
        Self::new(SpeedRules::default())
    }
}

impl SpeedMonitor {
    pub fn new(rules: SpeedRules) -> Self {
        Self {
            rules,
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &SpeedRules {
        &self.rules
    }

    /// Record the ping's speed and decide whether it counts as overspeed.
    ///
    /// Pings at or under the segment's limit are recorded and rejected. Above
    /// the limit, the ping is overspeed when the vehicle's last
    /// `persistent_samples` samples all exceed the fixed baseline limit, or
    /// when `speed / max_speed` exceeds `overspeed_ratio`. The baseline is
    /// `baseline_limit_kmh`, not the segment's own limit.
    pub fn check_overspeed(&self, ping: &Ping, segment: Option<&RoadSegment>) -> bool {
        let Some(segment) = segment else {
            return false;
        };

        let persistent = self.record(ping, segment.id, Utc::now());

        if ping.speed <= segment.max_speed {
            return false;
        }
        if persistent {
            return true;
        }
        overspeed_ratio(ping, segment) > self.rules.overspeed_ratio
    }

    /// Append a sample, prune the vehicle's window and report whether the
    /// trailing samples are all above the baseline.
    fn record(&self, ping: &Ping, road_id: RoadId, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.rules.history_window();
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        let samples = history.entry(ping.vehicle_id.clone()).or_default();
        samples.push(SpeedSample {
            speed: ping.speed,
            timestamp: ping.timestamp,
            road_id,
        });
        samples.retain(|sample| sample.timestamp > cutoff);

        let needed = self.rules.persistent_samples;
        needed > 0
            && samples.len() >= needed
            && samples[samples.len() - needed..]
                .iter()
                .all(|sample| sample.speed > self.rules.baseline_limit_kmh)
    }

    /// Drop expired samples for every vehicle and forget vehicles left empty.
    /// Returns the number of samples removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.rules.history_window();
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        history.retain(|_, samples| {
            let before = samples.len();
            samples.retain(|sample| sample.timestamp > cutoff);
            removed += before - samples.len();
            !samples.is_empty()
        });
        removed
    }

    /// Copy of a vehicle's samples, oldest first.
    pub fn history(&self, vehicle_id: &str) -> Vec<SpeedSample> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tracked_vehicles(&self) -> usize {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Mean speed over samples newer than `window`; 0 if there are none.
    pub fn average_speed(&self, vehicle_id: &str, window: Duration) -> f64 {
        let cutoff = Utc::now() - window;
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        let Some(samples) = history.get(vehicle_id) else {
            return 0.0;
        };

        let (total, count) = samples
            .iter()
            .filter(|sample| sample.timestamp > cutoff)
            .fold((0i64, 0usize), |(total, count), sample| {
                (total + i64::from(sample.speed), count + 1)
            });

        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn detect_pattern(&self, vehicle_id: &str) -> SpeedPattern {
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        let speeds: Vec<i32> = history
            .get(vehicle_id)
            .map(|samples| samples.iter().map(|sample| sample.speed).collect())
            .unwrap_or_default();
        drop(history);

        if speeds.len() < self.rules.pattern_min_samples {
            return SpeedPattern::InsufficientData;
        }
        classify_trend(
            &speeds,
            self.rules.pattern_delta_kmh,
            self.rules.pattern_majority,
        )
    }

    /// Overspeed counts for one road over samples newer than `duration`,
    /// judged against the fixed baseline limit.
    pub fn overspeed_statistics(&self, road_id: RoadId, duration: Duration) -> OverspeedStatistics {
        let cutoff = Utc::now() - duration;
        let baseline = self.rules.baseline_limit_kmh;
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);

        let mut overspeed_count = 0;
        let mut total_count = 0;
        let mut max_speed = 0;
        for sample in history
            .values()
            .flatten()
            .filter(|sample| sample.road_id == road_id && sample.timestamp > cutoff)
        {
            total_count += 1;
            if sample.speed > baseline {
                overspeed_count += 1;
                max_speed = max_speed.max(sample.speed);
            }
        }

        let overspeed_rate = if total_count > 0 {
            overspeed_count as f64 / total_count as f64
        } else {
            0.0
        };

        OverspeedStatistics {
            overspeed_count,
            total_count,
            overspeed_rate,
            max_speed,
            duration_hours: hours(duration),
        }
    }

    /// Build the speeding alert for a ping without writing it anywhere.
    pub fn speed_alert(&self, ping: &Ping, segment: &RoadSegment) -> Alert {
        let severity = self
            .rules
            .alert_bands
            .classify(overspeed_ratio(ping, segment));

        Alert {
            alert_type: AlertType::Speeding,
            vehicle_id: ping.vehicle_id.clone(),
            road_segment: Some(segment.clone()),
            value: f64::from(ping.speed),
            message: format!(
                "Vehicle {} speeding: {} km/h in a {} km/h zone",
                ping.vehicle_id, ping.speed, segment.max_speed
            ),
            severity,
            timestamp: Utc::now(),
            resolved: false,
        }
    }

    /// Build the speeding alert and write it through the emitter.
    pub fn emit_speed_alert(
        &self,
        ping: &Ping,
        segment: &RoadSegment,
        emitter: &AlertEmitter,
    ) -> Result<Alert, CoreError> {
        emitter.emit(self.speed_alert(ping, segment))
    }
}

fn overspeed_ratio(ping: &Ping, segment: &RoadSegment) -> f64 {
    if segment.max_speed <= 0 {
        return f64::INFINITY;
    }
    f64::from(ping.speed) / f64::from(segment.max_speed)
}

pub(crate) fn hours(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 3_600_000.0
}

/// Classify successive speed deltas: more than `majority` of them beyond
/// `+delta` is accelerating, beyond `-delta` decelerating, anything else stable.
pub fn classify_trend(speeds: &[i32], delta: i32, majority: f64) -> SpeedPattern {
    if speeds.len() < 2 {
        return SpeedPattern::InsufficientData;
    }

    let mut accelerating = 0usize;
    let mut decelerating = 0usize;
    for pair in speeds.windows(2) {
        let change = pair[1] - pair[0];
        if change > delta {
            accelerating += 1;
        } else if change < -delta {
            decelerating += 1;
        }
    }

    let total = (speeds.len() - 1) as f64;
    if accelerating as f64 / total > majority {
        SpeedPattern::Accelerating
    } else if decelerating as f64 / total > majority {
        SpeedPattern::Decelerating
    } else {
        SpeedPattern::Stable
    }
}
