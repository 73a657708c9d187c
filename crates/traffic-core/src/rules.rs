//! Thresholds and tuning constants for the traffic monitor.
//!
//! Every default reproduces the numeric behaviour the dashboard was built
//! against; override them through a JSON rules file.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::Severity;

/// Top-level configuration for all core components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficRules {
    pub speed: SpeedRules,
    pub congestion: CongestionRules,
    pub anomaly: AnomalyRules,
}

impl TrafficRules {
    /// Parse rules from JSON. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedRules {
    /// Fixed limit used by the persistent-overspeed check and road statistics,
    /// independent of each segment's own limit.
    pub baseline_limit_kmh: i32,
    /// `speed / max_speed` above which a single ping counts as overspeed
    pub overspeed_ratio: f64,
    /// Consecutive samples above the baseline that count as persistent
    pub persistent_samples: usize,
    /// Rolling window kept per vehicle
    pub history_window_secs: i64,
    /// Ratio bands for speed alert severity
    pub alert_bands: SeverityBands,
    pub pattern_min_samples: usize,
    /// Speed delta (km/h) beyond which a step counts as accelerating/decelerating
    pub pattern_delta_kmh: i32,
    /// Share of steps needed to call a trend
    pub pattern_majority: f64,
}

impl Default for SpeedRules {
    fn default() -> Self {
        Self {
            baseline_limit_kmh: 60,
            overspeed_ratio: 1.1,
            persistent_samples: 3,
            history_window_secs: 3600,
            alert_bands: SeverityBands::default(),
            pattern_min_samples: 5,
            pattern_delta_kmh: 5,
            pattern_majority: 0.6,
        }
    }
}

impl SpeedRules {
    pub fn history_window(&self) -> Duration {
        Duration::seconds(self.history_window_secs)
    }
}

/// Lower bounds of the `speed / limit` ratio for each severity; anything
/// below `medium` is low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBands {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            critical: 1.5,
            high: 1.3,
            medium: 1.1,
        }
    }
}

impl SeverityBands {
    pub fn classify(&self, ratio: f64) -> Severity {
        if ratio >= self.critical {
            Severity::Critical
        } else if ratio >= self.high {
            Severity::High
        } else if ratio >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CongestionRules {
    /// Ping window aggregated by a recompute
    pub window_secs: i64,
    pub speed_weight: f64,
    pub density_weight: f64,
    /// Linear growth applied per minute by the naive predictor
    pub prediction_growth_per_minute: f64,
    pub trend_base: f64,
    pub trend_step: f64,
    /// Upper bounds (exclusive) for free, light, moderate and heavy
    pub level_thresholds: [f64; 4],
}

impl Default for CongestionRules {
    fn default() -> Self {
        Self {
            window_secs: 300,
            speed_weight: 0.7,
            density_weight: 0.3,
            prediction_growth_per_minute: 0.1,
            trend_base: 0.3,
            trend_step: 0.1,
            level_thresholds: [0.2, 0.4, 0.6, 0.8],
        }
    }
}

impl CongestionRules {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyRules {
    /// Detection records kept per vehicle
    pub history_capacity: usize,
    /// Historical pings required before the pattern check runs
    pub pattern_min_history: usize,
    /// Implied km/h between consecutive positions above which a ping is a jump
    pub jump_speed_kmh: f64,
    pub jump_severity: Severity,
    /// Speed coefficient of variation above which history counts as erratic
    pub pattern_deviation_threshold: f64,
    pub pattern_severity: Severity,
    /// Age after which the background prune drops detection records
    pub history_retention_secs: i64,
    /// Age after which a vehicle's last known position is forgotten
    pub position_ttl_secs: i64,
}

impl Default for AnomalyRules {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            pattern_min_history: 10,
            jump_speed_kmh: 300.0,
            jump_severity: Severity::High,
            pattern_deviation_threshold: 0.8,
            pattern_severity: Severity::Medium,
            history_retention_secs: 24 * 3600,
            position_ttl_secs: 3600,
        }
    }
}

impl AnomalyRules {
    pub fn history_retention(&self) -> Duration {
        Duration::seconds(self.history_retention_secs)
    }

    pub fn position_ttl(&self) -> Duration {
        Duration::seconds(self.position_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_bands_match_ratio_cutoffs() {
        let bands = SeverityBands::default();
        assert_eq!(bands.classify(1.5), Severity::Critical);
        assert_eq!(bands.classify(1.49), Severity::High);
        assert_eq!(bands.classify(1.3), Severity::High);
        assert_eq!(bands.classify(1.1), Severity::Medium);
        assert_eq!(bands.classify(1.0), Severity::Low);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let rules =
            TrafficRules::from_json_str(r#"{"speed": {"baseline_limit_kmh": 80}}"#).unwrap();
        assert_eq!(rules.speed.baseline_limit_kmh, 80);
        assert_eq!(rules.speed.persistent_samples, 3);
        assert_eq!(rules.congestion, CongestionRules::default());
        assert_eq!(rules.anomaly.history_capacity, 100);
    }

    #[test]
    fn anomaly_checks_can_be_tuned_from_json() {
        let rules = TrafficRules::from_json_str(
            r#"{"anomaly": {"jump_speed_kmh": 200.0, "jump_severity": "critical"}}"#,
        )
        .unwrap();
        assert_eq!(rules.anomaly.jump_speed_kmh, 200.0);
        assert_eq!(rules.anomaly.jump_severity, Severity::Critical);
        assert_eq!(rules.anomaly.pattern_deviation_threshold, 0.8);
        assert_eq!(rules.anomaly.pattern_severity, Severity::Medium);
    }
}
