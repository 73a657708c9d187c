//! Anomaly detection.
//!
//! Three passes run over every ping:
//! - every enabled speed rule compares the reported speed,
//! - the jump check compares the speed implied by the move from the vehicle's
//!   last known position against `jump_speed_kmh`,
//! - the pattern check compares the spread of the vehicle's historical speeds
//!   against `pattern_deviation_threshold`.
//!
//! Only speed rules are read from the rule table. Location and pattern rules
//! are listed alongside them but the fixed checks ignore them.
//!
//! Every match becomes a [`DetectionRecord`] kept in a bounded per-vehicle
//! history.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::AlertEmitter;
use crate::error::CoreError;
use crate::models::{Alert, AlertType, DetectionRecord, Ping, RoadSegment, Severity};
use crate::rules::AnomalyRules;
use crate::spatial::{great_circle_distance_km, GeoPoint};
use crate::speed::hours;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Speed,
    Location,
    Pattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    GreaterThan,
    LessThan,
}

impl RuleCondition {
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            RuleCondition::GreaterThan => value > threshold,
            RuleCondition::LessThan => value < threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub condition: RuleCondition,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn enabled_by_default() -> bool {
    true
}

impl AnomalyRule {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidRule("rule id is empty".to_string()));
        }
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(CoreError::InvalidRule(format!(
                "rule {} has threshold {}",
                self.id, self.threshold
            )));
        }
        Ok(())
    }
}

/// Rule table every engine starts with.
pub fn default_rules() -> Vec<AnomalyRule> {
    vec![
        AnomalyRule {
            id: "speed_anomaly_1".to_string(),
            name: "Extreme speed".to_string(),
            rule_type: RuleType::Speed,
            condition: RuleCondition::GreaterThan,
            threshold: 150.0,
            severity: Severity::Critical,
            enabled: true,
            description: "Vehicle speed above 150 km/h".to_string(),
        },
        AnomalyRule {
            id: "speed_anomaly_2".to_string(),
            name: "Low speed".to_string(),
            rule_type: RuleType::Speed,
            condition: RuleCondition::LessThan,
            threshold: 5.0,
            severity: Severity::Medium,
            enabled: true,
            description: "Vehicle speed below 5 km/h, possibly stopped".to_string(),
        },
        AnomalyRule {
            id: "location_anomaly_1".to_string(),
            name: "Position jump".to_string(),
            rule_type: RuleType::Location,
            condition: RuleCondition::GreaterThan,
            threshold: 1.0,
            severity: Severity::High,
            enabled: true,
            description: "Vehicle position changed abnormally".to_string(),
        },
        AnomalyRule {
            id: "pattern_anomaly_1".to_string(),
            name: "Behavior pattern anomaly".to_string(),
            rule_type: RuleType::Pattern,
            condition: RuleCondition::GreaterThan,
            threshold: 0.8,
            severity: Severity::Medium,
            enabled: true,
            description: "Speed behaviour deviates from the vehicle's history".to_string(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyStatistics {
    pub total_anomalies: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub duration_hours: f64,
}

/// Summary of a vehicle's historical speeds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    pub average: f64,
    /// Coefficient of variation, clamped to [0, 1]
    pub deviation: f64,
}

impl SpeedProfile {
    pub fn from_pings(pings: &[Ping]) -> Option<Self> {
        if pings.is_empty() {
            return None;
        }
        let count = pings.len() as f64;
        let average = pings.iter().map(|ping| f64::from(ping.speed)).sum::<f64>() / count;
        let variance = pings
            .iter()
            .map(|ping| (f64::from(ping.speed) - average).powi(2))
            .sum::<f64>()
            / count;

        let deviation = if average > 0.0 {
            (variance.sqrt() / average).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(Self { average, deviation })
    }
}

#[derive(Debug, Clone, Copy)]
struct LastPosition {
    point: GeoPoint,
    timestamp: DateTime<Utc>,
    seen_at: DateTime<Utc>,
}

#[derive(Default)]
struct EngineState {
    rules: Vec<AnomalyRule>,
    history: HashMap<String, VecDeque<DetectionRecord>>,
    positions: HashMap<String, LastPosition>,
}

pub struct AnomalyEngine {
    config: AnomalyRules,
    state: RwLock<EngineState>,
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::new(AnomalyRules::default())
    }
}

impl AnomalyEngine {
    /// Engine loaded with [`default_rules`].
    pub fn new(config: AnomalyRules) -> Self {
        Self {
            config,
            state: RwLock::new(EngineState {
                rules: default_rules(),
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &AnomalyRules {
        &self.config
    }

    /// Run the enabled speed rules and the fixed jump and pattern checks
    /// against the ping, and record the matches.
    ///
    /// `history` holds the vehicle's earlier pings (any order); the pattern
    /// pass is skipped while it is shorter than `pattern_min_history`.
    /// The ping always becomes the vehicle's last known position.
    pub fn evaluate(
        &self,
        ping: &Ping,
        segment: Option<&RoadSegment>,
        history: &[Ping],
    ) -> Vec<DetectionRecord> {
        let now = Utc::now();
        let profile = if history.len() >= self.config.pattern_min_history {
            SpeedProfile::from_pings(history)
        } else {
            None
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.config.position_ttl();
        let jump_speed = state
            .positions
            .get(&ping.vehicle_id)
            .filter(|last| now - last.seen_at <= ttl)
            .and_then(|last| implied_speed_kmh(last, ping));

        let speed = f64::from(ping.speed);
        let mut detections: Vec<DetectionRecord> = state
            .rules
            .iter()
            .filter(|rule| rule.enabled && rule.rule_type == RuleType::Speed)
            .filter(|rule| rule.condition.matches(speed, rule.threshold))
            .map(|rule| detection(&Check::from(rule), ping, segment, speed, now))
            .collect();

        if let Some(jump) = jump_speed.filter(|jump| *jump > self.config.jump_speed_kmh) {
            let check = Check {
                name: "Position jump",
                description: "Vehicle position changed abnormally",
                threshold: self.config.jump_speed_kmh,
                severity: self.config.jump_severity,
            };
            detections.push(detection(&check, ping, segment, jump, now));
        }

        if let Some(profile) =
            profile.filter(|profile| profile.deviation > self.config.pattern_deviation_threshold)
        {
            let check = Check {
                name: "Behavior pattern anomaly",
                description: "Speed behaviour deviates from the vehicle's history",
                threshold: self.config.pattern_deviation_threshold,
                severity: self.config.pattern_severity,
            };
            detections.push(detection(&check, ping, segment, profile.deviation, now));
        }

        state.positions.insert(
            ping.vehicle_id.clone(),
            LastPosition {
                point: ping.position(),
                timestamp: ping.timestamp,
                seen_at: now,
            },
        );

        if !detections.is_empty() {
            let capacity = self.config.history_capacity;
            let records = state.history.entry(ping.vehicle_id.clone()).or_default();
            for record in &detections {
                records.push_back(record.clone());
                while records.len() > capacity {
                    records.pop_front();
                }
            }
        }

        detections
    }

    /// Counts of detections newer than `duration`.
    pub fn statistics(&self, duration: Duration) -> AnomalyStatistics {
        let cutoff = Utc::now() - duration;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let mut stats = AnomalyStatistics {
            total_anomalies: 0,
            by_type: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            duration_hours: hours(duration),
        };
        for record in state
            .history
            .values()
            .flatten()
            .filter(|record| record.timestamp > cutoff)
        {
            stats.total_anomalies += 1;
            *stats.by_type.entry(record.anomaly_type.clone()).or_default() += 1;
            *stats.by_severity.entry(record.severity).or_default() += 1;
        }
        stats
    }

    pub fn add_rule(&self, rule: AnomalyRule) -> Result<(), CoreError> {
        rule.validate()?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.rules.iter().any(|existing| existing.id == rule.id) {
            return Err(CoreError::DuplicateRule(rule.id));
        }
        state.rules.push(rule);
        Ok(())
    }

    /// Replace the rule with id `rule_id` in place. Returns `Ok(false)` when
    /// no such rule exists.
    pub fn update_rule(&self, rule_id: &str, rule: AnomalyRule) -> Result<bool, CoreError> {
        rule.validate()?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if rule.id != rule_id && state.rules.iter().any(|existing| existing.id == rule.id) {
            return Err(CoreError::DuplicateRule(rule.id));
        }
        match state.rules.iter_mut().find(|existing| existing.id == rule_id) {
            Some(existing) => {
                *existing = rule;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn delete_rule(&self, rule_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let before = state.rules.len();
        state.rules.retain(|rule| rule.id != rule_id);
        state.rules.len() != before
    }

    /// Every rule, disabled ones included, in insertion order.
    pub fn list_rules(&self) -> Vec<AnomalyRule> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .clone()
    }

    /// Copy of a vehicle's detections, oldest first.
    pub fn history(&self, vehicle_id: &str) -> Vec<DetectionRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .get(vehicle_id)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    /// Drop detections past the retention window and positions past their
    /// TTL. Returns the number of detections removed.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let record_cutoff = now - self.config.history_retention();
        let position_cutoff = now - self.config.position_ttl();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;
        state.history.retain(|_, records| {
            let before = records.len();
            records.retain(|record| record.timestamp > record_cutoff);
            removed += before - records.len();
            !records.is_empty()
        });
        state
            .positions
            .retain(|_, position| position.seen_at > position_cutoff);
        removed
    }

    /// Alert for a detection, stamped with the detection's time.
    pub fn anomaly_alert(&self, record: &DetectionRecord, segment: Option<&RoadSegment>) -> Alert {
        Alert {
            alert_type: AlertType::Anomaly,
            vehicle_id: record.vehicle_id.clone(),
            road_segment: segment.cloned(),
            value: record.value,
            message: record.message.clone(),
            severity: record.severity,
            timestamp: record.timestamp,
            resolved: false,
        }
    }

    pub fn emit_anomaly_alert(
        &self,
        record: &DetectionRecord,
        segment: Option<&RoadSegment>,
        emitter: &AlertEmitter,
    ) -> Result<Alert, CoreError> {
        emitter.emit(self.anomaly_alert(record, segment))
    }
}

/// km/h needed to cover the jump; `None` when time did not move forward.
fn implied_speed_kmh(last: &LastPosition, ping: &Ping) -> Option<f64> {
    let elapsed = (ping.timestamp - last.timestamp).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 {
        return None;
    }
    let distance = great_circle_distance_km(last.point, ping.position());
    Some(distance / elapsed * 3600.0)
}

/// What a matched check reports.
struct Check<'a> {
    name: &'a str,
    description: &'a str,
    threshold: f64,
    severity: Severity,
}

impl<'a> From<&'a AnomalyRule> for Check<'a> {
    fn from(rule: &'a AnomalyRule) -> Self {
        Self {
            name: &rule.name,
            description: &rule.description,
            threshold: rule.threshold,
            severity: rule.severity,
        }
    }
}

fn detection(
    check: &Check<'_>,
    ping: &Ping,
    segment: Option<&RoadSegment>,
    value: f64,
    now: DateTime<Utc>,
) -> DetectionRecord {
    let mut message = format!(
        "{}: value {:.2}, threshold {:.2}",
        check.description, value, check.threshold
    );
    if let Some(segment) = segment {
        message.push_str(&format!(" on {}", segment.name));
    }

    DetectionRecord {
        vehicle_id: ping.vehicle_id.clone(),
        anomaly_type: check.name.to_string(),
        value,
        threshold: check.threshold,
        timestamp: now,
        severity: check.severity,
        message,
    }
}
