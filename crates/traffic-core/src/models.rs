//! Core data models for the traffic monitor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::spatial::{great_circle_distance_km, GeoPoint};

/// Road segment identifier as assigned by the Road Store.
pub type RoadId = u64;

/// A straight-line approximation of a stretch of road.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadSegment {
    pub id: RoadId,
    pub name: String,
    pub start_lon: f64,
    pub start_lat: f64,
    pub end_lon: f64,
    pub end_lat: f64,
    /// Speed limit in km/h
    pub max_speed: i32,
    /// Vehicle capacity used for density scoring
    pub capacity: u32,
    /// Length in km when surveyed; derived from the endpoints otherwise
    #[serde(default)]
    pub length_km: Option<f64>,
    #[serde(default = "default_road_type")]
    pub road_type: String,
}

fn default_road_type() -> String {
    "urban".to_string()
}

impl RoadSegment {
    pub fn start(&self) -> GeoPoint {
        GeoPoint::new(self.start_lon, self.start_lat)
    }

    pub fn end(&self) -> GeoPoint {
        GeoPoint::new(self.end_lon, self.end_lat)
    }

    /// Midpoint of the two endpoints.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.start_lon + self.end_lon) / 2.0,
            (self.start_lat + self.end_lat) / 2.0,
        )
    }

    /// Surveyed length if present and positive, otherwise the great-circle
    /// distance between the endpoints.
    pub fn length_km(&self) -> f64 {
        match self.length_km {
            Some(length) if length > 0.0 => length,
            _ => great_circle_distance_km(self.start(), self.end()),
        }
    }
}

/// A single timestamped vehicle location and speed report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub vehicle_id: String,
    pub lon: f64,
    pub lat: f64,
    /// km/h
    pub speed: i32,
    /// Heading in degrees
    #[serde(default)]
    pub direction: Option<i32>,
    pub timestamp: DateTime<Utc>,
    /// Road the ingestion boundary already matched this ping to
    #[serde(default)]
    pub road_id: Option<RoadId>,
    #[serde(default = "default_vehicle_type")]
    pub vehicle_type: String,
}

fn default_vehicle_type() -> String {
    "car".to_string()
}

impl Ping {
    /// Create a ping with only the required fields.
    pub fn new(
        vehicle_id: impl Into<String>,
        lon: f64,
        lat: f64,
        speed: i32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            lon,
            lat,
            speed,
            direction: None,
            timestamp,
            road_id: None,
            vehicle_type: default_vehicle_type(),
        }
    }

    /// Copy of this ping stamped with a matched road.
    pub fn with_road(mut self, road_id: RoadId) -> Self {
        self.road_id = Some(road_id);
        self
    }

    pub fn with_direction(mut self, direction: i32) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lon, self.lat)
    }

    /// Reject pings that must not enter the per-vehicle maps.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.vehicle_id.trim().is_empty() {
            return Err(CoreError::InvalidPing("vehicle id is empty".to_string()));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(CoreError::InvalidPing(format!(
                "longitude {} out of range",
                self.lon
            )));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::InvalidPing(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        if self.speed < 0 {
            return Err(CoreError::InvalidPing(format!(
                "negative speed {}",
                self.speed
            )));
        }
        Ok(())
    }
}

/// Ordered classification attached to alerts and detections.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One speed observation kept in a vehicle's rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub speed: i32,
    pub timestamp: DateTime<Utc>,
    pub road_id: RoadId,
}

/// One anomaly-rule match for one vehicle at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub vehicle_id: String,
    /// Label of the rule that fired
    pub anomaly_type: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// Aggregated statistics for one road, replaced wholesale on every recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadStatistics {
    pub road_id: RoadId,
    pub vehicle_count: usize,
    pub average_speed: f64,
    /// Copied from the segment's limit
    pub max_speed: i32,
    /// Congestion score in [0, 1]
    pub congestion_score: f64,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Raised by the speed monitor
    Speeding,
    /// Raised by an anomaly rule
    Anomaly,
}

/// Alert handed to the Alert Sink. Resolution belongs to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub vehicle_id: String,
    pub road_segment: Option<RoadSegment>,
    pub value: f64,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
}

impl Alert {
    pub fn is_high_severity(&self) -> bool {
        self.severity >= Severity::High
    }

    /// Raised within the last hour.
    pub fn is_recent(&self) -> bool {
        Utc::now() - self.timestamp <= Duration::hours(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> RoadSegment {
        RoadSegment {
            id: 1,
            name: "Main".to_string(),
            start_lon: 116.30,
            start_lat: 39.90,
            end_lon: 116.40,
            end_lat: 39.90,
            max_speed: 60,
            capacity: 100,
            length_km: None,
            road_type: "urban".to_string(),
        }
    }

    #[test]
    fn severity_has_total_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        let mut levels = vec![Severity::Critical, Severity::Low, Severity::High, Severity::Medium];
        levels.sort();
        assert_eq!(
            levels,
            vec![Severity::Low, Severity::Medium, Severity::High, Severity::Critical]
        );
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let parsed: Severity = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, Severity::High);
    }

    #[test]
    fn length_is_derived_when_missing() {
        let mut road = segment();
        let derived = road.length_km();
        assert!(derived > 8.0 && derived < 9.0);

        road.length_km = Some(2.5);
        assert_eq!(road.length_km(), 2.5);

        road.length_km = Some(0.0);
        assert!((road.length_km() - derived).abs() < 1e-12);
    }

    #[test]
    fn ping_validation_rejects_malformed_input() {
        let now = Utc::now();
        assert!(Ping::new("V1", 116.3, 39.9, 50, now).validate().is_ok());
        assert!(Ping::new("  ", 116.3, 39.9, 50, now).validate().is_err());
        assert!(Ping::new("V1", 190.0, 39.9, 50, now).validate().is_err());
        assert!(Ping::new("V1", 116.3, f64::NAN, 50, now).validate().is_err());
        assert!(Ping::new("V1", 116.3, 39.9, -1, now).validate().is_err());
    }

    #[test]
    fn alert_severity_helpers() {
        let alert = Alert {
            alert_type: AlertType::Speeding,
            vehicle_id: "V1".to_string(),
            road_segment: Some(segment()),
            value: 90.0,
            message: String::new(),
            severity: Severity::High,
            timestamp: Utc::now(),
            resolved: false,
        };
        assert!(alert.is_high_severity());
        assert!(alert.is_recent());

        let old = Alert {
            severity: Severity::Medium,
            timestamp: Utc::now() - Duration::hours(2),
            ..alert
        };
        assert!(!old.is_high_severity());
        assert!(!old.is_recent());
    }
}
