pub mod alerts;
pub mod anomaly;
pub mod congestion;
pub mod error;
pub mod models;
pub mod road_matcher;
pub mod rules;
pub mod spatial;
pub mod speed;
pub mod store;

pub use alerts::AlertEmitter;
pub use anomaly::{
    default_rules, AnomalyEngine, AnomalyRule, AnomalyStatistics, RuleCondition, RuleType,
    SpeedProfile,
};
pub use congestion::{CongestionEngine, CongestionLevel, CongestionReading};
pub use error::{CoreError, StoreError};
pub use models::{
    Alert, AlertType, DetectionRecord, Ping, RoadId, RoadSegment, RoadStatistics, Severity,
    SpeedSample,
};
pub use road_matcher::RoadMatcher;
pub use rules::{AnomalyRules, CongestionRules, SeverityBands, SpeedRules, TrafficRules};
pub use spatial::{great_circle_distance_km, point_to_segment_distance_km, GeoPoint};
pub use speed::{OverspeedStatistics, SpeedMonitor, SpeedPattern};
pub use store::{AlertSink, PingStore, RoadStore};
