//! Collaborator contracts the core reads from and writes to.
//!
//! Implementations own persistence and their own timeout policy. Calls are
//! synchronous; components never hold their internal lock while calling one.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Alert, Ping, RoadId, RoadSegment};

/// Lookup and listing of road segments.
pub trait RoadStore: Send + Sync {
    /// Every known segment, in a stable order.
    fn list_all(&self) -> Result<Vec<RoadSegment>, StoreError>;

    /// A single segment, `None` when the id is unknown.
    fn get_by_id(&self, id: RoadId) -> Result<Option<RoadSegment>, StoreError>;
}

/// Time-windowed queries over recorded pings.
pub trait PingStore: Send + Sync {
    /// Pings matched to `road_id` with `timestamp >= since`.
    fn find_by_road(&self, road_id: RoadId, since: DateTime<Utc>)
        -> Result<Vec<Ping>, StoreError>;

    /// Up to `limit` most recent pings for a vehicle, newest first.
    fn find_by_vehicle(&self, vehicle_id: &str, limit: usize) -> Result<Vec<Ping>, StoreError>;
}

/// Durable write of generated alerts.
pub trait AlertSink: Send + Sync {
    fn create(&self, alert: &Alert) -> Result<(), StoreError>;
}
