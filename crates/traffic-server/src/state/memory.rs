//! In-memory collaborators backed by DashMap.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use traffic_core::{Alert, AlertSink, Ping, PingStore, RoadId, RoadSegment, RoadStore, StoreError};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryRoadStore {
    roads: DashMap<RoadId, RoadSegment>,
}

impl MemoryRoadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a segment.
    pub fn upsert(&self, road: RoadSegment) {
        self.roads.insert(road.id, road);
    }

    pub fn len(&self) -> usize {
        self.roads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roads.is_empty()
    }
}

impl RoadStore for MemoryRoadStore {
    /// Ordered by id so reloads scan segments in a stable order.
    fn list_all(&self) -> Result<Vec<RoadSegment>, StoreError> {
        let mut roads: Vec<RoadSegment> = self.roads.iter().map(|r| r.value().clone()).collect();
        roads.sort_by_key(|road| road.id);
        Ok(roads)
    }

    fn get_by_id(&self, id: RoadId) -> Result<Option<RoadSegment>, StoreError> {
        Ok(self.roads.get(&id).map(|r| r.value().clone()))
    }
}

/// Pings grouped per vehicle in arrival order.
pub struct MemoryPingStore {
    pings: DashMap<String, VecDeque<Ping>>,
    retention: Duration,
}

impl MemoryPingStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            pings: DashMap::new(),
            retention,
        }
    }

    pub fn record(&self, ping: Ping) {
        self.pings
            .entry(ping.vehicle_id.clone())
            .or_default()
            .push_back(ping);
    }

    pub fn len(&self) -> usize {
        self.pings.iter().map(|r| r.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    /// Drop pings older than the retention window. Returns how many were removed.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut removed = 0;
        self.pings.retain(|_, pings| {
            let before = pings.len();
            pings.retain(|ping| ping.timestamp >= cutoff);
            removed += before - pings.len();
            !pings.is_empty()
        });
        removed
    }
}

impl PingStore for MemoryPingStore {
    fn find_by_road(
        &self,
        road_id: RoadId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Ping>, StoreError> {
        Ok(self
            .pings
            .iter()
            .flat_map(|r| {
                r.value()
                    .iter()
                    .filter(|ping| ping.road_id == Some(road_id) && ping.timestamp >= since)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    fn find_by_vehicle(&self, vehicle_id: &str, limit: usize) -> Result<Vec<Ping>, StoreError> {
        Ok(self
            .pings
            .get(vehicle_id)
            .map(|r| r.value().iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct StoredAlert {
    pub id: Uuid,
    pub alert: Alert,
}

#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: DashMap<Uuid, Alert>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Up to `limit` alerts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<StoredAlert> {
        let mut alerts: Vec<StoredAlert> = self
            .alerts
            .iter()
            .map(|r| StoredAlert {
                id: *r.key(),
                alert: r.value().clone(),
            })
            .collect();
        alerts.sort_by(|a, b| b.alert.timestamp.cmp(&a.alert.timestamp));
        alerts.truncate(limit);
        alerts
    }

    pub fn unresolved(&self) -> usize {
        self.alerts.iter().filter(|r| !r.value().resolved).count()
    }

    pub fn resolve(&self, id: Uuid) -> bool {
        match self.alerts.get_mut(&id) {
            Some(mut alert) => {
                alert.resolved = true;
                true
            }
            None => false,
        }
    }
}

impl AlertSink for MemoryAlertSink {
    fn create(&self, alert: &Alert) -> Result<(), StoreError> {
        self.alerts.insert(Uuid::new_v4(), alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_core::{AlertType, Severity};

    fn road(id: RoadId) -> RoadSegment {
        RoadSegment {
            id,
            name: format!("Road {id}"),
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
    fn roads_are_listed_by_id() {
        let store = MemoryRoadStore::new();
        for id in [3, 1, 2] {
            store.upsert(road(id));
        }
        let ids: Vec<RoadId> = store.list_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.get_by_id(2).unwrap().map(|r| r.id), Some(2));
        assert_eq!(store.get_by_id(7).unwrap(), None);
    }

    #[test]
    fn vehicle_pings_come_back_newest_first() {
        let store = MemoryPingStore::new(Duration::hours(1));
        let now = Utc::now();
        for i in 0..5 {
            store.record(Ping::new("V1", 116.35, 39.90, 40 + i, now + Duration::seconds(i as i64)));
        }
        let speeds: Vec<i32> = store
            .find_by_vehicle("V1", 3)
            .unwrap()
            .iter()
            .map(|p| p.speed)
            .collect();
        assert_eq!(speeds, vec![44, 43, 42]);
        assert!(store.find_by_vehicle("V9", 3).unwrap().is_empty());
    }

    #[test]
    fn road_query_filters_on_road_and_time() {
        let store = MemoryPingStore::new(Duration::hours(1));
        let now = Utc::now();
        store.record(Ping::new("V1", 116.35, 39.90, 40, now).with_road(1));
        store.record(Ping::new("V2", 116.35, 39.90, 40, now - Duration::minutes(10)).with_road(1));
        store.record(Ping::new("V3", 116.35, 39.90, 40, now).with_road(2));

        let recent = store.find_by_road(1, now - Duration::minutes(5)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].vehicle_id, "V1");
    }

    #[test]
    fn prune_respects_retention() {
        let store = MemoryPingStore::new(Duration::minutes(30));
        let now = Utc::now();
        store.record(Ping::new("V1", 116.35, 39.90, 40, now - Duration::hours(1)));
        store.record(Ping::new("V1", 116.35, 39.90, 40, now));
        store.record(Ping::new("V2", 116.35, 39.90, 40, now - Duration::hours(2)));

        assert_eq!(store.prune_at(now), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn alerts_can_be_resolved() {
        let sink = MemoryAlertSink::new();
        let alert = Alert {
            alert_type: AlertType::Speeding,
            vehicle_id: "V1".to_string(),
            road_segment: Some(road(1)),
            value: 90.0,
            message: "speeding".to_string(),
            severity: Severity::Critical,
            timestamp: Utc::now(),
            resolved: false,
        };
        sink.create(&alert).unwrap();
        assert_eq!(sink.unresolved(), 1);

        let id = sink.recent(10)[0].id;
        assert!(sink.resolve(id));
        assert_eq!(sink.unresolved(), 0);
        assert!(!sink.resolve(Uuid::new_v4()));
    }
}
