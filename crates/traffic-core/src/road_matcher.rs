//! Nearest-road matching against a snapshot of road segments.
//!
//! Roads are independent straight segments; there is no graph topology.
//! The snapshot only changes on an explicit [`RoadMatcher::reload`].

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::CoreError;
use crate::models::{Ping, RoadId, RoadSegment};
use crate::spatial::{bearing_degrees, point_to_segment_distance_km, GeoPoint};
use crate::store::RoadStore;

pub struct RoadMatcher {
    store: Arc<dyn RoadStore>,
    /// Segments in Road Store order; scan order decides ties.
    segments: RwLock<Vec<RoadSegment>>,
}

impl RoadMatcher {
    /// Create a matcher with an empty snapshot. Call [`reload`](Self::reload) to populate it.
    pub fn new(store: Arc<dyn RoadStore>) -> Self {
        Self {
            store,
            segments: RwLock::new(Vec::new()),
        }
    }

    /// Replace the snapshot with the Road Store's current segments.
    ///
    /// The store is queried before the lock is taken; on failure the previous
    /// snapshot stays in place. Returns the number of loaded segments.
    pub fn reload(&self) -> Result<usize, CoreError> {
        let segments = self.store.list_all()?;
        let count = segments.len();
        *self.segments.write().unwrap_or_else(PoisonError::into_inner) = segments;
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the loaded snapshot in load order.
    pub fn segments(&self) -> Vec<RoadSegment> {
        self.segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn segment(&self, id: RoadId) -> Option<RoadSegment> {
        self.segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|segment| segment.id == id)
            .cloned()
    }

    /// Closest loaded segment and its distance.
    ///
    /// The first segment seen wins ties. With nothing loaded this returns
    /// `(None, f64::INFINITY)` rather than an error.
    pub fn find_nearest(&self, lon: f64, lat: f64) -> (Option<RoadSegment>, f64) {
        let point = GeoPoint::new(lon, lat);
        let segments = self.segments.read().unwrap_or_else(PoisonError::into_inner);

        let mut nearest: Option<&RoadSegment> = None;
        let mut min_distance = f64::INFINITY;
        for segment in segments.iter() {
            let distance = distance_to(point, segment);
            if distance < min_distance {
                min_distance = distance;
                nearest = Some(segment);
            }
        }

        (nearest.cloned(), min_distance)
    }

    /// All segments within `radius_km`, in load order.
    pub fn find_within_radius(&self, lon: f64, lat: f64, radius_km: f64) -> Vec<RoadSegment> {
        let point = GeoPoint::new(lon, lat);
        self.segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|segment| distance_to(point, segment) <= radius_km)
            .cloned()
            .collect()
    }

    pub fn is_on_segment(
        &self,
        lon: f64,
        lat: f64,
        segment: &RoadSegment,
        tolerance_km: f64,
    ) -> bool {
        distance_to(GeoPoint::new(lon, lat), segment) <= tolerance_km
    }

    /// Direction of travel from the segment's start to its end, in degrees.
    pub fn direction(&self, segment: &RoadSegment) -> f64 {
        bearing_degrees(segment.start(), segment.end())
    }

    /// Segment for a ping: the precomputed road when it is in the snapshot,
    /// otherwise the nearest segment.
    pub fn resolve(&self, ping: &Ping) -> (Option<RoadSegment>, f64) {
        if let Some(segment) = ping.road_id.and_then(|id| self.segment(id)) {
            let distance = distance_to(ping.position(), &segment);
            return (Some(segment), distance);
        }
        self.find_nearest(ping.lon, ping.lat)
    }
}

fn distance_to(point: GeoPoint, segment: &RoadSegment) -> f64 {
    point_to_segment_distance_km(point, segment.start(), segment.end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use chrono::Utc;
    use std::sync::Mutex;

    struct FixedRoads {
        roads: Mutex<Result<Vec<RoadSegment>, StoreError>>,
    }

    impl FixedRoads {
        fn new(roads: Vec<RoadSegment>) -> Arc<Self> {
            Arc::new(Self {
                roads: Mutex::new(Ok(roads)),
            })
        }

        fn fail(&self) {
            *self.roads.lock().unwrap() = Err(StoreError::Unavailable("down".to_string()));
        }
    }

    impl RoadStore for FixedRoads {
        fn list_all(&self) -> Result<Vec<RoadSegment>, StoreError> {
            self.roads.lock().unwrap().clone()
        }

        fn get_by_id(&self, id: RoadId) -> Result<Option<RoadSegment>, StoreError> {
            Ok(self.list_all()?.into_iter().find(|road| road.id == id))
        }
    }

    fn road(id: RoadId, start: (f64, f64), end: (f64, f64)) -> RoadSegment {
        RoadSegment {
            id,
            name: format!("Road {id}"),
            start_lon: start.0,
            start_lat: start.1,
            end_lon: end.0,
            end_lat: end.1,
            max_speed: 60,
            capacity: 100,
            length_km: None,
            road_type: "urban".to_string(),
        }
    }

    fn loaded(roads: Vec<RoadSegment>) -> RoadMatcher {
        let matcher = RoadMatcher::new(FixedRoads::new(roads));
        matcher.reload().unwrap();
        matcher
    }

    #[test]
    fn empty_snapshot_returns_no_match_sentinel() {
        let matcher = RoadMatcher::new(FixedRoads::new(Vec::new()));
        let (segment, distance) = matcher.find_nearest(116.3, 39.9);
        assert!(segment.is_none());
        assert_eq!(distance, f64::INFINITY);
        assert!(matcher.find_within_radius(116.3, 39.9, 100.0).is_empty());
    }

    #[test]
    fn nearest_picks_closest_segment() {
        let matcher = loaded(vec![
            road(1, (116.30, 39.90), (116.40, 39.90)),
            road(2, (116.30, 39.95), (116.40, 39.95)),
        ]);
        let (segment, distance) = matcher.find_nearest(116.35, 39.94);
        assert_eq!(segment.map(|s| s.id), Some(2));
        // Off the zero-height box of a horizontal road: endpoint distance in km.
        assert!(distance > 4.0 && distance < 5.0, "got {distance}");
    }

    #[test]
    fn first_loaded_segment_wins_ties() {
        let matcher = loaded(vec![
            road(7, (116.30, 39.90), (116.40, 39.90)),
            road(3, (116.30, 39.90), (116.40, 39.90)),
        ]);
        let (segment, _) = matcher.find_nearest(116.35, 39.90);
        assert_eq!(segment.map(|s| s.id), Some(7));
    }

    #[test]
    fn radius_query_keeps_load_order() {
        let matcher = loaded(vec![
            road(5, (116.30, 39.90), (116.40, 39.90)),
            road(2, (116.30, 39.91), (116.40, 39.91)),
            road(9, (117.30, 40.90), (117.40, 40.90)),
        ]);
        let ids: Vec<RoadId> = matcher
            .find_within_radius(116.35, 39.905, 5.0)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![5, 2]);
    }

    #[test]
    fn on_segment_respects_tolerance() {
        let matcher = loaded(Vec::new());
        let segment = road(1, (116.30, 39.90), (116.40, 39.90));
        assert!(matcher.is_on_segment(116.35, 39.90, &segment, 0.01));
        // Past the end of the segment: measured to the endpoint in km.
        assert!(!matcher.is_on_segment(116.45, 39.90, &segment, 1.0));
        assert!(matcher.is_on_segment(116.45, 39.90, &segment, 5.0));
    }

    #[test]
    fn direction_of_eastbound_road_is_ninety() {
        let matcher = loaded(Vec::new());
        let segment = road(1, (0.0, 0.0), (0.1, 0.0));
        assert!((matcher.direction(&segment) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn resolve_prefers_precomputed_road() {
        let matcher = loaded(vec![
            road(1, (116.30, 39.90), (116.40, 39.90)),
            road(2, (116.30, 39.95), (116.40, 39.95)),
        ]);
        let ping = Ping::new("V1", 116.35, 39.90, 40, Utc::now());
        assert_eq!(matcher.resolve(&ping).0.map(|s| s.id), Some(1));
        let ping = ping.with_road(2);
        assert_eq!(matcher.resolve(&ping).0.map(|s| s.id), Some(2));
        // Unknown precomputed road falls back to matching.
        let ping = Ping::new("V1", 116.35, 39.90, 40, Utc::now()).with_road(42);
        assert_eq!(matcher.resolve(&ping).0.map(|s| s.id), Some(1));
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let store = FixedRoads::new(vec![road(1, (116.30, 39.90), (116.40, 39.90))]);
        let matcher = RoadMatcher::new(store.clone());
        assert_eq!(matcher.reload().unwrap(), 1);
        store.fail();
        assert!(matcher.reload().is_err());
        assert_eq!(matcher.len(), 1);
    }
}
