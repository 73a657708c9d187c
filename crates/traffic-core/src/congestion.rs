//! Per-road congestion scoring.
//!
//! Scores are pulled on the caller's cadence through [`CongestionEngine::recompute`];
//! nothing here runs per ping.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::{Ping, RoadId, RoadSegment, RoadStatistics};
use crate::rules::CongestionRules;
use crate::speed::hours;
use crate::store::{PingStore, RoadStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    /// No statistics recorded for the road
    Unknown,
    Free,
    Light,
    Moderate,
    Heavy,
    Severe,
}

impl CongestionLevel {
    /// Bucket a score using the upper bounds for free, light, moderate and heavy.
    pub fn from_score(score: f64, thresholds: &[f64; 4]) -> Self {
        if score < thresholds[0] {
            CongestionLevel::Free
        } else if score < thresholds[1] {
            CongestionLevel::Light
        } else if score < thresholds[2] {
            CongestionLevel::Moderate
        } else if score < thresholds[3] {
            CongestionLevel::Heavy
        } else {
            CongestionLevel::Severe
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CongestionLevel::Unknown => "unknown",
            CongestionLevel::Free => "free-flowing",
            CongestionLevel::Light => "light congestion",
            CongestionLevel::Moderate => "moderate congestion",
            CongestionLevel::Heavy => "heavy congestion",
            CongestionLevel::Severe => "severe congestion",
        }
    }
}

/// Level together with the score it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CongestionReading {
    pub level: CongestionLevel,
    pub score: f64,
}

pub struct CongestionEngine {
    roads: Arc<dyn RoadStore>,
    pings: Arc<dyn PingStore>,
    rules: CongestionRules,
    stats: RwLock<HashMap<RoadId, RoadStatistics>>,
}

impl CongestionEngine {
    pub fn new(roads: Arc<dyn RoadStore>, pings: Arc<dyn PingStore>, rules: CongestionRules) -> Self {
        Self {
            roads,
            pings,
            rules,
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &CongestionRules {
        &self.rules
    }

    /// Recompute a road's statistics from the pings in the trailing window.
    ///
    /// Returns `Ok(None)` for an unknown road or an empty window, leaving any
    /// previous statistics untouched. Both collaborators are queried before
    /// the statistics lock is taken.
    pub fn try_recompute(&self, road_id: RoadId) -> Result<Option<f64>, CoreError> {
        let Some(road) = self.roads.get_by_id(road_id)? else {
            return Ok(None);
        };

        let since = Utc::now() - self.rules.window();
        let pings = self.pings.find_by_road(road_id, since)?;
        if pings.is_empty() {
            return Ok(None);
        }

        let mut stats = road_statistics(&road, &pings);
        stats.congestion_score = self.score(&stats, &road);
        let score = stats.congestion_score;

        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(road_id, stats);
        Ok(Some(score))
    }

    /// [`try_recompute`](Self::try_recompute) with every miss or failure
    /// collapsed to a score of 0.
    pub fn recompute(&self, road_id: RoadId) -> f64 {
        self.try_recompute(road_id).ok().flatten().unwrap_or(0.0)
    }

    fn score(&self, stats: &RoadStatistics, road: &RoadSegment) -> f64 {
        if stats.average_speed == 0.0 {
            return 1.0;
        }

        let speed_term = if road.max_speed > 0 {
            1.0 - stats.average_speed / f64::from(road.max_speed)
        } else {
            0.0
        };
        let density_term = if road.capacity > 0 {
            stats.vehicle_count as f64 / f64::from(road.capacity)
        } else {
            1.0
        };

        (self.rules.speed_weight * speed_term + self.rules.density_weight * density_term)
            .clamp(0.0, 1.0)
    }

    pub fn level(&self, road_id: RoadId) -> CongestionReading {
        match self.statistics(road_id) {
            Some(stats) => CongestionReading {
                level: CongestionLevel::from_score(
                    stats.congestion_score,
                    &self.rules.level_thresholds,
                ),
                score: stats.congestion_score,
            },
            None => CongestionReading {
                level: CongestionLevel::Unknown,
                score: 0.0,
            },
        }
    }

    pub fn statistics(&self, road_id: RoadId) -> Option<RoadStatistics> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&road_id)
            .cloned()
    }

    pub fn all_statistics(&self) -> HashMap<RoadId, RoadStatistics> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pings per hour recorded on the road over the trailing `duration`.
    pub fn traffic_flow(&self, road_id: RoadId, duration: Duration) -> Result<f64, CoreError> {
        let window_hours = hours(duration);
        if window_hours <= 0.0 {
            return Ok(0.0);
        }
        let pings = self.pings.find_by_road(road_id, Utc::now() - duration)?;
        Ok(pings.len() as f64 / window_hours)
    }

    /// Naive linear extrapolation of the current score, capped at 1.
    pub fn predict(&self, road_id: RoadId, minutes: u32) -> f64 {
        let Some(stats) = self.statistics(road_id) else {
            return 0.0;
        };
        let factor = 1.0 + f64::from(minutes) * self.rules.prediction_growth_per_minute;
        (stats.congestion_score * factor).min(1.0)
    }

    /// Fixed ramp of `hours` values starting at the trend base.
    // TODO: build the series from recorded statistics once per-road history is retained.
    pub fn trend(&self, _road_id: RoadId, hours: usize) -> Vec<f64> {
        (0..hours)
            .map(|i| (self.rules.trend_base + i as f64 * self.rules.trend_step).min(1.0))
            .collect()
    }
}

fn road_statistics(road: &RoadSegment, pings: &[Ping]) -> RoadStatistics {
    let total: i64 = pings.iter().map(|ping| i64::from(ping.speed)).sum();
    let average_speed = if pings.is_empty() {
        0.0
    } else {
        total as f64 / pings.len() as f64
    };

    RoadStatistics {
        road_id: road.id,
        vehicle_count: pings.len(),
        average_speed,
        max_speed: road.max_speed,
        congestion_score: 0.0,
        last_update: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use chrono::DateTime;
    use std::sync::Mutex;

    struct Roads(Vec<RoadSegment>);

    impl RoadStore for Roads {
        fn list_all(&self) -> Result<Vec<RoadSegment>, StoreError> {
            Ok(self.0.clone())
        }

        fn get_by_id(&self, id: RoadId) -> Result<Option<RoadSegment>, StoreError> {
            Ok(self.0.iter().find(|road| road.id == id).cloned())
        }
    }

    #[derive(Default)]
    struct Pings {
        pings: Mutex<Vec<Ping>>,
        down: Mutex<bool>,
    }

    impl Pings {
        fn push(&self, ping: Ping) {
            self.pings.lock().unwrap().push(ping);
        }
    }

    impl PingStore for Pings {
        fn find_by_road(
            &self,
            road_id: RoadId,
            since: DateTime<Utc>,
        ) -> Result<Vec<Ping>, StoreError> {
            if *self.down.lock().unwrap() {
                return Err(StoreError::Unavailable("ping store offline".to_string()));
            }
            Ok(self
                .pings
                .lock()
                .unwrap()
                .iter()
                .filter(|ping| ping.road_id == Some(road_id) && ping.timestamp >= since)
                .cloned()
                .collect())
        }

        fn find_by_vehicle(&self, vehicle_id: &str, limit: usize) -> Result<Vec<Ping>, StoreError> {
            let mut found: Vec<Ping> = self
                .pings
                .lock()
                .unwrap()
                .iter()
                .filter(|ping| ping.vehicle_id == vehicle_id)
                .cloned()
                .collect();
            found.reverse();
            found.truncate(limit);
            Ok(found)
        }
    }

    fn road(id: RoadId, max_speed: i32, capacity: u32) -> RoadSegment {
        RoadSegment {
            id,
            name: format!("Road {id}"),
            start_lon: 116.30,
            start_lat: 39.90,
            end_lon: 116.40,
            end_lat: 39.90,
            max_speed,
            capacity,
            length_km: None,
            road_type: "urban".to_string(),
        }
    }

    fn engine(roads: Vec<RoadSegment>) -> (CongestionEngine, Arc<Pings>) {
        let pings = Arc::new(Pings::default());
        let engine = CongestionEngine::new(
            Arc::new(Roads(roads)),
            pings.clone(),
            CongestionRules::default(),
        );
        (engine, pings)
    }

    fn ping_on(road_id: RoadId, speed: i32, age_secs: i64) -> Ping {
        Ping::new("V1", 116.35, 39.90, speed, Utc::now() - Duration::seconds(age_secs))
            .with_road(road_id)
    }

    #[test]
    fn empty_window_scores_zero_and_keeps_no_stats() {
        let (engine, pings) = engine(vec![road(1, 60, 100)]);
        pings.push(ping_on(1, 30, 600));
        assert_eq!(engine.recompute(1), 0.0);
        assert_eq!(engine.try_recompute(1), Ok(None));
        assert!(engine.statistics(1).is_none());
        assert_eq!(engine.level(1).level, CongestionLevel::Unknown);
    }

    #[test]
    fn unknown_road_scores_zero() {
        let (engine, _) = engine(Vec::new());
        assert_eq!(engine.recompute(9), 0.0);
    }

    #[test]
    fn score_weights_speed_and_density() {
        let (engine, pings) = engine(vec![road(1, 60, 10)]);
        pings.push(ping_on(1, 30, 10));
        pings.push(ping_on(1, 30, 20));

        // 0.7 * (1 - 30/60) + 0.3 * (2/10)
        let score = engine.recompute(1);
        assert!((score - 0.41).abs() < 1e-9, "got {score}");

        let stats = engine.statistics(1).unwrap();
        assert_eq!(stats.vehicle_count, 2);
        assert_eq!(stats.average_speed, 30.0);
        assert_eq!(stats.max_speed, 60);
        assert_eq!(engine.level(1).level, CongestionLevel::Moderate);
    }

    #[test]
    fn stationary_traffic_is_fully_congested() {
        let (engine, pings) = engine(vec![road(1, 60, 100)]);
        pings.push(ping_on(1, 0, 5));
        assert_eq!(engine.recompute(1), 1.0);
        let reading = engine.level(1);
        assert_eq!(reading.level, CongestionLevel::Severe);
        assert_eq!(reading.level.description(), "severe congestion");
    }

    #[test]
    fn score_is_clamped() {
        let (engine, pings) = engine(vec![road(1, 60, 1), road(2, 60, 100)]);
        for _ in 0..5 {
            pings.push(ping_on(1, 10, 5));
        }
        assert_eq!(engine.recompute(1), 1.0);

        pings.push(ping_on(2, 120, 5));
        assert_eq!(engine.recompute(2), 0.0);
    }

    #[test]
    fn zero_capacity_and_limit_do_not_divide_by_zero() {
        let (engine, pings) = engine(vec![road(1, 0, 0)]);
        pings.push(ping_on(1, 40, 5));
        let score = engine.recompute(1);
        assert!((score - 0.3).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn failed_lookup_is_an_error_but_recompute_is_zero() {
        let (engine, pings) = engine(vec![road(1, 60, 100)]);
        pings.push(ping_on(1, 30, 5));
        assert!(engine.recompute(1) > 0.0);

        *pings.down.lock().unwrap() = true;
        assert!(engine.try_recompute(1).is_err());
        assert_eq!(engine.recompute(1), 0.0);
        // Previous statistics survive a failed recompute.
        assert!(engine.statistics(1).is_some());
    }

    #[test]
    fn level_cutoffs() {
        let thresholds = CongestionRules::default().level_thresholds;
        assert_eq!(CongestionLevel::from_score(0.0, &thresholds), CongestionLevel::Free);
        assert_eq!(CongestionLevel::from_score(0.2, &thresholds), CongestionLevel::Light);
        assert_eq!(CongestionLevel::from_score(0.59, &thresholds), CongestionLevel::Moderate);
        assert_eq!(CongestionLevel::from_score(0.6, &thresholds), CongestionLevel::Heavy);
        assert_eq!(CongestionLevel::from_score(0.8, &thresholds), CongestionLevel::Severe);
    }

    #[test]
    fn prediction_grows_linearly_and_caps() {
        let (engine, pings) = engine(vec![road(1, 60, 10)]);
        pings.push(ping_on(1, 30, 10));
        pings.push(ping_on(1, 30, 20));
        engine.recompute(1);

        assert!((engine.predict(1, 1) - 0.451).abs() < 1e-9);
        assert_eq!(engine.predict(1, 60), 1.0);
        assert_eq!(engine.predict(2, 5), 0.0);
    }

    #[test]
    fn flow_is_pings_per_hour() {
        let (engine, pings) = engine(vec![road(1, 60, 100)]);
        for age in [60, 600, 1200] {
            pings.push(ping_on(1, 40, age));
        }
        let flow = engine.traffic_flow(1, Duration::minutes(30)).unwrap();
        assert!((flow - 6.0).abs() < 1e-9);
        assert_eq!(engine.traffic_flow(1, Duration::zero()).unwrap(), 0.0);
    }

    #[test]
    fn trend_ramp_caps_at_one() {
        let (engine, _) = engine(Vec::new());
        let trend = engine.trend(1, 10);
        assert_eq!(trend.len(), 10);
        assert!((trend[0] - 0.3).abs() < 1e-9);
        assert!((trend[3] - 0.6).abs() < 1e-9);
        assert_eq!(trend[9], 1.0);
        assert!(engine.trend(1, 0).is_empty());
    }
}
