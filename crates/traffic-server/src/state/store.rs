//! Shared application state: the core components wired to their collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use traffic_core::{
    AlertEmitter, AlertSink, AnomalyEngine, CongestionEngine, CoreError, RoadMatcher,
    RoadSegment, SpeedMonitor, TrafficRules,
};

use super::memory::{MemoryAlertSink, MemoryPingStore, MemoryRoadStore};

pub struct AppState {
    pub roads: Arc<MemoryRoadStore>,
    pub pings: Arc<MemoryPingStore>,
    pub matcher: RoadMatcher,
    pub speed: SpeedMonitor,
    pub congestion: CongestionEngine,
    pub anomaly: AnomalyEngine,
    pub emitter: AlertEmitter,
    monitor_running: AtomicBool,
    simulation_running: AtomicBool,
}

impl AppState {
    pub fn new(rules: TrafficRules, ping_retention: Duration) -> Self {
        Self::with_sink(rules, ping_retention, Arc::new(MemoryAlertSink::new()))
    }

    pub fn with_sink(
        rules: TrafficRules,
        ping_retention: Duration,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let roads = Arc::new(MemoryRoadStore::new());
        let pings = Arc::new(MemoryPingStore::new(ping_retention));

        Self {
            matcher: RoadMatcher::new(roads.clone()),
            speed: SpeedMonitor::new(rules.speed),
            congestion: CongestionEngine::new(roads.clone(), pings.clone(), rules.congestion),
            anomaly: AnomalyEngine::new(rules.anomaly),
            emitter: AlertEmitter::new(sink),
            roads,
            pings,
            monitor_running: AtomicBool::new(false),
            simulation_running: AtomicBool::new(false),
        }
    }

    /// Store the segments and reload the matcher snapshot.
    pub fn seed_roads(&self, roads: Vec<RoadSegment>) -> Result<usize, CoreError> {
        for road in roads {
            self.roads.upsert(road);
        }
        self.matcher.reload()
    }

    /// Claim the monitor loop slot; `None` if a monitor is already running.
    pub fn claim_monitor(&self) -> Option<RunGuard<'_>> {
        RunGuard::claim(&self.monitor_running)
    }

    pub fn claim_simulation(&self) -> Option<RunGuard<'_>> {
        RunGuard::claim(&self.simulation_running)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor_running.load(Ordering::SeqCst)
    }

    pub fn is_simulating(&self) -> bool {
        self.simulation_running.load(Ordering::SeqCst)
    }
}

/// Holds a single-instance flag for as long as a loop runs.
pub struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
