//! Server configuration from environment.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use traffic_core::TrafficRules;

#[derive(Debug, Clone)]
pub struct Config {
    /// Monitor and simulation tick
    pub tick_ms: u64,
    /// Optional JSON file with `TrafficRules` overrides
    pub rules_path: Option<PathBuf>,
    pub sim_vehicles: usize,
    /// How long the in-memory ping store keeps pings
    pub ping_retention_secs: i64,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            rules_path: None,
            sim_vehicles: 6,
            ping_retention_secs: 3600,
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_ms: env::var("TRAFFIC_TICK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.tick_ms),
            rules_path: env::var("TRAFFIC_RULES_PATH").ok().map(PathBuf::from),
            sim_vehicles: env::var("TRAFFIC_SIM_VEHICLES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sim_vehicles),
            ping_retention_secs: env::var("TRAFFIC_PING_RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.ping_retention_secs),
            log_json: env::var("TRAFFIC_LOG_JSON")
                .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn ping_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ping_retention_secs)
    }

    /// Rules from `rules_path`, or the defaults when no file is configured.
    pub fn load_rules(&self) -> Result<TrafficRules> {
        match &self.rules_path {
            Some(path) => load_rules_file(path),
            None => Ok(TrafficRules::default()),
        }
    }
}

pub fn load_rules_file(path: &Path) -> Result<TrafficRules> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading rules file {}", path.display()))?;
    TrafficRules::from_json_str(&raw)
        .with_context(|| format!("parsing rules file {}", path.display()))
}
