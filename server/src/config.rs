//! Server configuration.

use crate::maps::DEFAULT_MAP;
use shared::{KeyValue, MAX_COLORS, PROTOCOL_VERSION};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Port to listen on; 0 picks a free one.
    pub port: u16,
    pub max_clients: usize,
    pub maps_dir: PathBuf,
    /// Scenario loaded at startup.
    pub map_name: String,
    /// Seed for all match randomness. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Cadence of spreading hazards.
    pub hazard_interval: Duration,
    /// When false the match never ends on its own (sandbox mode).
    pub game_over_checks: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
            max_clients: 2 * MAX_COLORS as usize,
            maps_dir: PathBuf::from("maps"),
            map_name: DEFAULT_MAP.to_string(),
            seed: None,
            hazard_interval: Duration::from_secs(1),
            game_over_checks: true,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings advertised to clients in the roster.
    pub fn settings(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new("protocol_version", PROTOCOL_VERSION),
            KeyValue::new("max_clients", self.max_clients),
            KeyValue::new("hazard_interval_ms", self.hazard_interval.as_millis()),
            KeyValue::new("game_over_checks", self.game_over_checks),
        ]
    }
}
