use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::models::TransitMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen address for the HTTP server (default: 0.0.0.0:3000)
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Batch schedule feed sync configuration
    #[serde(default)]
    pub schedule_sync: ScheduleSyncConfig,
    /// Flight status poll configuration
    #[serde(default)]
    pub flight_sync: FlightSyncConfig,
    /// Estimate-vs-schedule gap in seconds beyond which a leg counts as
    /// delayed (default: 120)
    #[serde(default = "Config::default_delay_threshold_secs")]
    pub delay_threshold_secs: u32,
    /// Departure board shaping
    #[serde(default)]
    pub board: BoardConfig,
    /// Transit mode -> category tag used to partition the record store
    #[serde(default = "Config::default_mode_categories")]
    pub mode_categories: HashMap<TransitMode, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
            cors_origins: Vec::new(),
            cors_permissive: false,
            schedule_sync: ScheduleSyncConfig::default(),
            flight_sync: FlightSyncConfig::default(),
            delay_threshold_secs: Self::default_delay_threshold_secs(),
            board: BoardConfig::default(),
            mode_categories: Self::default_mode_categories(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn default_bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }
    fn default_delay_threshold_secs() -> u32 {
        120
    }
    fn default_mode_categories() -> HashMap<TransitMode, String> {
        HashMap::from([
            (TransitMode::Flight, "airport".to_string()),
            (TransitMode::Train, "rail".to_string()),
            (TransitMode::Metro, "urban".to_string()),
            (TransitMode::Tram, "urban".to_string()),
            (TransitMode::Bus, "urban".to_string()),
        ])
    }
}

/// Configuration for the batch schedule feed sync
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSyncConfig {
    /// Whether the schedule sync loop runs at all (default: true)
    #[serde(default = "ScheduleSyncConfig::default_enabled")]
    pub enabled: bool,
    /// URL of the schedule ZIP feed. Empty disables the source.
    #[serde(default)]
    pub feed_url: String,
    /// Interval in seconds between schedule sync cycles (default: 900)
    #[serde(default = "ScheduleSyncConfig::default_interval_secs")]
    pub interval_secs: u64,
    /// How far ahead of now a first-stop departure may lie to be ingested
    /// (default: 6)
    #[serde(default = "ScheduleSyncConfig::default_lookahead_hours")]
    pub lookahead_hours: u32,
    /// Number of admitted trips materialized per group during the parse
    /// (default: 100)
    #[serde(default = "ScheduleSyncConfig::default_group_size")]
    pub group_size: usize,
}

impl Default for ScheduleSyncConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            feed_url: String::new(),
            interval_secs: Self::default_interval_secs(),
            lookahead_hours: Self::default_lookahead_hours(),
            group_size: Self::default_group_size(),
        }
    }
}

impl ScheduleSyncConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_interval_secs() -> u64 {
        900
    }
    fn default_lookahead_hours() -> u32 {
        6
    }
    fn default_group_size() -> usize {
        100
    }
}

/// Configuration for the flight status poll
#[derive(Debug, Clone, Deserialize)]
pub struct FlightSyncConfig {
    /// Whether the flight sync loop runs at all (default: false)
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the flight status API
    #[serde(default = "FlightSyncConfig::default_api_base")]
    pub api_base: String,
    /// API access key. Empty disables the source.
    #[serde(default)]
    pub access_key: String,
    /// IATA codes of the monitored departure airports
    #[serde(default)]
    pub airports: Vec<String>,
    /// Interval in seconds between flight poll cycles (default: 120)
    #[serde(default = "FlightSyncConfig::default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum concurrent requests to the flight API (default: 4)
    #[serde(default = "FlightSyncConfig::default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Maximum flights fetched per airport per cycle (default: 100)
    #[serde(default = "FlightSyncConfig::default_limit_per_airport")]
    pub limit_per_airport: u32,
}

impl Default for FlightSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: Self::default_api_base(),
            access_key: String::new(),
            airports: Vec::new(),
            interval_secs: Self::default_interval_secs(),
            max_concurrent_requests: Self::default_max_concurrent_requests(),
            limit_per_airport: Self::default_limit_per_airport(),
        }
    }
}

impl FlightSyncConfig {
    fn default_api_base() -> String {
        "https://api.aviationstack.com/v1".to_string()
    }
    fn default_interval_secs() -> u64 {
        120
    }
    fn default_max_concurrent_requests() -> usize {
        4
    }
    fn default_limit_per_airport() -> u32 {
        100
    }
}

/// Which freshness window the board applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Effective departure within [now - 24h, now + 24h]
    Absolute,
    /// Wall-clock wrap-around window of window_minutes ahead of now
    TimeOfDay,
}

/// Configuration for departure board shaping
#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    /// Flat result cap for modes without per-route fairness (default: 200)
    #[serde(default = "BoardConfig::default_flat_cap")]
    pub flat_cap: usize,
    /// Maximum legs per route for high-frequency modes (default: 5)
    #[serde(default = "BoardConfig::default_per_route_cap")]
    pub per_route_cap: usize,
    /// Modes that get the per-route cap instead of the flat cap
    #[serde(default = "BoardConfig::default_fairness_modes")]
    pub fairness_modes: Vec<TransitMode>,
    /// Freshness window semantics (default: absolute)
    #[serde(default = "BoardConfig::default_window")]
    pub window: WindowMode,
    /// Width of the time-of-day window in minutes (default: 480)
    #[serde(default = "BoardConfig::default_window_minutes")]
    pub window_minutes: u32,
    /// Legs with a scheduled departure older than this many hours are
    /// removed by the retention sweep (default: 48)
    #[serde(default = "BoardConfig::default_retention_hours")]
    pub retention_hours: u32,
    /// Interval in seconds between retention sweeps (default: 3600)
    #[serde(default = "BoardConfig::default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            flat_cap: Self::default_flat_cap(),
            per_route_cap: Self::default_per_route_cap(),
            fairness_modes: Self::default_fairness_modes(),
            window: Self::default_window(),
            window_minutes: Self::default_window_minutes(),
            retention_hours: Self::default_retention_hours(),
            housekeeping_interval_secs: Self::default_housekeeping_interval_secs(),
        }
    }
}

impl BoardConfig {
    fn default_flat_cap() -> usize {
        200
    }
    fn default_per_route_cap() -> usize {
        5
    }
    fn default_fairness_modes() -> Vec<TransitMode> {
        vec![TransitMode::Metro, TransitMode::Tram, TransitMode::Bus]
    }
    fn default_window() -> WindowMode {
        WindowMode::Absolute
    }
    fn default_window_minutes() -> u32 {
        480
    }
    fn default_retention_hours() -> u32 {
        48
    }
    fn default_housekeeping_interval_secs() -> u64 {
        3600
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_fills_every_default() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(config.cors_origins.is_empty());
        assert!(!config.cors_permissive);
        assert!(config.schedule_sync.enabled);
        assert_eq!(config.schedule_sync.interval_secs, 900);
        assert_eq!(config.schedule_sync.group_size, 100);
        assert!(!config.flight_sync.enabled);
        assert_eq!(config.flight_sync.max_concurrent_requests, 4);
        assert_eq!(config.delay_threshold_secs, 120);
        assert_eq!(config.board.flat_cap, 200);
        assert_eq!(config.board.per_route_cap, 5);
        assert_eq!(config.board.window, WindowMode::Absolute);
        assert_eq!(
            config.mode_categories.get(&TransitMode::Flight),
            Some(&"airport".to_string())
        );
        assert_eq!(
            config.mode_categories.get(&TransitMode::Tram),
            Some(&"urban".to_string())
        );
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = r#"
bind_addr: "127.0.0.1:8080"
cors_permissive: true
schedule_sync:
  feed_url: "https://example.org/schedule.zip"
  lookahead_hours: 2
flight_sync:
  enabled: true
  access_key: "k"
  airports: ["DUS"]
board:
  window: time_of_day
  window_minutes: 120
  fairness_modes: [bus]
mode_categories:
  flight: apron
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.schedule_sync.lookahead_hours, 2);
        assert!(config.flight_sync.enabled);
        assert_eq!(config.flight_sync.airports, vec!["DUS".to_string()]);
        assert_eq!(config.board.window, WindowMode::TimeOfDay);
        assert_eq!(config.board.fairness_modes, vec![TransitMode::Bus]);
        // A custom map replaces the default wholesale.
        assert_eq!(
            config.mode_categories.get(&TransitMode::Flight),
            Some(&"apron".to_string())
        );
        assert_eq!(config.mode_categories.get(&TransitMode::Train), None);
    }
}
