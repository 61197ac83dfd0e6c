//! Session and node configuration.
//!
//! Configuration is validated once when it is built. Out-of-range values are
//! rejected with a [`ConfigError`] instead of being clamped.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum heartbeat interval accepted for a node.
pub const MIN_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "HUNTNET_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Rules for one hunt session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Most hunters a session will hold.
    pub max_hunters: usize,
    /// Most runners a session will hold.
    pub max_runners: usize,
    /// Participants needed before the session may start.
    pub min_players: usize,
    /// Share of the roster that becomes runners, in (0, 1].
    pub runner_ratio: f64,
    /// Respawns each runner starts with. May be zero.
    pub respawn_limit: u32,
    /// Seconds between role assignment and the hunt starting.
    pub prepare_secs: u64,
    /// Maximum match length in seconds, 0 for unlimited.
    pub match_timeout_secs: u64,
    /// Seconds a session waits in MATCHING for more joins.
    pub matching_timeout_secs: u64,
    /// Seconds between a match ending and the session being recycled.
    pub end_grace_secs: u64,
    /// Reuse the session after it ends instead of removing it.
    pub recycle: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_hunters: 2,
            max_runners: 8,
            min_players: 2,
            runner_ratio: 0.75,
            respawn_limit: 1,
            prepare_secs: 30,
            match_timeout_secs: 600,
            matching_timeout_secs: 30,
            end_grace_secs: 10,
            recycle: true,
        }
    }
}

impl SessionConfig {
    /// Total participants a session can hold.
    pub fn capacity(&self) -> usize {
        self.max_hunters + self.max_runners
    }

    pub fn prepare_duration(&self) -> Duration {
        Duration::from_secs(self.prepare_secs)
    }

    pub fn match_timeout(&self) -> Option<Duration> {
        (self.match_timeout_secs > 0).then(|| Duration::from_secs(self.match_timeout_secs))
    }

    pub fn matching_timeout(&self) -> Duration {
        Duration::from_secs(self.matching_timeout_secs)
    }

    pub fn end_grace(&self) -> Duration {
        Duration::from_secs(self.end_grace_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_hunters == 0 {
            return Err(ConfigError::invalid("max_hunters", "must be at least 1"));
        }
        if self.max_runners == 0 {
            return Err(ConfigError::invalid("max_runners", "must be at least 1"));
        }
        if self.min_players < 2 {
            return Err(ConfigError::invalid(
                "min_players",
                format!("{} is below 2", self.min_players),
            ));
        }
        if self.min_players > self.capacity() {
            return Err(ConfigError::invalid(
                "min_players",
                format!("{} exceeds capacity {}", self.min_players, self.capacity()),
            ));
        }
        if !self.runner_ratio.is_finite() || self.runner_ratio <= 0.0 || self.runner_ratio > 1.0 {
            return Err(ConfigError::invalid(
                "runner_ratio",
                format!("{} is outside (0, 1]", self.runner_ratio),
            ));
        }
        Ok(())
    }
}

/// Settings for one worker node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name; also the registry key suffix.
    pub name: String,
    /// Node class advertised in the registry.
    pub node_class: String,
    /// Participants this node will host.
    pub capacity: usize,
    /// Orchestrator tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// Seconds between heartbeats.
    pub heartbeat_interval_secs: u64,
    /// TTL of the node's registry record.
    pub registry_ttl_secs: u64,
    /// Records older than this are ignored by the load balancer.
    pub stale_after_secs: u64,
    /// TTL of pending actions.
    pub relay_ttl_secs: u64,
    /// TTL of the session mirror entries.
    pub mirror_ttl_secs: u64,
    /// Shared store URL. `None` runs on an in-process store.
    pub store_url: Option<String>,
    /// Maximum pooled store connections.
    pub pool_max: usize,
    /// Store round-trip timeout in milliseconds.
    pub store_timeout_ms: u64,
    /// Log filter, e.g. "info" or "huntnet=debug".
    pub log_level: String,
    /// Emit logs as JSON.
    pub json_logs: bool,
    /// Rules for sessions created on this node.
    pub session: SessionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "hunt-1".into(),
            node_class: "hunt".into(),
            capacity: 100,
            tick_interval_ms: 1_000,
            heartbeat_interval_secs: 10,
            registry_ttl_secs: 30,
            stale_after_secs: 60,
            relay_ttl_secs: 60,
            mirror_ttl_secs: 300,
            store_url: None,
            pool_max: 16,
            store_timeout_ms: 500,
            log_level: "info".into(),
            json_logs: false,
            session: SessionConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from `HUNTNET_CONFIG` (if set), apply `HUNTNET_*` overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("HUNTNET_NODE_NAME") {
            self.name = name;
        }
        if let Some(class) = lookup("HUNTNET_NODE_CLASS") {
            self.node_class = class;
        }
        if let Some(raw) = lookup("HUNTNET_CAPACITY") {
            self.capacity = raw.parse().map_err(|_| ConfigError::Env {
                var: "HUNTNET_CAPACITY",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("HUNTNET_HEARTBEAT_SECS") {
            self.heartbeat_interval_secs = raw.parse().map_err(|_| ConfigError::Env {
                var: "HUNTNET_HEARTBEAT_SECS",
                value: raw.clone(),
            })?;
        }
        if let Some(url) = lookup("HUNTNET_STORE_URL") {
            self.store_url = Some(url);
        }
        if let Some(level) = lookup("HUNTNET_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("tick_interval_ms", "must be at least 1"));
        }
        if self.heartbeat_interval_secs < MIN_HEARTBEAT_INTERVAL_SECS {
            return Err(ConfigError::invalid(
                "heartbeat_interval_secs",
                format!(
                    "{} is below the {}s floor",
                    self.heartbeat_interval_secs, MIN_HEARTBEAT_INTERVAL_SECS
                ),
            ));
        }
        if self.heartbeat_interval_secs >= self.registry_ttl_secs {
            return Err(ConfigError::invalid(
                "heartbeat_interval_secs",
                format!(
                    "{} must be shorter than registry_ttl_secs {}",
                    self.heartbeat_interval_secs, self.registry_ttl_secs
                ),
            ));
        }
        if self.stale_after_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::invalid(
                "stale_after_secs",
                format!(
                    "{} must be longer than heartbeat_interval_secs {}",
                    self.stale_after_secs, self.heartbeat_interval_secs
                ),
            ));
        }
        if self.relay_ttl_secs == 0 || self.mirror_ttl_secs == 0 {
            return Err(ConfigError::invalid("ttl", "TTLs must be at least 1 second"));
        }
        if self.pool_max == 0 {
            return Err(ConfigError::invalid("pool_max", "must be at least 1"));
        }
        self.session.validate()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn relay_ttl(&self) -> Duration {
        Duration::from_secs(self.relay_ttl_secs)
    }

    pub fn mirror_ttl(&self) -> Duration {
        Duration::from_secs(self.mirror_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
