//! Node registry and heartbeat.
//!
//! Each node keeps a `servers:<name>` record alive by rewriting it on a fixed
//! interval. The record carries a store-side TTL, so TTL expiry is the
//! liveness signal: a node that stops publishing disappears from [`NodeRegistry::list`]
//! without anyone telling the rest of the fleet.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, MIN_HEARTBEAT_INTERVAL_SECS};
use crate::store::{self, FleetStore, Record, SERVER_PREFIX, SERVER_STATUS_CHANNEL};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Advertised node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Accepting participants.
    Online,
    /// Up with nobody playing yet.
    Waiting,
    /// At capacity.
    Full,
    /// Finishing current sessions, not taking new ones.
    Draining,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "ONLINE",
            NodeStatus::Waiting => "WAITING",
            NodeStatus::Full => "FULL",
            NodeStatus::Draining => "DRAINING",
            NodeStatus::Offline => "OFFLINE",
        }
    }

    /// Whether a balancer may route new participants here.
    pub fn accepts_players(&self) -> bool {
        matches!(self, NodeStatus::Online | NodeStatus::Waiting)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(NodeStatus::Online),
            "WAITING" => Ok(NodeStatus::Waiting),
            "FULL" => Ok(NodeStatus::Full),
            "DRAINING" => Ok(NodeStatus::Draining),
            "OFFLINE" => Ok(NodeStatus::Offline),
            _ => Err(RecordError::Invalid {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// A registry record that could not be read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

/// One node as seen in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub name: String,
    pub status: NodeStatus,
    pub players: usize,
    pub max_players: usize,
    #[serde(rename = "type")]
    pub node_class: String,
    /// Epoch ms of the last heartbeat.
    pub timestamp: i64,
}

impl NodeRecord {
    pub fn free_slots(&self) -> usize {
        self.max_players.saturating_sub(self.players)
    }

    pub fn is_full(&self) -> bool {
        self.players >= self.max_players
    }

    pub fn to_fields(&self) -> Record {
        Record::from([
            ("name".to_string(), self.name.clone()),
            ("status".to_string(), self.status.to_string()),
            ("players".to_string(), self.players.to_string()),
            ("maxPlayers".to_string(), self.max_players.to_string()),
            ("type".to_string(), self.node_class.clone()),
            ("timestamp".to_string(), self.timestamp.to_string()),
        ])
    }

    pub fn from_fields(fields: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            name: field(fields, "name")?.to_string(),
            status: field(fields, "status")?.parse()?,
            players: parse_field(fields, "players")?,
            max_players: parse_field(fields, "maxPlayers")?,
            node_class: field(fields, "type")?.to_string(),
            timestamp: parse_field(fields, "timestamp")?,
        })
    }
}

fn field<'a>(fields: &'a Record, name: &'static str) -> Result<&'a str, RecordError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(RecordError::Missing(name))
}

fn parse_field<T: FromStr>(fields: &Record, name: &'static str) -> Result<T, RecordError> {
    let raw = field(fields, name)?;
    raw.trim().parse().map_err(|_| RecordError::Invalid {
        field: name,
        value: raw.to_string(),
    })
}

// ==================== Registry ====================

/// Reads and writes `servers:<name>` records.
///
/// Reads never fail: store errors are logged and come back as empty results,
/// and malformed records are skipped.
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn FleetStore>,
    ttl: Duration,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn FleetStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn publish(&self, record: &NodeRecord) -> store::Result<()> {
        self.store
            .put(&store::server_key(&record.name), record.to_fields(), self.ttl)
    }

    /// Best-effort delete. TTL expiry covers the case where this never runs.
    pub fn remove(&self, name: &str) -> bool {
        match self.store.delete(&store::server_key(name)) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(node = %name, error = %e, "failed to remove node record");
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<NodeRecord> {
        match self.store.get(&store::server_key(name)) {
            Ok(Some(fields)) => parse_record(name, &fields),
            Ok(None) => None,
            Err(e) => {
                warn!(node = %name, error = %e, "node lookup failed");
                None
            }
        }
    }

    /// Every live, well-formed node record.
    pub fn list(&self) -> Vec<NodeRecord> {
        let entries = match self.store.scan(SERVER_PREFIX) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "node listing failed");
                return Vec::new();
            }
        };
        entries
            .iter()
            .filter_map(|(key, fields)| parse_record(key, fields))
            .collect()
    }

    /// Announce a status change as `name:status:timestamp`.
    pub fn announce(&self, name: &str, status: NodeStatus, timestamp: i64) {
        let message = format!("{name}:{status}:{timestamp}");
        if let Err(e) = self.store.publish(SERVER_STATUS_CHANNEL, &message) {
            debug!(node = %name, error = %e, "status announcement dropped");
        }
    }
}

fn parse_record(key: &str, fields: &Record) -> Option<NodeRecord> {
    match NodeRecord::from_fields(fields) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(%key, error = %e, "skipping malformed node record");
            None
        }
    }
}

// ==================== Heartbeat ====================

/// Current load of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLoad {
    pub players: usize,
    pub max_players: usize,
    pub status: NodeStatus,
}

/// Reports the local node's load at heartbeat time.
pub type LoadSource = Arc<dyn Fn() -> NodeLoad + Send + Sync>;

/// Keeps this node's registry record alive.
pub struct HeartbeatPublisher {
    registry: NodeRegistry,
    name: String,
    node_class: String,
    interval: Duration,
    load: LoadSource,
    clock: Arc<dyn Clock>,
    last_status: Mutex<Option<NodeStatus>>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl HeartbeatPublisher {
    /// Fails when `interval` is below the heartbeat floor.
    pub fn new(
        registry: NodeRegistry,
        name: impl Into<String>,
        node_class: impl Into<String>,
        interval: Duration,
        load: LoadSource,
    ) -> Result<Self, ConfigError> {
        if interval < Duration::from_secs(MIN_HEARTBEAT_INTERVAL_SECS) {
            return Err(ConfigError::invalid(
                "heartbeat_interval",
                format!("{interval:?} is below the {MIN_HEARTBEAT_INTERVAL_SECS}s floor"),
            ));
        }
        Ok(Self {
            registry,
            name: name.into(),
            node_class: node_class.into(),
            interval,
            load,
            clock: Arc::new(SystemClock),
            last_status: Mutex::new(None),
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enable metrics recording.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Publish one record from the current load.
    pub fn beat(&self) -> store::Result<NodeRecord> {
        let load = (self.load)();
        let record = NodeRecord {
            name: self.name.clone(),
            status: load.status,
            players: load.players,
            max_players: load.max_players,
            node_class: self.node_class.clone(),
            timestamp: self.clock.now_millis(),
        };

        let result = self.registry.publish(&record);

        #[cfg(feature = "metrics")]
        if let Some(ref m) = self.metrics {
            if result.is_ok() {
                m.heartbeats_published_total.inc();
            } else {
                m.heartbeats_failed_total.inc();
            }
        }

        result?;

        let changed = self.last_status.lock().replace(record.status) != Some(record.status);
        if changed {
            self.registry
                .announce(&self.name, record.status, record.timestamp);
        }
        debug!(node = %self.name, players = record.players, status = %record.status, "heartbeat");
        Ok(record)
    }

    /// Delete this node's record. Best effort.
    pub fn deregister(&self) -> bool {
        let removed = self.registry.remove(&self.name);
        self.registry
            .announce(&self.name, NodeStatus::Offline, self.clock.now_millis());
        removed
    }

    /// Heartbeat until `shutdown` flips to true, then deregister.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(node = %self.name, interval = ?self.interval, "heartbeat started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let publisher = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || publisher.beat()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(node = %self.name, error = %e, "heartbeat failed"),
                        Err(e) => warn!(node = %self.name, error = %e, "heartbeat task panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let publisher = Arc::clone(&self);
        if let Err(e) = tokio::task::spawn_blocking(move || publisher.deregister()).await {
            warn!(node = %self.name, error = %e, "deregister task panicked");
        }
        info!(node = %self.name, "heartbeat stopped");
    }
}
