//! Shared fleet store.
//!
//! Every node talks to the same key-value store. Records are flat string
//! hashes with a store-side TTL, so a node that stops writing simply ages out.
//!
//! Backends:
//! - In-memory (default, single process and tests)
//! - Redis (enable with the `redis` feature)
//!
//! ## Key layout
//!
//! | Key                       | Fields                                            | TTL  |
//! |---------------------------|---------------------------------------------------|------|
//! | `servers:<name>`          | name, status, players, maxPlayers, type, timestamp | 30s  |
//! | `sessions:<id>`           | gameId, server, state, players, timestamp          | 300s |
//! | `player:pending:<id>`     | action, data, timestamp                            | 60s  |
//!
//! Status changes are announced on the `servers:status` and `sessions:status`
//! channels. Delivery is advisory.

mod memory;

#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// A flat string hash as stored under one key.
pub type Record = HashMap<String, String>;

pub const SERVER_PREFIX: &str = "servers:";
pub const SESSION_PREFIX: &str = "sessions:";
pub const PENDING_PREFIX: &str = "player:pending:";

pub const SERVER_STATUS_CHANNEL: &str = "servers:status";
pub const SESSION_STATUS_CHANNEL: &str = "sessions:status";

pub fn server_key(name: &str) -> String {
    format!("{SERVER_PREFIX}{name}")
}

pub fn session_key(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

pub fn pending_key(participant: &str) -> String {
    format!("{PENDING_PREFIX}{participant}")
}

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Operations the fleet needs from the shared store.
///
/// Calls may block briefly on network I/O; callers on an async runtime run
/// them on the blocking pool.
pub trait FleetStore: Send + Sync {
    /// Replace the record at `key` and set its expiry.
    fn put(&self, key: &str, record: Record, ttl: Duration) -> Result<()>;

    /// Read a live record.
    fn get(&self, key: &str) -> Result<Option<Record>>;

    /// Delete a record. Returns whether one existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Read and delete a record in one atomic step.
    fn take(&self, key: &str) -> Result<Option<Record>>;

    /// All live records whose key starts with `prefix`, sorted by key.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>>;

    /// Fire a message on a channel. No delivery guarantee.
    fn publish(&self, channel: &str, message: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(server_key("hunt-1"), "servers:hunt-1");
        assert_eq!(session_key("abc"), "sessions:abc");
        assert_eq!(pending_key("p-7"), "player:pending:p-7");
    }
}
