//! Cross-node hand-off of a participant's intent.
//!
//! A front node decides where a participant goes and what they meant to do
//! there, writes that intent under `player:pending:<id>`, and moves them. The
//! receiving node takes the entry exactly once. Entries that expire before
//! anyone takes them are dropped silently.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::store::{self, FleetStore, Record};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

pub const ACTION_CREATE: &str = "create";
pub const ACTION_JOIN: &str = "join";

/// Intent left for the node a participant is moving to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action: String,
    pub data: String,
    /// Epoch ms when the intent was written.
    pub timestamp: i64,
}

impl PendingAction {
    fn to_fields(&self) -> Record {
        Record::from([
            ("action".to_string(), self.action.clone()),
            ("data".to_string(), self.data.clone()),
            ("timestamp".to_string(), self.timestamp.to_string()),
        ])
    }

    fn from_fields(fields: &Record) -> Option<Self> {
        Some(Self {
            action: fields.get("action")?.clone(),
            data: fields.get("data").cloned().unwrap_or_default(),
            timestamp: fields
                .get("timestamp")
                .and_then(|t| t.parse().ok())
                .unwrap_or_default(),
        })
    }
}

/// Reads and writes pending actions.
#[derive(Clone)]
pub struct PendingActionRelay {
    store: Arc<dyn FleetStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl PendingActionRelay {
    pub fn new(store: Arc<dyn FleetStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            clock: Arc::new(SystemClock),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
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

    /// Leave an intent for `participant`, replacing any earlier one.
    pub fn set(&self, participant: &str, action: &str, data: &str) -> store::Result<()> {
        let pending = PendingAction {
            action: action.to_string(),
            data: data.to_string(),
            timestamp: self.clock.now_millis(),
        };
        self.store
            .put(&store::pending_key(participant), pending.to_fields(), self.ttl)?;

        #[cfg(feature = "metrics")]
        if let Some(ref m) = self.metrics {
            m.relay_sets_total.inc();
        }

        debug!(%participant, %action, "pending action stored");
        Ok(())
    }

    /// Consume the intent for `participant`. A second call returns `None`.
    pub fn take(&self, participant: &str) -> Option<PendingAction> {
        let fields = match self.store.take(&store::pending_key(participant)) {
            Ok(fields) => fields?,
            Err(e) => {
                warn!(%participant, error = %e, "pending action lookup failed");
                return None;
            }
        };

        let pending = PendingAction::from_fields(&fields);
        if pending.is_none() {
            warn!(%participant, "discarding malformed pending action");
        }

        #[cfg(feature = "metrics")]
        if let Some(ref m) = self.metrics {
            m.relay_takes_total.inc();
        }

        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn relay() -> (PendingActionRelay, MemoryStore, ManualClock) {
        let clock = ManualClock::new(42);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let relay = PendingActionRelay::new(Arc::new(store.clone()), Duration::from_secs(60))
            .with_clock(Arc::new(clock.clone()));
        (relay, store, clock)
    }

    #[test]
    fn test_take_once() {
        let (relay, _, _) = relay();
        relay.set("alice", ACTION_JOIN, "session-1").unwrap();

        let pending = relay.take("alice").unwrap();
        assert_eq!(pending.action, "join");
        assert_eq!(pending.data, "session-1");
        assert_eq!(pending.timestamp, 42);

        assert!(relay.take("alice").is_none());
    }

    #[test]
    fn test_missing_is_none() {
        let (relay, _, _) = relay();
        assert!(relay.take("nobody").is_none());
    }

    #[test]
    fn test_expires_after_ttl() {
        let (relay, _, clock) = relay();
        relay.set("bob", ACTION_CREATE, "").unwrap();
        clock.advance(Duration::from_secs(60));
        assert!(relay.take("bob").is_none());
    }

    #[test]
    fn test_overwrite() {
        let (relay, _, _) = relay();
        relay.set("carol", ACTION_CREATE, "").unwrap();
        relay.set("carol", ACTION_JOIN, "s-2").unwrap();
        assert_eq!(relay.take("carol").unwrap().data, "s-2");
    }

    #[test]
    fn test_store_down() {
        let (relay, store, _) = relay();
        relay.set("dave", ACTION_CREATE, "").unwrap();
        store.set_available(false);
        assert!(relay.take("dave").is_none());
        assert!(relay.set("dave", ACTION_CREATE, "").is_err());
    }
}
