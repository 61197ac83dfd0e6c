//! Cross-node view of the sessions a node hosts.
//!
//! Entries under `sessions:<id>` are informational only. The owning node's
//! orchestrator is authoritative; the mirror lets other nodes see what exists.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::{SessionId, SessionInfo};
use crate::state::SessionState;
use crate::store::{self, FleetStore, Record, SESSION_PREFIX, SESSION_STATUS_CHANNEL};

/// Updates queued by the orchestrator actor beyond this are dropped.
pub const MIRROR_BUFFER: usize = 4096;

/// Work sent from the orchestrator actor to the mirror worker.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorUpdate {
    Upsert(SessionInfo),
    /// Announce that a session entered `state` on the status channel.
    Status {
        session_id: SessionId,
        state: SessionState,
        timestamp: i64,
    },
    Remove(SessionId),
}

fn to_fields(info: &SessionInfo) -> Record {
    Record::from([
        ("gameId".to_string(), info.game_id.clone()),
        ("server".to_string(), info.server.clone()),
        ("state".to_string(), info.state.to_string()),
        ("players".to_string(), info.players.to_string()),
        ("timestamp".to_string(), info.timestamp.to_string()),
    ])
}

fn from_fields(fields: &Record) -> Option<SessionInfo> {
    Some(SessionInfo {
        game_id: fields.get("gameId")?.clone(),
        server: fields.get("server")?.clone(),
        state: fields.get("state")?.parse::<SessionState>().ok()?,
        players: fields.get("players")?.parse().ok()?,
        timestamp: fields.get("timestamp")?.parse().ok()?,
    })
}

#[derive(Clone)]
pub struct SessionMirror {
    store: Arc<dyn FleetStore>,
    ttl: Duration,
}

impl SessionMirror {
    pub fn new(store: Arc<dyn FleetStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Apply one update. Failures are logged and dropped.
    pub fn apply(&self, update: &MirrorUpdate) {
        let result = match update {
            MirrorUpdate::Upsert(info) => {
                self.store
                    .put(&store::session_key(&info.game_id), to_fields(info), self.ttl)
            }
            MirrorUpdate::Status { session_id, state, timestamp } => {
                let message = format!("{session_id}:{state}:{timestamp}");
                self.store.publish(SESSION_STATUS_CHANNEL, &message)
            }
            MirrorUpdate::Remove(id) => self.store.delete(&store::session_key(id)).map(|_| ()),
        };
        if let Err(e) = result {
            warn!(error = %e, ?update, "session mirror update failed");
        }
    }

    /// Sessions currently visible in the store, from every node.
    pub fn list(&self) -> Vec<SessionInfo> {
        let entries = match self.store.scan(SESSION_PREFIX) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "session listing failed");
                return Vec::new();
            }
        };
        entries
            .iter()
            .filter_map(|(key, fields)| {
                let info = from_fields(fields);
                if info.is_none() {
                    warn!(%key, "skipping malformed session record");
                }
                info
            })
            .collect()
    }

    /// Drain updates until every sender is gone. Store I/O runs on the blocking pool.
    pub async fn run(self, mut rx: mpsc::Receiver<MirrorUpdate>) {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(next) = rx.try_recv() {
                batch.push(next);
            }

            let mirror = self.clone();
            let count = batch.len();
            if let Err(e) = tokio::task::spawn_blocking(move || {
                for update in &batch {
                    mirror.apply(update);
                }
            })
            .await
            {
                warn!(error = %e, "session mirror worker panicked");
            }
            debug!(count, "session mirror flushed");
        }
        debug!("session mirror stopped");
    }
}
