//! Per-runner respawn allowance for one session.
//!
//! The ledger only answers whether a runner may respawn; acting on that is
//! up to the caller.

use std::collections::HashMap;

use crate::session::ParticipantId;

#[derive(Debug, Clone, Default)]
pub struct RespawnLedger {
    remaining: HashMap<ParticipantId, u32>,
}

impl RespawnLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, participant: impl Into<ParticipantId>, limit: u32) {
        self.remaining.insert(participant.into(), limit);
    }

    pub fn has_respawns(&self, participant: &str) -> bool {
        self.remaining(participant) > 0
    }

    /// Respawns left, 0 for unknown participants.
    pub fn remaining(&self, participant: &str) -> u32 {
        self.remaining.get(participant).copied().unwrap_or(0)
    }

    /// Use one respawn. Never goes below zero. Returns what is left.
    pub fn decrement(&mut self, participant: &str) -> u32 {
        match self.remaining.get_mut(participant) {
            Some(left) => {
                *left = left.saturating_sub(1);
                *left
            }
            None => 0,
        }
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.remaining.contains_key(participant)
    }

    pub fn remove(&mut self, participant: &str) -> Option<u32> {
        self.remaining.remove(participant)
    }

    pub fn clear(&mut self) {
        self.remaining.clear();
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}
