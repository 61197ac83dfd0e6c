//! Session lifecycle states and the transition gate.
//!
//! ```text
//! WAITING ─► MATCHING ─► STARTING ─► PREPARING ─► PLAYING ─► ENDING ─► RESTARTING ─► WAITING
//!    │           └──────────────────────►┘
//!    └─► STARTING                (any) ─► DISABLED
//! ```
//!
//! Every change of a session's state goes through [`StateMachine::transition_to`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Waiting,
    Matching,
    Starting,
    Preparing,
    Playing,
    Ending,
    Restarting,
    Disabled,
}

impl SessionState {
    pub const ALL: [SessionState; 8] = [
        SessionState::Waiting,
        SessionState::Matching,
        SessionState::Starting,
        SessionState::Preparing,
        SessionState::Playing,
        SessionState::Ending,
        SessionState::Restarting,
        SessionState::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Waiting => "WAITING",
            SessionState::Matching => "MATCHING",
            SessionState::Starting => "STARTING",
            SessionState::Preparing => "PREPARING",
            SessionState::Playing => "PLAYING",
            SessionState::Ending => "ENDING",
            SessionState::Restarting => "RESTARTING",
            SessionState::Disabled => "DISABLED",
        }
    }

    /// States reachable from `self`, not counting `DISABLED`.
    pub fn allowed_targets(&self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Waiting => &[Matching, Starting, Restarting],
            Matching => &[Starting, Preparing, Waiting, Restarting],
            Starting => &[Preparing, Waiting, Restarting],
            Preparing => &[Playing, Waiting, Restarting],
            Playing => &[Ending],
            Ending => &[Restarting],
            Restarting => &[Waiting],
            Disabled => &[],
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown session state: {0}")]
pub struct UnknownState(pub String);

/// Whether `from → to` is a legal, state-changing transition.
pub fn can_transition(from: SessionState, to: SessionState) -> bool {
    if from == SessionState::Disabled {
        return false;
    }
    to == SessionState::Disabled || from.allowed_targets().contains(&to)
}

pub fn is_joinable(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::Waiting | SessionState::Matching | SessionState::Starting
    )
}

pub fn is_playing(state: SessionState) -> bool {
    state == SessionState::Playing
}

pub fn is_running(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::Starting | SessionState::Preparing | SessionState::Playing
    )
}

pub fn is_ended(state: SessionState) -> bool {
    matches!(state, SessionState::Ending | SessionState::Restarting)
}

/// Rejected transition. Nothing was mutated.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// A completed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

type EnterCallback = Box<dyn Fn(SessionState) + Send + Sync>;

/// Holds one session's state and guards every change against the table.
pub struct StateMachine {
    state: SessionState,
    on_enter: HashMap<SessionState, Vec<EnterCallback>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Waiting,
            on_enter: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Register a callback run after entering `state`; it receives the previous state.
    pub fn on_enter<F>(&mut self, state: SessionState, callback: F)
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.on_enter.entry(state).or_default().push(Box::new(callback));
    }

    /// Move to `target`.
    ///
    /// Returns `Ok(None)` when already there and `Ok(Some(_))` after a change.
    pub fn transition_to(
        &mut self,
        target: SessionState,
    ) -> Result<Option<Transition>, TransitionError> {
        let from = self.state;
        if target == from {
            return Ok(None);
        }
        if !can_transition(from, target) {
            return Err(TransitionError { from, to: target });
        }

        self.state = target;
        if let Some(callbacks) = self.on_enter.get(&target) {
            for callback in callbacks {
                callback(from);
            }
        }
        Ok(Some(Transition { from, to: target }))
    }

    /// Put the machine back to `WAITING` without consulting the table.
    pub fn force_reset(&mut self) {
        self.state = SessionState::Waiting;
    }

    pub fn is_joinable(&self) -> bool {
        is_joinable(self.state)
    }

    pub fn is_playing(&self) -> bool {
        is_playing(self.state)
    }

    pub fn is_running(&self) -> bool {
        is_running(self.state)
    }

    pub fn is_ended(&self) -> bool {
        is_ended(self.state)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("callbacks", &self.on_enter.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
