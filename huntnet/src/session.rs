//! Hunt session data model.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::respawn::RespawnLedger;
use crate::roles::{Role, RoleAssignment};
use crate::state::{SessionState, StateMachine, Transition, TransitionError};

/// Opaque, stable participant identifier.
pub type ParticipantId = String;

/// Session identifier (UUID string).
pub type SessionId = String;

/// Winning side of a finished match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerSide {
    Hunters,
    Runners,
}

impl fmt::Display for WinnerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WinnerSide::Hunters => "hunters",
            WinnerSide::Runners => "runners",
        })
    }
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Every runner was eliminated or left.
    RunnersEliminated,
    /// Runners completed the objective.
    ObjectiveCompleted,
    /// The match clock ran out.
    TimeUp,
    /// No hunters remain.
    HuntersLeft,
    /// Ended by an explicit `end` call with no end condition met.
    Forced,
}

impl EndReason {
    pub fn winner(&self) -> WinnerSide {
        match self {
            EndReason::RunnersEliminated => WinnerSide::Hunters,
            EndReason::ObjectiveCompleted
            | EndReason::TimeUp
            | EndReason::HuntersLeft
            | EndReason::Forced => WinnerSide::Runners,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub winner: WinnerSide,
    pub reason: EndReason,
    pub ended_at: i64,
}

/// What happened to a runner reported as caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elimination {
    /// The runner used a respawn and stays in play.
    Respawn { remaining: u32 },
    /// The runner is out and now spectates.
    Eliminated,
}

/// Cross-node view of a session, mirrored to `sessions:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub game_id: SessionId,
    pub server: String,
    pub state: SessionState,
    pub players: usize,
    pub timestamp: i64,
}

/// One hunt match instance.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Node hosting this session.
    pub node: String,
    /// World the session plays in, when a world integration is present.
    pub world: Option<String>,
    pub config: SessionConfig,
    pub created_at: i64,
    pub matching_ends_at: Option<i64>,
    pub prepare_ends_at: Option<i64>,
    pub started_at: Option<i64>,
    pub removal_at: Option<i64>,
    machine: StateMachine,
    waiting: Vec<ParticipantId>,
    hunters: Vec<ParticipantId>,
    runners: Vec<ParticipantId>,
    spectators: Vec<ParticipantId>,
    roles: HashMap<ParticipantId, Role>,
    respawns: RespawnLedger,
    objective_completed: bool,
    outcome: Option<MatchOutcome>,
}

impl Session {
    pub fn new(node: impl Into<String>, config: SessionConfig, now: i64) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), node, config, now)
    }

    pub fn with_id(
        id: impl Into<SessionId>,
        node: impl Into<String>,
        config: SessionConfig,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
            world: None,
            config,
            created_at: now,
            matching_ends_at: None,
            prepare_ends_at: None,
            started_at: None,
            removal_at: None,
            machine: StateMachine::new(),
            waiting: Vec::new(),
            hunters: Vec::new(),
            runners: Vec::new(),
            spectators: Vec::new(),
            roles: HashMap::new(),
            respawns: RespawnLedger::new(),
            objective_completed: false,
            outcome: None,
        }
    }

    // ==================== State ====================

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn transition_to(
        &mut self,
        target: SessionState,
    ) -> Result<Option<Transition>, TransitionError> {
        self.machine.transition_to(target)
    }

    /// Register a callback for entering `state`.
    pub fn on_enter<F>(&mut self, state: SessionState, callback: F)
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.machine.on_enter(state, callback);
    }

    pub fn is_joinable(&self) -> bool {
        self.machine.is_joinable()
    }

    pub fn is_playing(&self) -> bool {
        self.machine.is_playing()
    }

    pub fn is_running(&self) -> bool {
        self.machine.is_running()
    }

    pub fn is_ended(&self) -> bool {
        self.machine.is_ended()
    }

    // ==================== Membership ====================

    /// Active participants: the undifferentiated roster plus hunters and runners.
    pub fn player_count(&self) -> usize {
        self.waiting.len() + self.hunters.len() + self.runners.len()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.player_count() >= self.capacity()
    }

    pub fn has_minimum(&self) -> bool {
        self.player_count() >= self.config.min_players
    }

    pub fn is_empty(&self) -> bool {
        self.player_count() == 0 && self.spectators.is_empty()
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.waiting.iter().any(|p| p == participant) || self.roles.contains_key(participant)
    }

    /// Add to the roster awaiting role assignment.
    pub fn add_waiting(&mut self, participant: impl Into<ParticipantId>) -> bool {
        let participant = participant.into();
        if self.is_full() || self.contains(&participant) {
            return false;
        }
        self.waiting.push(participant);
        true
    }

    pub fn add_spectator(&mut self, participant: impl Into<ParticipantId>) -> bool {
        let participant = participant.into();
        if self.contains(&participant) {
            return false;
        }
        self.roles.insert(participant.clone(), Role::Spectator);
        self.spectators.push(participant);
        true
    }

    /// Drop a participant from every list, the role map and the ledger.
    pub fn remove_participant(&mut self, participant: &str) -> bool {
        let before = self.player_count() + self.spectators.len();
        self.waiting.retain(|p| p != participant);
        self.hunters.retain(|p| p != participant);
        self.runners.retain(|p| p != participant);
        self.spectators.retain(|p| p != participant);
        self.roles.remove(participant);
        self.respawns.remove(participant);
        before != self.player_count() + self.spectators.len()
    }

    /// Install a role assignment. The roster of waiting participants is consumed.
    pub fn apply_assignment(&mut self, assignment: RoleAssignment) {
        self.waiting.clear();
        self.respawns.clear();
        for hunter in &assignment.hunters {
            self.roles.insert(hunter.clone(), Role::Hunter);
        }
        for runner in &assignment.runners {
            self.roles.insert(runner.clone(), Role::Runner);
            self.respawns.seed(runner.clone(), self.config.respawn_limit);
        }
        self.hunters = assignment.hunters;
        self.runners = assignment.runners;
    }

    /// Handle a runner being caught. `None` if the participant is not a runner.
    pub fn eliminate(&mut self, participant: &str) -> Option<Elimination> {
        if self.roles.get(participant) != Some(&Role::Runner) {
            return None;
        }
        if self.respawns.has_respawns(participant) {
            let remaining = self.respawns.decrement(participant);
            return Some(Elimination::Respawn { remaining });
        }

        self.runners.retain(|p| p != participant);
        self.respawns.remove(participant);
        self.roles.insert(participant.to_string(), Role::Spectator);
        self.spectators.push(participant.to_string());
        Some(Elimination::Eliminated)
    }

    /// Empty the session for reuse. Returns everyone who was in it.
    pub fn reset(&mut self) -> Vec<ParticipantId> {
        let mut drained: Vec<ParticipantId> = self.waiting.drain(..).collect();
        drained.append(&mut self.hunters);
        drained.append(&mut self.runners);
        drained.append(&mut self.spectators);
        self.roles.clear();
        self.respawns.clear();
        self.objective_completed = false;
        self.outcome = None;
        self.matching_ends_at = None;
        self.prepare_ends_at = None;
        self.started_at = None;
        self.removal_at = None;
        drained
    }

    pub fn role_of(&self, participant: &str) -> Option<Role> {
        self.roles.get(participant).copied()
    }

    pub fn waiting(&self) -> &[ParticipantId] {
        &self.waiting
    }

    pub fn hunters(&self) -> &[ParticipantId] {
        &self.hunters
    }

    pub fn runners(&self) -> &[ParticipantId] {
        &self.runners
    }

    pub fn spectators(&self) -> &[ParticipantId] {
        &self.spectators
    }

    pub fn respawns(&self) -> &RespawnLedger {
        &self.respawns
    }

    /// Everyone in the session, spectators included.
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.waiting
            .iter()
            .chain(self.hunters.iter())
            .chain(self.runners.iter())
            .chain(self.spectators.iter())
    }

    // ==================== Outcome ====================

    pub fn complete_objective(&mut self) {
        self.objective_completed = true;
    }

    pub fn objective_completed(&self) -> bool {
        self.objective_completed
    }

    pub fn outcome(&self) -> Option<MatchOutcome> {
        self.outcome
    }

    pub(crate) fn set_outcome(&mut self, outcome: MatchOutcome) {
        self.outcome = Some(outcome);
    }

    pub fn info(&self, now: i64) -> SessionInfo {
        SessionInfo {
            game_id: self.id.clone(),
            server: self.node.clone(),
            state: self.state(),
            players: self.player_count(),
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            max_hunters: 1,
            max_runners: 2,
            respawn_limit: 1,
            ..Default::default()
        }
    }

    fn assigned(session: &mut Session) {
        session.apply_assignment(RoleAssignment {
            hunters: vec!["h".into()],
            runners: vec!["r1".into(), "r2".into()],
        });
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new("node-a", config(), 1_000);
        assert_eq!(session.state(), SessionState::Waiting);
        assert_eq!(session.player_count(), 0);
        assert_eq!(session.capacity(), 3);
        assert!(session.is_joinable());
    }

    #[test]
    fn test_capacity_and_duplicates() {
        let mut session = Session::new("node-a", config(), 0);
        assert!(session.add_waiting("a"));
        assert!(!session.add_waiting("a"));
        assert!(session.add_waiting("b"));
        assert!(session.add_waiting("c"));
        assert!(session.is_full());
        assert!(!session.add_waiting("d"));
    }

    #[test]
    fn test_assignment_keeps_lists_and_roles_consistent() {
        let mut session = Session::new("node-a", config(), 0);
        for p in ["h", "r1", "r2"] {
            session.add_waiting(p);
        }
        assigned(&mut session);

        assert!(session.waiting().is_empty());
        assert_eq!(session.role_of("h"), Some(Role::Hunter));
        assert_eq!(session.role_of("r1"), Some(Role::Runner));
        assert_eq!(session.respawns().remaining("r2"), 1);
        assert!(!session.respawns().contains("h"));
        assert_eq!(session.player_count(), 3);
    }

    #[test]
    fn test_eliminate_uses_respawn_then_spectates() {
        let mut session = Session::new("node-a", config(), 0);
        assigned(&mut session);

        assert_eq!(session.eliminate("r1"), Some(Elimination::Respawn { remaining: 0 }));
        assert_eq!(session.role_of("r1"), Some(Role::Runner));

        assert_eq!(session.eliminate("r1"), Some(Elimination::Eliminated));
        assert_eq!(session.role_of("r1"), Some(Role::Spectator));
        assert!(!session.runners().contains(&"r1".to_string()));
        assert!(session.spectators().contains(&"r1".to_string()));

        assert_eq!(session.eliminate("h"), None);
        assert_eq!(session.eliminate("r1"), None);
    }

    #[test]
    fn test_remove_participant_clears_everything() {
        let mut session = Session::new("node-a", config(), 0);
        assigned(&mut session);

        assert!(session.remove_participant("r2"));
        assert_eq!(session.role_of("r2"), None);
        assert!(!session.respawns().contains("r2"));
        assert!(!session.contains("r2"));
        assert!(!session.remove_participant("r2"));
    }

    #[test]
    fn test_reset_drains() {
        let mut session = Session::new("node-a", config(), 0);
        assigned(&mut session);
        session.complete_objective();

        let mut drained = session.reset();
        drained.sort();
        assert_eq!(drained, vec!["h", "r1", "r2"]);
        assert!(session.is_empty());
        assert!(!session.objective_completed());
    }

    #[test]
    fn test_end_reason_winner() {
        assert_eq!(EndReason::RunnersEliminated.winner(), WinnerSide::Hunters);
        assert_eq!(EndReason::TimeUp.winner(), WinnerSide::Runners);
        assert_eq!(EndReason::ObjectiveCompleted.winner(), WinnerSide::Runners);
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let mut session = Session::with_id("s-1", "node-a", config(), 0);
        session.add_waiting("a");
        let json = serde_json::to_value(session.info(42)).unwrap();
        assert_eq!(json["gameId"], "s-1");
        assert_eq!(json["server"], "node-a");
        assert_eq!(json["state"], "WAITING");
        assert_eq!(json["players"], 1);
    }
}
