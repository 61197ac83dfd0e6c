//! Session orchestration.
//!
//! The [`SessionOrchestrator`] owns every live session on a node and drives
//! them through their lifecycle from a fixed-rate [`tick`](SessionOrchestrator::tick).
//! All methods take `&mut self`: the orchestrator has exactly one owner (the
//! node's tick task) and everything else reaches it through messages, so no
//! session state is ever locked.
//!
//! Phase timers are absolute deadlines compared against "now" on every tick.
//! A missed tick only delays a check, and a forced transition cancels any
//! pending deadline because the tick logic is gated on the current state.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{deadline, Clock, SystemClock};
use crate::config::{ConfigError, SessionConfig};
use crate::hooks::{DisabledWorlds, HookResult, NoopHooks, Phase, SessionHooks, WorldProvider};
use crate::roles::{Role, RoleAssigner, RoleError};
use crate::session::{
    Elimination, EndReason, MatchOutcome, ParticipantId, Session, SessionId, SessionInfo,
};
use crate::state::{is_joinable, SessionState, Transition, TransitionError};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Orchestrator errors. A failed call leaves every session untouched.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("participant {participant} already in session {session}")]
    AlreadyInSession {
        participant: ParticipantId,
        session: SessionId,
    },

    #[error("participant not in a session: {0}")]
    NotInSession(ParticipantId),

    #[error("session {session} is not joinable in state {state}")]
    NotJoinable {
        session: SessionId,
        state: SessionState,
    },

    #[error("session {session} is full ({capacity} players)")]
    Full { session: SessionId, capacity: usize },

    #[error("not enough participants: {have}/{need}")]
    NotEnoughParticipants { have: usize, need: usize },

    #[error("session {session} is not playing (state {state})")]
    NotPlaying {
        session: SessionId,
        state: SessionState,
    },

    #[error("participant is not a runner: {0}")]
    NotARunner(ParticipantId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Roles(#[from] RoleError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Every state change made during this tick, in order.
    pub changes: Vec<(SessionId, Transition)>,
    /// Matches that ended during this tick.
    pub ended: Vec<(SessionId, MatchOutcome)>,
    /// Sessions deregistered during this tick.
    pub removed: Vec<SessionId>,
    /// State of every session still registered after the tick.
    pub snapshots: Vec<SessionInfo>,
}

/// Owns the sessions hosted by one node.
pub struct SessionOrchestrator {
    node: String,
    default_config: SessionConfig,
    sessions: HashMap<SessionId, Session>,
    membership: HashMap<ParticipantId, SessionId>,
    /// Transitions not yet handed out by `take_transitions`.
    transitions: Vec<(SessionId, Transition)>,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn SessionHooks>,
    worlds: Arc<dyn WorldProvider>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl SessionOrchestrator {
    /// Orchestrator on the system clock with no collaborators attached.
    pub fn new(node: impl Into<String>, default_config: SessionConfig) -> Result<Self> {
        Self::with_parts(
            node,
            default_config,
            Arc::new(SystemClock),
            Arc::new(NoopHooks),
            Arc::new(DisabledWorlds),
        )
    }

    pub fn with_parts(
        node: impl Into<String>,
        default_config: SessionConfig,
        clock: Arc<dyn Clock>,
        hooks: Arc<dyn SessionHooks>,
        worlds: Arc<dyn WorldProvider>,
    ) -> Result<Self> {
        default_config.validate()?;
        Ok(Self {
            node: node.into(),
            default_config,
            sessions: HashMap::new(),
            membership: HashMap::new(),
            transitions: Vec::new(),
            clock,
            hooks,
            worlds,
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }

    /// Enable metrics recording.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // ==================== Lookup ====================

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn session_of(&self, participant: &str) -> Option<&SessionId> {
        self.membership.get(participant)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Participants placed in a session on this node, spectators included.
    pub fn participant_count(&self) -> usize {
        self.membership.len()
    }

    /// Drain the transitions made since the last call, commands and ticks alike.
    pub fn take_transitions(&mut self) -> Vec<(SessionId, Transition)> {
        std::mem::take(&mut self.transitions)
    }

    pub fn snapshot(&self, now: i64) -> Vec<SessionInfo> {
        let mut infos: Vec<_> = self.sessions.values().map(|s| s.info(now)).collect();
        infos.sort_by(|a, b| a.game_id.cmp(&b.game_id));
        infos
    }

    // ==================== Lifecycle ====================

    /// Create an empty session in `WAITING`.
    pub fn create_session(&mut self, config: SessionConfig) -> Result<SessionId> {
        config.validate()?;
        let now = self.now();
        let mut session = Session::new(self.node.clone(), config, now);
        if self.worlds.enabled() {
            session.world = self.worlds.prepare_world(&session.id);
        }

        let id = session.id.clone();
        for state in SessionState::ALL {
            let session_id = id.clone();
            session.on_enter(state, move |prev| {
                debug!(%session_id, from = %prev, to = %state, "session state changed");
            });
        }
        self.sessions.insert(id.clone(), session);

        #[cfg(feature = "metrics")]
        if let Some(ref m) = self.metrics {
            m.sessions_created_total.inc();
        }

        info!(session_id = %id, node = %self.node, "session created");
        Ok(id)
    }

    pub fn create_default_session(&mut self) -> Result<SessionId> {
        self.create_session(self.default_config.clone())
    }

    /// Place a participant in a joinable session.
    pub fn join(&mut self, participant: &str, session_id: &str) -> Result<()> {
        let now = self.now();
        let result = self.try_join(participant, session_id, now);
        if let Err(ref e) = result {
            warn!(%participant, %session_id, error = %e, "join rejected");
        }
        result
    }

    fn try_join(&mut self, participant: &str, session_id: &str, now: i64) -> Result<()> {
        if let Some(existing) = self.membership.get(participant) {
            return Err(SessionError::AlreadyInSession {
                participant: participant.to_string(),
                session: existing.clone(),
            });
        }

        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.is_joinable() {
            return Err(SessionError::NotJoinable {
                session: session_id.to_string(),
                state: session.state(),
            });
        }
        if !session.add_waiting(participant) {
            return Err(SessionError::Full {
                session: session_id.to_string(),
                capacity: session.capacity(),
            });
        }
        self.membership
            .insert(participant.to_string(), session_id.to_string());

        report_hook(
            self.hooks.teleport_to_phase_location(participant, Phase::Lobby),
            session_id,
            "teleport_to_phase_location",
        );

        if session.state() == SessionState::Waiting && session.has_minimum() {
            step(session, SessionState::Matching, &mut self.transitions)?;
            session.matching_ends_at = Some(deadline(now, session.config.matching_timeout()));
            info!(%session_id, players = session.player_count(), "session matching");
        }

        debug!(%participant, %session_id, players = session.player_count(), "participant joined");
        Ok(())
    }

    /// Join the fullest open session, creating one when none has room.
    pub fn join_any(&mut self, participant: &str) -> Result<SessionId> {
        let mut open: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| s.is_joinable() && !s.is_full())
            .collect();
        open.sort_by(|a, b| {
            b.player_count()
                .cmp(&a.player_count())
                .then_with(|| a.id.cmp(&b.id))
        });

        let session_id = match open.first() {
            Some(session) => session.id.clone(),
            None => self.create_default_session()?,
        };
        self.join(participant, &session_id)?;
        Ok(session_id)
    }

    /// Watch a running session without taking part.
    pub fn spectate(&mut self, participant: &str, session_id: &str) -> Result<()> {
        if let Some(existing) = self.membership.get(participant) {
            return Err(SessionError::AlreadyInSession {
                participant: participant.to_string(),
                session: existing.clone(),
            });
        }
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.is_running() {
            return Err(SessionError::NotPlaying {
                session: session_id.to_string(),
                state: session.state(),
            });
        }

        session.add_spectator(participant);
        self.membership
            .insert(participant.to_string(), session_id.to_string());
        report_hook(
            self.hooks.teleport_to_phase_location(participant, Phase::Play),
            session_id,
            "teleport_to_phase_location",
        );
        Ok(())
    }

    /// Remove a participant from whatever session holds them.
    pub fn leave(&mut self, participant: &str) -> Result<SessionId> {
        let now = self.now();
        let session_id = self
            .membership
            .remove(participant)
            .ok_or_else(|| SessionError::NotInSession(participant.to_string()))?;

        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Ok(session_id);
        };
        let state = session.state();
        session.remove_participant(participant);
        debug!(%participant, %session_id, %state, "participant left");

        match state {
            SessionState::Playing => {
                self.check_end(&session_id, now)?;
            }
            // MATCHING keeps its deadline; the tick reverts it if the minimum is not back in time.
            SessionState::Starting if !session.has_minimum() => {
                step(session, SessionState::Waiting, &mut self.transitions)?;
                session.matching_ends_at = None;
                info!(%session_id, players = session.player_count(), "session back to waiting");
            }
            _ => {}
        }
        Ok(session_id)
    }

    /// Assign roles and move the session into `PREPARING`.
    pub fn start(&mut self, session_id: &str) -> Result<()> {
        let now = self.now();
        self.start_at(session_id, now)
    }

    fn start_at(&mut self, session_id: &str, now: i64) -> Result<()> {
        let result = self.try_start(session_id, now);
        if let Err(ref e) = result {
            warn!(%session_id, error = %e, "start rejected");
        }
        result
    }

    fn try_start(&mut self, session_id: &str, now: i64) -> Result<()> {
        let hooks = Arc::clone(&self.hooks);
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let state = session.state();
        if !is_joinable(state) {
            return Err(SessionError::NotJoinable {
                session: session_id.to_string(),
                state,
            });
        }
        if !session.has_minimum() {
            return Err(SessionError::NotEnoughParticipants {
                have: session.player_count(),
                need: session.config.min_players,
            });
        }

        let assigner = RoleAssigner::new(session.config.max_runners, session.config.runner_ratio);
        let assignment = assigner.assign(session.waiting())?;

        // Every joinable state may enter STARTING, and STARTING may always prepare.
        step(session, SessionState::Starting, &mut self.transitions)?;
        step(session, SessionState::Preparing, &mut self.transitions)?;
        session.apply_assignment(assignment);
        session.matching_ends_at = None;
        session.prepare_ends_at = Some(deadline(now, session.config.prepare_duration()));

        for (participant, role) in session
            .hunters()
            .iter()
            .map(|p| (p, Role::Hunter))
            .chain(session.runners().iter().map(|p| (p, Role::Runner)))
        {
            report_hook(hooks.notify_role_assigned(participant, role), session_id, "notify_role_assigned");
            report_hook(hooks.grant_role_equipment(participant, role), session_id, "grant_role_equipment");
            report_hook(
                hooks.teleport_to_phase_location(participant, Phase::Prepare),
                session_id,
                "teleport_to_phase_location",
            );
        }

        info!(
            %session_id,
            hunters = session.hunters().len(),
            runners = session.runners().len(),
            "session preparing"
        );
        Ok(())
    }

    /// End a playing match. The winner follows from the first end condition
    /// that holds, or runners by default when none does.
    pub fn end(&mut self, session_id: &str) -> Result<MatchOutcome> {
        let now = self.now();
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.is_playing() {
            let e = SessionError::NotPlaying {
                session: session_id.to_string(),
                state: session.state(),
            };
            warn!(%session_id, error = %e, "end rejected");
            return Err(e);
        }
        let reason = end_condition(session, now).unwrap_or(EndReason::Forced);
        self.end_with(session_id, reason, now)
    }

    fn end_with(&mut self, session_id: &str, reason: EndReason, now: i64) -> Result<MatchOutcome> {
        let hooks = Arc::clone(&self.hooks);
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        step(session, SessionState::Ending, &mut self.transitions)?;
        let outcome = MatchOutcome {
            winner: reason.winner(),
            reason,
            ended_at: now,
        };
        session.set_outcome(outcome);
        session.removal_at = Some(deadline(now, session.config.end_grace()));

        for participant in session.participants() {
            report_hook(
                hooks.teleport_to_phase_location(participant, Phase::End),
                session_id,
                "teleport_to_phase_location",
            );
        }
        report_hook(hooks.payout_result(session, outcome.winner), session_id, "payout_result");

        #[cfg(feature = "metrics")]
        if let Some(ref m) = self.metrics {
            m.sessions_ended_total
                .with_label_values(&[outcome.winner.to_string().as_str()])
                .inc();
        }

        info!(%session_id, winner = %outcome.winner, reason = ?outcome.reason, "session ended");
        Ok(outcome)
    }

    /// End the match if any end condition holds.
    fn check_end(&mut self, session_id: &str, now: i64) -> Result<Option<MatchOutcome>> {
        let reason = match self.sessions.get(session_id) {
            Some(session) if session.is_playing() => end_condition(session, now),
            _ => None,
        };
        match reason {
            Some(reason) => self.end_with(session_id, reason, now).map(Some),
            None => Ok(None),
        }
    }

    /// Report a caught runner.
    pub fn eliminate_runner(&mut self, participant: &str) -> Result<Elimination> {
        let session_id = self
            .membership
            .get(participant)
            .ok_or_else(|| SessionError::NotInSession(participant.to_string()))?;
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        if !session.is_playing() {
            return Err(SessionError::NotPlaying {
                session: session_id.clone(),
                state: session.state(),
            });
        }

        let outcome = session
            .eliminate(participant)
            .ok_or_else(|| SessionError::NotARunner(participant.to_string()))?;
        debug!(%participant, %session_id, ?outcome, "runner caught");
        Ok(outcome)
    }

    /// Mark the runners' objective as completed.
    pub fn complete_objective(&mut self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.is_playing() {
            return Err(SessionError::NotPlaying {
                session: session_id.to_string(),
                state: session.state(),
            });
        }
        session.complete_objective();
        Ok(())
    }

    /// Take a session out of service. It is deregistered on the next tick.
    pub fn disable(&mut self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        step(session, SessionState::Disabled, &mut self.transitions)?;
        for participant in session.reset() {
            self.membership.remove(&participant);
        }
        warn!(%session_id, "session disabled");
        Ok(())
    }

    // ==================== Tick ====================

    /// Run one tick against the orchestrator's clock.
    pub fn tick(&mut self) -> TickReport {
        let now = self.now();
        self.tick_at(now)
    }

    /// Run one tick at `now` (epoch ms).
    pub fn tick_at(&mut self, now: i64) -> TickReport {
        let mut report = TickReport::default();
        let mut ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        ids.sort();

        let mark = self.transitions.len();

        for id in ids {
            if let Err(e) = self.advance(&id, now, &mut report) {
                warn!(session_id = %id, error = %e, "tick step failed");
            }

            if let Some(session) = self.sessions.get(&id) {
                report_hook(self.hooks.render_session_status(session), &id, "render_session_status");
                report.snapshots.push(session.info(now));
            }
        }

        report.changes = self.transitions[mark..].to_vec();

        #[cfg(feature = "metrics")]
        self.record_states();

        report
    }

    fn advance(&mut self, id: &str, now: i64, report: &mut TickReport) -> Result<()> {
        let Some(session) = self.sessions.get_mut(id) else {
            return Ok(());
        };

        if session.state() == SessionState::Matching {
            let expired = session.matching_ends_at.map_or(true, |at| now >= at);
            if session.is_full() || (expired && session.has_minimum()) {
                self.start_at(id, now)?;
            } else if expired {
                step(session, SessionState::Waiting, &mut self.transitions)?;
                session.matching_ends_at = None;
                info!(session_id = %id, "matching timed out below minimum");
            }
        }

        let Some(session) = self.sessions.get_mut(id) else {
            return Ok(());
        };
        if session.state() == SessionState::Preparing
            && session.prepare_ends_at.map_or(true, |at| now >= at)
        {
            step(session, SessionState::Playing, &mut self.transitions)?;
            session.started_at = Some(now);
            for participant in session.hunters().iter().chain(session.runners()) {
                report_hook(
                    self.hooks.teleport_to_phase_location(participant, Phase::Play),
                    id,
                    "teleport_to_phase_location",
                );
            }
            info!(session_id = %id, "session playing");
        }

        if let Some(outcome) = self.check_end(id, now)? {
            report.ended.push((id.to_string(), outcome));
        }

        let Some(session) = self.sessions.get_mut(id) else {
            return Ok(());
        };
        match session.state() {
            SessionState::Ending if session.removal_at.map_or(true, |at| now >= at) => {
                self.recycle(id, report)?;
            }
            SessionState::Disabled => {
                self.deregister(id, report);
            }
            _ => {}
        }
        Ok(())
    }

    /// Move an ended session through `RESTARTING`, then reuse or drop it.
    fn recycle(&mut self, id: &str, report: &mut TickReport) -> Result<()> {
        let Some(session) = self.sessions.get_mut(id) else {
            return Ok(());
        };
        step(session, SessionState::Restarting, &mut self.transitions)?;
        let drained = session.reset();
        let reuse = session.config.recycle;

        for participant in &drained {
            if self.membership.get(participant).map(String::as_str) == Some(id) {
                self.membership.remove(participant);
            }
            report_hook(
                self.hooks.teleport_to_phase_location(participant, Phase::Lobby),
                id,
                "teleport_to_phase_location",
            );
        }

        if reuse {
            if let Some(session) = self.sessions.get_mut(id) {
                step(session, SessionState::Waiting, &mut self.transitions)?;
            }
            info!(session_id = %id, released = drained.len(), "session recycled");
        } else {
            self.deregister(id, report);
        }
        Ok(())
    }

    fn deregister(&mut self, id: &str, report: &mut TickReport) {
        if let Some(session) = self.sessions.remove(id) {
            for participant in session.participants() {
                self.membership.remove(participant);
            }
            if let Some(world) = session.world.as_deref() {
                self.worlds.release_world(world);
            }
            report.removed.push(id.to_string());
            info!(session_id = %id, "session removed");
        }
    }

    #[cfg(feature = "metrics")]
    fn record_states(&self) {
        if let Some(ref m) = self.metrics {
            for state in SessionState::ALL {
                let count = self.sessions.values().filter(|s| s.state() == state).count();
                m.update_session_state(state.as_str(), count as i64);
            }
            m.participants.set(self.membership.len() as i64);
        }
    }
}

/// First end condition that holds for a playing session.
fn end_condition(session: &Session, now: i64) -> Option<EndReason> {
    if session.runners().is_empty() {
        return Some(EndReason::RunnersEliminated);
    }
    if session.objective_completed() {
        return Some(EndReason::ObjectiveCompleted);
    }
    if let (Some(limit), Some(started)) = (session.config.match_timeout(), session.started_at) {
        if now >= deadline(started, limit) {
            return Some(EndReason::TimeUp);
        }
    }
    if session.hunters().is_empty() {
        return Some(EndReason::HuntersLeft);
    }
    None
}

/// Apply one state change and journal it.
fn step(
    session: &mut Session,
    target: SessionState,
    journal: &mut Vec<(SessionId, Transition)>,
) -> std::result::Result<(), TransitionError> {
    if let Some(transition) = session.transition_to(target)? {
        journal.push((session.id.clone(), transition));
    }
    Ok(())
}

fn report_hook(result: HookResult, session_id: &str, hook: &'static str) {
    if let Err(e) = result {
        warn!(%session_id, hook, error = %e, "collaborator call failed");
    }
}
