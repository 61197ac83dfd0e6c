//! Collaborator interfaces called by the orchestrator.
//!
//! Rendering, equipment, teleports and payouts live outside HuntNet. The
//! orchestrator calls them after a state change has already happened, so a
//! failing collaborator never blocks or undoes a transition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::roles::Role;
use crate::session::{ParticipantId, Session, SessionId, WinnerSide};

#[derive(Debug, Error)]
pub enum HookError {
    #[error("participant unreachable: {0}")]
    Unreachable(ParticipantId),

    #[error("collaborator failed: {0}")]
    Failed(String),
}

pub type HookResult = std::result::Result<(), HookError>;

/// Where a participant is sent for each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Prepare,
    Play,
    End,
}

/// Side effects triggered by session transitions.
pub trait SessionHooks: Send + Sync {
    fn notify_role_assigned(&self, participant: &str, role: Role) -> HookResult;

    fn grant_role_equipment(&self, participant: &str, role: Role) -> HookResult;

    fn teleport_to_phase_location(&self, participant: &str, phase: Phase) -> HookResult;

    fn render_session_status(&self, session: &Session) -> HookResult;

    fn payout_result(&self, session: &Session, winner: WinnerSide) -> HookResult;
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {
    fn notify_role_assigned(&self, _participant: &str, _role: Role) -> HookResult {
        Ok(())
    }

    fn grant_role_equipment(&self, _participant: &str, _role: Role) -> HookResult {
        Ok(())
    }

    fn teleport_to_phase_location(&self, _participant: &str, _phase: Phase) -> HookResult {
        Ok(())
    }

    fn render_session_status(&self, _session: &Session) -> HookResult {
        Ok(())
    }

    fn payout_result(&self, _session: &Session, _winner: WinnerSide) -> HookResult {
        Ok(())
    }
}

/// Optional world-management integration.
pub trait WorldProvider: Send + Sync {
    /// Whether a real integration is present.
    fn enabled(&self) -> bool;

    /// Provision a world for a new session, returning its identifier.
    fn prepare_world(&self, session_id: &SessionId) -> Option<String>;

    /// Release the world of a session that is being removed.
    fn release_world(&self, world: &str);
}

/// Used when no world integration is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledWorlds;

impl WorldProvider for DisabledWorlds {
    fn enabled(&self) -> bool {
        false
    }

    fn prepare_world(&self, _session_id: &SessionId) -> Option<String> {
        None
    }

    fn release_world(&self, _world: &str) {}
}
