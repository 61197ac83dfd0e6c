//! # HuntNet
//!
//! Session orchestration for hunter-versus-runner matches, and fleet
//! coordination between the nodes that host them.
//!
//! ## Features
//!
//! - **Session lifecycle**: a guarded state machine from WAITING through
//!   PLAYING to recycling, driven by a fixed-rate tick
//! - **Roles**: randomized hunter/runner split with per-runner respawns
//! - **Fleet registry**: TTL-backed node records kept alive by heartbeats
//! - **Load balancing**: least-loaded, capacity-aware node selection
//! - **Hand-off**: pending actions relayed to the node a participant moves to
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use huntnet::{DisabledWorlds, MemoryStore, NodeConfig, NodeRuntime, NoopHooks};
//!
//! let config = NodeConfig::load()?;
//! let node = NodeRuntime::start(
//!     config,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoopHooks),
//!     Arc::new(DisabledWorlds),
//! )?;
//!
//! let handle = node.handle();
//! let session = handle.join_any("player-1").await?;
//! ```

pub mod balancer;
pub mod clock;
pub mod config;
pub mod error;
pub mod hooks;
pub mod mirror;
pub mod node;
pub mod orchestrator;
pub mod registry;
pub mod relay;
pub mod respawn;
pub mod roles;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;

#[cfg(feature = "metrics")]
pub mod metrics;

// Re-exports
pub use balancer::{LoadBalancer, Selection};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, NodeConfig, SessionConfig};
pub use error::{HuntNetError, Result};
pub use hooks::{DisabledWorlds, HookError, NoopHooks, Phase, SessionHooks, WorldProvider};
pub use mirror::{MirrorUpdate, SessionMirror};
pub use node::{open_store, route_participant, NodeHandle, NodeRuntime};
pub use orchestrator::{SessionError, SessionOrchestrator, TickReport};
pub use registry::{
    HeartbeatPublisher, LoadSource, NodeLoad, NodeRecord, NodeRegistry, NodeStatus, RecordError,
};
pub use relay::{PendingAction, PendingActionRelay};
pub use respawn::RespawnLedger;
pub use roles::{Role, RoleAssigner, RoleAssignment, RoleError};
pub use session::{
    Elimination, EndReason, MatchOutcome, ParticipantId, Session, SessionId, SessionInfo,
    WinnerSide,
};
pub use state::{SessionState, StateMachine, Transition, TransitionError};
pub use store::{FleetStore, MemoryStore, StoreError};
pub use telemetry::{init_tracing, TracingConfig};

#[cfg(feature = "metrics")]
pub use metrics::Metrics;

#[cfg(feature = "redis")]
pub use store::RedisStore;
