//! Node runtime.
//!
//! A node runs three tasks:
//!
//! - the orchestrator actor, which owns the [`SessionOrchestrator`] and is the
//!   only place sessions are mutated. It ticks on a fixed interval and serves
//!   [`NodeHandle`] requests between ticks.
//! - the heartbeat, which keeps this node's registry record alive.
//! - the session mirror worker, which writes tick snapshots and state changes
//!   to the store.
//!
//! Store I/O never runs on the actor: mirror writes are queued (and dropped
//! when the queue is full), and heartbeats and relay lookups go through the
//! blocking pool.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::balancer::LoadBalancer;
use crate::clock::{Clock, SystemClock};
use crate::config::NodeConfig;
use crate::error::{HuntNetError, Result};
use crate::hooks::{SessionHooks, WorldProvider};
use crate::mirror::{MirrorUpdate, SessionMirror, MIRROR_BUFFER};
use crate::orchestrator::{SessionError, SessionOrchestrator, TickReport};
use crate::registry::{HeartbeatPublisher, LoadSource, NodeLoad, NodeRecord, NodeRegistry, NodeStatus};
use crate::relay::{PendingActionRelay, ACTION_CREATE, ACTION_JOIN};
use crate::session::{Elimination, MatchOutcome, SessionId, SessionInfo};
use crate::store::{FleetStore, MemoryStore};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

const COMMAND_BUFFER: usize = 1024;

type Reply<T> = oneshot::Sender<std::result::Result<T, SessionError>>;

/// Requests marshalled onto the orchestrator actor.
enum Command {
    Create { reply: Reply<SessionId> },
    Join { participant: String, session_id: SessionId, reply: Reply<()> },
    JoinAny { participant: String, reply: Reply<SessionId> },
    Spectate { participant: String, session_id: SessionId, reply: Reply<()> },
    Leave { participant: String, reply: Reply<SessionId> },
    Start { session_id: SessionId, reply: Reply<()> },
    End { session_id: SessionId, reply: Reply<MatchOutcome> },
    Eliminate { participant: String, reply: Reply<Elimination> },
    CompleteObjective { session_id: SessionId, reply: Reply<()> },
    Snapshot { reply: oneshot::Sender<Vec<SessionInfo>> },
    Tick { reply: oneshot::Sender<TickReport> },
    Shutdown,
}

/// Open the shared store named by `config.store_url`, or an in-process one.
pub fn open_store(config: &NodeConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn FleetStore>> {
    match config.store_url.as_deref() {
        None => Ok(Arc::new(MemoryStore::with_clock(clock))),
        #[cfg(feature = "redis")]
        Some(url) => {
            let store =
                crate::store::RedisStore::connect(url, config.pool_max, config.store_timeout())?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(crate::config::ConfigError::invalid(
            "store_url",
            "built without the redis feature",
        )
        .into()),
    }
}

/// Front-node routing: pick a node for `participant` and leave their intent there.
///
/// Blocks on store I/O; call it from the blocking pool inside async code.
pub fn route_participant(
    balancer: &LoadBalancer,
    relay: &PendingActionRelay,
    participant: &str,
    class_filter: Option<&str>,
    action: &str,
    data: &str,
) -> Result<NodeRecord> {
    let node = balancer
        .select(class_filter)
        .node()
        .ok_or_else(|| HuntNetError::no_node_available(class_filter))?;
    relay.set(participant, action, data)?;
    info!(%participant, node = %node.name, %action, "participant routed");
    Ok(node)
}

// ==================== Handle ====================

/// Cloneable client for one node's orchestrator.
#[derive(Clone)]
pub struct NodeHandle {
    name: String,
    tx: mpsc::Sender<Command>,
    relay: PendingActionRelay,
    mirror: SessionMirror,
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| HuntNetError::NodeClosed)?;
        rx.await.map_err(|_| HuntNetError::NodeClosed)
    }

    pub async fn create_session(&self) -> Result<SessionId> {
        Ok(self.request(|reply| Command::Create { reply }).await??)
    }

    pub async fn join(&self, participant: &str, session_id: &str) -> Result<()> {
        Ok(self
            .request(|reply| Command::Join {
                participant: participant.to_string(),
                session_id: session_id.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn join_any(&self, participant: &str) -> Result<SessionId> {
        Ok(self
            .request(|reply| Command::JoinAny {
                participant: participant.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn spectate(&self, participant: &str, session_id: &str) -> Result<()> {
        Ok(self
            .request(|reply| Command::Spectate {
                participant: participant.to_string(),
                session_id: session_id.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn leave(&self, participant: &str) -> Result<SessionId> {
        Ok(self
            .request(|reply| Command::Leave {
                participant: participant.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn start(&self, session_id: &str) -> Result<()> {
        Ok(self
            .request(|reply| Command::Start {
                session_id: session_id.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn end(&self, session_id: &str) -> Result<MatchOutcome> {
        Ok(self
            .request(|reply| Command::End {
                session_id: session_id.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn eliminate_runner(&self, participant: &str) -> Result<Elimination> {
        Ok(self
            .request(|reply| Command::Eliminate {
                participant: participant.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn complete_objective(&self, session_id: &str) -> Result<()> {
        Ok(self
            .request(|reply| Command::CompleteObjective {
                session_id: session_id.to_string(),
                reply,
            })
            .await??)
    }

    /// Current state of every session on this node.
    pub async fn snapshot(&self) -> Result<Vec<SessionInfo>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Run a tick immediately instead of waiting for the interval.
    pub async fn tick_now(&self) -> Result<TickReport> {
        self.request(|reply| Command::Tick { reply }).await
    }

    /// Sessions mirrored by every node in the fleet.
    pub async fn fleet_sessions(&self) -> Result<Vec<SessionInfo>> {
        let mirror = self.mirror.clone();
        Ok(tokio::task::spawn_blocking(move || mirror.list()).await?)
    }

    /// Place a participant who was routed here, acting on their pending intent.
    ///
    /// `create` opens a new session, `join` targets the session in the payload,
    /// and anything else (including no intent at all) joins any open session.
    pub async fn arrive(&self, participant: &str) -> Result<SessionId> {
        let relay = self.relay.clone();
        let who = participant.to_string();
        let pending = tokio::task::spawn_blocking(move || relay.take(&who)).await?;

        match pending {
            Some(intent) if intent.action == ACTION_CREATE => {
                let session_id = self.create_session().await?;
                self.join(participant, &session_id).await?;
                Ok(session_id)
            }
            Some(intent) if intent.action == ACTION_JOIN => {
                self.join(participant, &intent.data).await?;
                Ok(intent.data)
            }
            other => {
                if let Some(intent) = other {
                    debug!(%participant, action = %intent.action, "unknown intent, joining any");
                }
                self.join_any(participant).await
            }
        }
    }

    /// Ask the actor to stop. Further requests fail with `NodeClosed`.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

// ==================== Actor ====================

struct NodeActor {
    orchestrator: SessionOrchestrator,
    rx: mpsc::Receiver<Command>,
    mirror_tx: mpsc::Sender<MirrorUpdate>,
    load: Arc<Mutex<NodeLoad>>,
    capacity: usize,
    tick_interval: std::time::Duration,
    #[cfg(feature = "metrics")]
    metrics: Arc<Metrics>,
}

impl NodeActor {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let first = tokio::time::Instant::now() + self.tick_interval;
        let mut ticker = tokio::time::interval_at(first, self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(node = %self.orchestrator.node(), interval = ?self.tick_interval, "orchestrator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.announce();
        for info in self.orchestrator.snapshot(self.orchestrator.now()) {
            let _ = self.mirror_tx.send(MirrorUpdate::Remove(info.game_id)).await;
        }
        self.load.lock().status = NodeStatus::Offline;
        info!(node = %self.orchestrator.node(), "orchestrator stopped");
    }

    fn handle(&mut self, command: Command) {
        let orch = &mut self.orchestrator;
        // A dropped reply only means the caller stopped waiting.
        match command {
            Command::Create { reply } => {
                let _ = reply.send(orch.create_default_session());
            }
            Command::Join { participant, session_id, reply } => {
                let _ = reply.send(orch.join(&participant, &session_id));
            }
            Command::JoinAny { participant, reply } => {
                let _ = reply.send(orch.join_any(&participant));
            }
            Command::Spectate { participant, session_id, reply } => {
                let _ = reply.send(orch.spectate(&participant, &session_id));
            }
            Command::Leave { participant, reply } => {
                let _ = reply.send(orch.leave(&participant));
            }
            Command::Start { session_id, reply } => {
                let _ = reply.send(orch.start(&session_id));
            }
            Command::End { session_id, reply } => {
                let _ = reply.send(orch.end(&session_id));
            }
            Command::Eliminate { participant, reply } => {
                let _ = reply.send(orch.eliminate_runner(&participant));
            }
            Command::CompleteObjective { session_id, reply } => {
                let _ = reply.send(orch.complete_objective(&session_id));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(orch.snapshot(orch.now()));
            }
            Command::Tick { reply } => {
                let report = self.tick();
                let _ = reply.send(report);
                return;
            }
            Command::Shutdown => {}
        }
        self.announce();
        self.refresh_load();
    }

    fn tick(&mut self) -> TickReport {
        #[cfg(feature = "metrics")]
        let timer = self.metrics.tick_duration.start_timer();

        let report = self.orchestrator.tick();

        #[cfg(feature = "metrics")]
        timer.observe_duration();

        self.announce();
        for info in &report.snapshots {
            self.mirror(MirrorUpdate::Upsert(info.clone()));
        }
        for id in &report.removed {
            self.mirror(MirrorUpdate::Remove(id.clone()));
        }
        for (id, outcome) in &report.ended {
            info!(session_id = %id, winner = %outcome.winner, "match finished");
        }

        self.refresh_load();
        report
    }

    /// Queue a status message for every transition since the last call.
    fn announce(&mut self) {
        let timestamp = self.orchestrator.now();
        for (session_id, transition) in self.orchestrator.take_transitions() {
            self.mirror(MirrorUpdate::Status {
                session_id,
                state: transition.to,
                timestamp,
            });
        }
    }

    fn mirror(&self, update: MirrorUpdate) {
        match self.mirror_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                warn!(?update, "session mirror queue full; update dropped")
            }
            Err(TrySendError::Closed(_)) => debug!("session mirror is gone; update dropped"),
        }
    }

    fn refresh_load(&self) {
        let players = self.orchestrator.participant_count();
        let status = if players >= self.capacity {
            NodeStatus::Full
        } else if players == 0 {
            NodeStatus::Waiting
        } else {
            NodeStatus::Online
        };
        *self.load.lock() = NodeLoad {
            players,
            max_players: self.capacity,
            status,
        };
    }
}

// ==================== Runtime ====================

/// A running node: orchestrator actor, heartbeat and session mirror.
pub struct NodeRuntime {
    handle: NodeHandle,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    registry: NodeRegistry,
    balancer: LoadBalancer,
    #[cfg(feature = "metrics")]
    metrics: Arc<Metrics>,
}

impl NodeRuntime {
    /// Validate `config` and spawn the node's tasks on the current runtime.
    pub fn start(
        config: NodeConfig,
        store: Arc<dyn FleetStore>,
        hooks: Arc<dyn SessionHooks>,
        worlds: Arc<dyn WorldProvider>,
    ) -> Result<Self> {
        Self::start_with_clock(config, store, hooks, worlds, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: NodeConfig,
        store: Arc<dyn FleetStore>,
        hooks: Arc<dyn SessionHooks>,
        worlds: Arc<dyn WorldProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        #[cfg(feature = "metrics")]
        let metrics = Arc::new(Metrics::new());

        let orchestrator = SessionOrchestrator::with_parts(
            config.name.clone(),
            config.session.clone(),
            Arc::clone(&clock),
            hooks,
            worlds,
        )?;
        #[cfg(feature = "metrics")]
        let orchestrator = orchestrator.with_metrics(Arc::clone(&metrics));

        let load = Arc::new(Mutex::new(NodeLoad {
            players: 0,
            max_players: config.capacity,
            status: NodeStatus::Waiting,
        }));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (mirror_tx, mirror_rx) = mpsc::channel(MIRROR_BUFFER);

        let registry = NodeRegistry::new(Arc::clone(&store), config.registry_ttl());
        let balancer = LoadBalancer::new(registry.clone())
            .with_stale_after(config.stale_after())
            .with_clock(Arc::clone(&clock));
        #[cfg(feature = "metrics")]
        let balancer = balancer.with_metrics(Arc::clone(&metrics));
        let relay = PendingActionRelay::new(Arc::clone(&store), config.relay_ttl())
            .with_clock(Arc::clone(&clock));
        #[cfg(feature = "metrics")]
        let relay = relay.with_metrics(Arc::clone(&metrics));
        let mirror = SessionMirror::new(Arc::clone(&store), config.mirror_ttl());

        let source: LoadSource = {
            let load = Arc::clone(&load);
            Arc::new(move || *load.lock())
        };
        let heartbeat = HeartbeatPublisher::new(
            registry.clone(),
            config.name.clone(),
            config.node_class.clone(),
            config.heartbeat_interval(),
            source,
        )?
        .with_clock(Arc::clone(&clock));
        #[cfg(feature = "metrics")]
        let heartbeat = heartbeat.with_metrics(Arc::clone(&metrics));

        let actor = NodeActor {
            orchestrator,
            rx,
            mirror_tx,
            load,
            capacity: config.capacity,
            tick_interval: config.tick_interval(),
            #[cfg(feature = "metrics")]
            metrics: Arc::clone(&metrics),
        };

        let tasks = vec![
            tokio::spawn(actor.run(shutdown_rx.clone())),
            tokio::spawn(Arc::new(heartbeat).run(shutdown_rx)),
            tokio::spawn(mirror.clone().run(mirror_rx)),
        ];

        info!(
            node = %config.name,
            class = %config.node_class,
            capacity = config.capacity,
            "node started"
        );

        Ok(Self {
            handle: NodeHandle {
                name: config.name,
                tx,
                relay,
                mirror,
            },
            shutdown_tx,
            tasks,
            registry,
            balancer,
            #[cfg(feature = "metrics")]
            metrics,
        })
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Registry view over the same store this node publishes to.
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Load balancer over the same registry, honouring `stale_after_secs`.
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop every task and wait for them. The node's registry record is removed.
    pub async fn shutdown(self) {
        let name = self.handle.name.clone();
        let _ = self.shutdown_tx.send(true);
        // The mirror worker exits once the actor drops its sender.
        drop(self.handle);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(node = %name, error = %e, "node task failed");
            }
        }
        info!(node = %name, "node stopped");
    }
}
