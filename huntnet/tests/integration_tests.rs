//! Integration tests for huntnet

use std::sync::Arc;
use std::time::Duration;

use huntnet::relay::{ACTION_CREATE, ACTION_JOIN};
use huntnet::store::SESSION_STATUS_CHANNEL;
use huntnet::{
    route_participant, DisabledWorlds, EndReason, FleetStore, HuntNetError, LoadBalancer,
    ManualClock, MemoryStore, NodeConfig, NodeRegistry, NodeRuntime, NoopHooks,
    PendingActionRelay, SessionConfig, SessionError, SessionState, WinnerSide,
};

struct Fleet {
    clock: ManualClock,
    store: MemoryStore,
}

impl Fleet {
    fn new() -> Self {
        let clock = ManualClock::new(1_700_000_000_000);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        Self { clock, store }
    }

    fn shared(&self) -> Arc<dyn FleetStore> {
        Arc::new(self.store.clone())
    }

    fn node(&self, name: &str) -> NodeRuntime {
        self.node_with(name, |_| {})
    }

    fn node_with(&self, name: &str, tweak: impl FnOnce(&mut NodeConfig)) -> NodeRuntime {
        let mut config = NodeConfig {
            name: name.into(),
            capacity: 20,
            // Ticks are driven explicitly with `tick_now`.
            tick_interval_ms: 3_600_000,
            session: SessionConfig {
                max_hunters: 2,
                max_runners: 4,
                min_players: 2,
                runner_ratio: 0.5,
                prepare_secs: 5,
                match_timeout_secs: 120,
                end_grace_secs: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        tweak(&mut config);
        NodeRuntime::start_with_clock(
            config,
            self.shared(),
            Arc::new(NoopHooks),
            Arc::new(DisabledWorlds),
            Arc::new(self.clock.clone()),
        )
        .unwrap()
    }

    fn registry(&self) -> NodeRegistry {
        NodeRegistry::new(self.shared(), Duration::from_secs(30))
    }

    fn balancer(&self) -> LoadBalancer {
        LoadBalancer::new(self.registry()).with_clock(Arc::new(self.clock.clone()))
    }

    fn relay(&self) -> PendingActionRelay {
        PendingActionRelay::new(self.shared(), Duration::from_secs(60))
            .with_clock(Arc::new(self.clock.clone()))
    }
}

/// Poll until `check` holds, for up to two seconds.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Test a full match driven through the node handle
#[tokio::test]
async fn test_match_lifecycle() {
    let fleet = Fleet::new();
    let node = fleet.node("hunt-1");
    let handle = node.handle();

    let session = handle.create_session().await.unwrap();
    handle.join("alice", &session).await.unwrap();
    handle.join("bob", &session).await.unwrap();
    handle.join("carol", &session).await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot[0].state, SessionState::Matching);
    assert_eq!(snapshot[0].players, 3);

    handle.start(&session).await.unwrap();
    fleet.clock.advance(Duration::from_secs(5));
    let report = handle.tick_now().await.unwrap();
    assert_eq!(report.snapshots[0].state, SessionState::Playing);

    handle.complete_objective(&session).await.unwrap();
    let report = handle.tick_now().await.unwrap();
    assert_eq!(report.ended.len(), 1);
    assert_eq!(report.ended[0].1.winner, WinnerSide::Runners);
    assert_eq!(report.ended[0].1.reason, EndReason::ObjectiveCompleted);

    fleet.clock.advance(Duration::from_secs(3));
    let report = handle.tick_now().await.unwrap();
    assert_eq!(report.snapshots[0].state, SessionState::Waiting);
    assert_eq!(report.snapshots[0].players, 0);

    node.shutdown().await;
}

/// Test precondition failures come back as typed errors
#[tokio::test]
async fn test_rejections_through_handle() {
    let fleet = Fleet::new();
    let node = fleet.node("hunt-1");
    let handle = node.handle();

    let session = handle.create_session().await.unwrap();
    handle.join("alice", &session).await.unwrap();

    let err = handle.start(&session).await.unwrap_err();
    assert!(matches!(
        err.as_session(),
        Some(SessionError::NotEnoughParticipants { have: 1, need: 2 })
    ));

    let err = handle.join("alice", &session).await.unwrap_err();
    assert!(matches!(err.as_session(), Some(SessionError::AlreadyInSession { .. })));

    let err = handle.end(&session).await.unwrap_err();
    assert!(matches!(err.as_session(), Some(SessionError::NotPlaying { .. })));

    node.shutdown().await;
}

/// Test the front-node flow: select, leave an intent, arrive
#[tokio::test]
async fn test_route_and_arrive_create() {
    let fleet = Fleet::new();
    let first = fleet.node("hunt-1");
    let second = fleet.node("hunt-2");
    let registry = fleet.registry();
    assert!(eventually(|| registry.list().len() == 2).await);

    let target = route_participant(
        &fleet.balancer(),
        &fleet.relay(),
        "alice",
        Some("hunt"),
        ACTION_CREATE,
        "",
    )
    .unwrap();
    // Equal load: the smallest name wins.
    assert_eq!(target.name, "hunt-1");

    let handle = first.handle();
    let session = handle.arrive("alice").await.unwrap();

    // The intent was consumed; a second arrival falls back to any open session.
    handle.leave("alice").await.unwrap();
    let again = handle.arrive("alice").await.unwrap();
    assert_eq!(again, session);

    first.shutdown().await;
    second.shutdown().await;
}

/// Test a join intent lands the participant in the named session
#[tokio::test]
async fn test_arrive_with_join_intent() {
    let fleet = Fleet::new();
    let node = fleet.node("hunt-1");
    let handle = node.handle();

    let wanted = handle.create_session().await.unwrap();
    handle.create_session().await.unwrap();

    fleet.relay().set("bob", ACTION_JOIN, &wanted).unwrap();
    assert_eq!(handle.arrive("bob").await.unwrap(), wanted);

    let snapshot = handle.snapshot().await.unwrap();
    let joined = snapshot.iter().find(|s| s.game_id == wanted).unwrap();
    assert_eq!(joined.players, 1);

    node.shutdown().await;
}

/// Test expired intents are dropped silently
#[tokio::test]
async fn test_expired_intent_falls_back() {
    let fleet = Fleet::new();
    let node = fleet.node("hunt-1");
    let handle = node.handle();

    fleet.relay().set("carol", ACTION_JOIN, "gone-session").unwrap();
    fleet.clock.advance(Duration::from_secs(61));

    // Falls back to join_any, which creates a session.
    let session = handle.arrive("carol").await.unwrap();
    assert!(!session.is_empty());
    assert_eq!(handle.snapshot().await.unwrap().len(), 1);

    node.shutdown().await;
}

/// Test no node available is an explicit outcome
#[tokio::test]
async fn test_route_with_empty_fleet() {
    let fleet = Fleet::new();
    let result = route_participant(
        &fleet.balancer(),
        &fleet.relay(),
        "dave",
        Some("hunt"),
        ACTION_CREATE,
        "",
    );
    assert!(matches!(result, Err(HuntNetError::NoNodeAvailable { .. })));
    assert!(fleet.relay().take("dave").is_none());
}

/// Test a store outage degrades to "no node available"
#[tokio::test]
async fn test_route_during_store_outage() {
    let fleet = Fleet::new();
    let node = fleet.node("hunt-1");
    let registry = fleet.registry();
    assert!(eventually(|| registry.get("hunt-1").is_some()).await);

    fleet.store.set_available(false);
    let result = route_participant(&fleet.balancer(), &fleet.relay(), "erin", None, ACTION_CREATE, "");
    assert!(matches!(result, Err(HuntNetError::NoNodeAvailable { .. })));

    fleet.store.set_available(true);
    node.shutdown().await;
}

/// Test sessions show up in the fleet-wide mirror
#[tokio::test]
async fn test_mirror_visible_from_other_node() {
    let fleet = Fleet::new();
    let first = fleet.node("hunt-1");
    let second = fleet.node("hunt-2");

    let session = first.handle().create_session().await.unwrap();
    first.handle().tick_now().await.unwrap();

    let other = second.handle();
    let mut found = None;
    for _ in 0..200 {
        let sessions = other.fleet_sessions().await.unwrap();
        if let Some(info) = sessions.into_iter().find(|s| s.game_id == session) {
            found = Some(info);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let info = found.expect("session mirrored");
    assert_eq!(info.server, "hunt-1");
    assert_eq!(info.state, SessionState::Waiting);

    first.shutdown().await;
    second.shutdown().await;
}

/// Test a stopped node leaves the registry and refuses requests
#[tokio::test]
async fn test_shutdown_deregisters() {
    let fleet = Fleet::new();
    let node = fleet.node("hunt-1");
    let handle = node.handle();
    let registry = fleet.registry();
    assert!(eventually(|| registry.get("hunt-1").is_some()).await);

    node.shutdown().await;
    assert!(registry.get("hunt-1").is_none());
    assert!(matches!(
        handle.create_session().await,
        Err(HuntNetError::NodeClosed)
    ));
}

/// Test a silent node ages out of the registry
#[tokio::test]
async fn test_registry_ttl_expiry() {
    let fleet = Fleet::new();
    let node = fleet.node("hunt-1");
    let registry = fleet.registry();
    assert!(eventually(|| registry.get("hunt-1").is_some()).await);

    // No heartbeat runs in 30s of manual time: the real interval is 10s wall clock.
    fleet.clock.advance(Duration::from_secs(30));
    assert!(registry.get("hunt-1").is_none());
    assert_eq!(fleet.balancer().select(None), huntnet::Selection::NoneAvailable);

    node.shutdown().await;
}

/// Test every transition is announced on the session status channel
#[tokio::test]
async fn test_status_channel_sees_every_transition() {
    let fleet = Fleet::new();
    let mut status = fleet.store.subscribe(SESSION_STATUS_CHANNEL);
    let node = fleet.node("hunt-1");
    let handle = node.handle();

    let session = handle.create_session().await.unwrap();
    handle.join("alice", &session).await.unwrap();
    handle.join("bob", &session).await.unwrap();
    handle.start(&session).await.unwrap();
    fleet.clock.advance(Duration::from_secs(5));
    handle.tick_now().await.unwrap();
    handle.end(&session).await.unwrap();
    fleet.clock.advance(Duration::from_secs(3));
    handle.tick_now().await.unwrap();

    let expected = [
        "MATCHING",
        "STARTING",
        "PREPARING",
        "PLAYING",
        "ENDING",
        "RESTARTING",
        "WAITING",
    ];
    let mut seen = Vec::new();
    while seen.len() < expected.len() {
        let message = tokio::time::timeout(Duration::from_secs(2), status.recv())
            .await
            .expect("status message")
            .unwrap();
        let mut parts = message.split(':');
        assert_eq!(parts.next(), Some(session.as_str()));
        seen.push(parts.next().unwrap_or_default().to_string());
    }
    assert_eq!(seen, expected);

    node.shutdown().await;
}

/// Test the node's balancer drops records older than stale_after_secs
#[tokio::test]
async fn test_runtime_balancer_honours_stale_after() {
    let fleet = Fleet::new();
    let node = fleet.node_with("hunt-1", |config| config.stale_after_secs = 15);
    let registry = fleet.registry();
    assert!(eventually(|| registry.get("hunt-1").is_some()).await);

    assert_eq!(node.balancer().select(Some("hunt")).node().unwrap().name, "hunt-1");

    // Past the node's limit but inside the record TTL and the default limit.
    fleet.clock.advance(Duration::from_secs(16));
    assert!(registry.get("hunt-1").is_some());
    assert!(fleet.balancer().select(Some("hunt")).is_available());
    assert_eq!(node.balancer().select(Some("hunt")), huntnet::Selection::NoneAvailable);

    node.shutdown().await;
}
