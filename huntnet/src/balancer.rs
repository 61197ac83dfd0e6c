//! Least-loaded node selection.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::registry::{NodeRecord, NodeRegistry};

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Records older than this are ignored even if the store still holds them.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Outcome of a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Node(NodeRecord),
    NoneAvailable,
}

impl Selection {
    pub fn node(self) -> Option<NodeRecord> {
        match self {
            Selection::Node(record) => Some(record),
            Selection::NoneAvailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Selection::Node(_))
    }
}

/// Picks the node with the fewest players among healthy, fresh, non-full ones.
///
/// Ties go to the lexicographically smallest name so every front node makes
/// the same choice for the same registry contents.
#[derive(Clone)]
pub struct LoadBalancer {
    registry: NodeRegistry,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl LoadBalancer {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
            stale_after: DEFAULT_STALE_AFTER,
            clock: Arc::new(SystemClock),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
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

    /// Least-loaded node whose name starts with `class_filter`, if given.
    pub fn select(&self, class_filter: Option<&str>) -> Selection {
        self.select_for_party(class_filter, 1)
    }

    /// Like [`select`](Self::select), but the node must fit `party_size` more players.
    pub fn select_for_party(&self, class_filter: Option<&str>, party_size: usize) -> Selection {
        let selection = match self.candidates(class_filter, party_size).into_iter().next() {
            Some(record) => Selection::Node(record),
            None => Selection::NoneAvailable,
        };

        #[cfg(feature = "metrics")]
        if let Some(ref m) = self.metrics {
            if selection.is_available() {
                m.balancer_selections_total.inc();
            } else {
                m.balancer_misses_total.inc();
            }
        }

        match &selection {
            Selection::Node(record) => {
                debug!(node = %record.name, players = record.players, "node selected")
            }
            Selection::NoneAvailable => debug!(?class_filter, party_size, "no node available"),
        }
        selection
    }

    /// Every eligible node, best first.
    pub fn candidates(&self, class_filter: Option<&str>, party_size: usize) -> Vec<NodeRecord> {
        let now = self.clock.now_millis();
        let stale_ms = self.stale_after.as_millis() as i64;

        let mut survivors: Vec<NodeRecord> = self
            .registry
            .list()
            .into_iter()
            .filter(|r| class_filter.map_or(true, |class| r.name.starts_with(class)))
            .filter(|r| r.status.accepts_players())
            .filter(|r| now.saturating_sub(r.timestamp) <= stale_ms)
            .filter(|r| !r.is_full() && r.free_slots() >= party_size.max(1))
            .collect();

        survivors.sort_by(|a, b| a.players.cmp(&b.players).then_with(|| a.name.cmp(&b.name)));
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::NodeStatus;
    use crate::store::{FleetStore, MemoryStore};

    struct Fleet {
        store: MemoryStore,
        clock: ManualClock,
        registry: NodeRegistry,
        balancer: LoadBalancer,
    }

    fn fleet() -> Fleet {
        let clock = ManualClock::new(1_000_000);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let registry = NodeRegistry::new(Arc::new(store.clone()), Duration::from_secs(30));
        let balancer = LoadBalancer::new(registry.clone()).with_clock(Arc::new(clock.clone()));
        Fleet {
            store,
            clock,
            registry,
            balancer,
        }
    }

    impl Fleet {
        fn node(&self, name: &str, status: NodeStatus, players: usize, max: usize) {
            self.registry
                .publish(&NodeRecord {
                    name: name.into(),
                    status,
                    players,
                    max_players: max,
                    node_class: "hunt".into(),
                    timestamp: self.clock.now_millis(),
                })
                .unwrap();
        }
    }

    fn selected(selection: Selection) -> String {
        selection.node().map(|r| r.name).unwrap_or_default()
    }

    #[test]
    fn test_least_loaded() {
        let f = fleet();
        f.node("A", NodeStatus::Online, 10, 100);
        f.node("B", NodeStatus::Online, 5, 100);
        f.node("C", NodeStatus::Online, 100, 100);
        assert_eq!(selected(f.balancer.select(None)), "B");
    }

    #[test]
    fn test_skips_unhealthy_status() {
        let f = fleet();
        f.node("A", NodeStatus::Draining, 0, 100);
        f.node("B", NodeStatus::Waiting, 9, 100);
        f.node("C", NodeStatus::Offline, 0, 100);
        assert_eq!(selected(f.balancer.select(None)), "B");
    }

    #[test]
    fn test_skips_stale_records() {
        let f = fleet();
        let old = NodeRecord {
            name: "A".into(),
            status: NodeStatus::Online,
            players: 0,
            max_players: 100,
            node_class: "hunt".into(),
            timestamp: f.clock.now_millis() - 61_000,
        };
        // Write directly with a long TTL so only the staleness window applies.
        f.store
            .put("servers:A", old.to_fields(), Duration::from_secs(600))
            .unwrap();
        f.node("B", NodeStatus::Online, 50, 100);

        assert_eq!(selected(f.balancer.select(None)), "B");
    }

    #[test]
    fn test_class_filter_by_prefix() {
        let f = fleet();
        f.node("hunt-1", NodeStatus::Online, 20, 100);
        f.node("lobby-1", NodeStatus::Online, 0, 100);
        assert_eq!(selected(f.balancer.select(Some("hunt"))), "hunt-1");
        assert_eq!(selected(f.balancer.select(None)), "lobby-1");
        assert_eq!(f.balancer.select(Some("arena")), Selection::NoneAvailable);
    }

    #[test]
    fn test_none_available_when_all_full() {
        let f = fleet();
        f.node("A", NodeStatus::Online, 10, 10);
        f.node("B", NodeStatus::Online, 12, 10);
        assert_eq!(f.balancer.select(None), Selection::NoneAvailable);
    }

    #[test]
    fn test_tie_break_by_name() {
        let f = fleet();
        f.node("node-b", NodeStatus::Online, 3, 10);
        f.node("node-a", NodeStatus::Online, 3, 10);
        for _ in 0..5 {
            assert_eq!(selected(f.balancer.select(None)), "node-a");
        }
    }

    #[test]
    fn test_party_needs_free_slots() {
        let f = fleet();
        f.node("A", NodeStatus::Online, 7, 10);
        f.node("B", NodeStatus::Online, 8, 20);
        assert_eq!(selected(f.balancer.select_for_party(None, 4)), "B");
        assert_eq!(f.balancer.select_for_party(None, 13), Selection::NoneAvailable);
    }

    #[test]
    fn test_store_down_means_none() {
        let f = fleet();
        f.node("A", NodeStatus::Online, 0, 10);
        f.store.set_available(false);
        assert_eq!(f.balancer.select(None), Selection::NoneAvailable);
    }

    #[test]
    fn test_candidates_ranked() {
        let f = fleet();
        f.node("C", NodeStatus::Online, 1, 10);
        f.node("A", NodeStatus::Online, 2, 10);
        f.node("B", NodeStatus::Online, 1, 10);
        let names: Vec<_> = f
            .balancer
            .candidates(None, 1)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["B", "C", "A"]);
    }
}
