//! Prometheus metrics for HuntNet nodes.
//!
//! # Example
//!
//! ```rust,ignore
//! use huntnet::metrics::Metrics;
//!
//! let metrics = Metrics::new();
//! metrics.sessions_created_total.inc();
//!
//! // Prometheus text format
//! let output = metrics.gather();
//! ```

use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Node metrics.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Sessions
    /// Total sessions created.
    pub sessions_created_total: IntCounter,
    /// Matches ended, by winning side.
    pub sessions_ended_total: IntCounterVec,
    /// Sessions by lifecycle state.
    pub sessions_by_state: IntGaugeVec,
    /// Participants placed in a session on this node.
    pub participants: IntGauge,
    /// Time spent in one orchestrator tick.
    pub tick_duration: Histogram,

    // Fleet
    pub heartbeats_published_total: IntCounter,
    pub heartbeats_failed_total: IntCounter,
    pub balancer_selections_total: IntCounter,
    pub balancer_misses_total: IntCounter,
    pub relay_sets_total: IntCounter,
    pub relay_takes_total: IntCounter,
}

fn register<M: Collector + Clone + 'static>(registry: &Registry, metric: M) -> M {
    registry
        .register(Box::new(metric.clone()))
        .expect("metric can be registered");
    metric
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    register(registry, IntCounter::new(name, help).expect("metric can be created"))
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let sessions_created_total =
            counter(&registry, "huntnet_sessions_created_total", "Total sessions created");
        let sessions_ended_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("huntnet_sessions_ended_total", "Matches ended by winning side"),
                &["winner"],
            )
            .expect("metric can be created"),
        );
        let sessions_by_state = register(
            &registry,
            IntGaugeVec::new(
                Opts::new("huntnet_sessions_by_state", "Sessions by lifecycle state"),
                &["state"],
            )
            .expect("metric can be created"),
        );
        let participants = register(
            &registry,
            IntGauge::new("huntnet_participants", "Participants placed in a session")
                .expect("metric can be created"),
        );
        let tick_duration = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("huntnet_tick_duration_seconds", "Orchestrator tick duration")
                    .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
            )
            .expect("metric can be created"),
        );

        let heartbeats_published_total = counter(
            &registry,
            "huntnet_heartbeats_published_total",
            "Registry heartbeats written",
        );
        let heartbeats_failed_total = counter(
            &registry,
            "huntnet_heartbeats_failed_total",
            "Registry heartbeats that failed",
        );
        let balancer_selections_total = counter(
            &registry,
            "huntnet_balancer_selections_total",
            "Successful node selections",
        );
        let balancer_misses_total = counter(
            &registry,
            "huntnet_balancer_misses_total",
            "Selections with no node available",
        );
        let relay_sets_total =
            counter(&registry, "huntnet_relay_sets_total", "Pending actions written");
        let relay_takes_total =
            counter(&registry, "huntnet_relay_takes_total", "Pending actions consumed");

        Self {
            registry,
            sessions_created_total,
            sessions_ended_total,
            sessions_by_state,
            participants,
            tick_duration,
            heartbeats_published_total,
            heartbeats_failed_total,
            balancer_selections_total,
            balancer_misses_total,
            relay_sets_total,
            relay_takes_total,
        }
    }

    /// Gather all metrics in Prometheus text format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Update session counts by state.
    pub fn update_session_state(&self, state: &str, count: i64) {
        self.sessions_by_state.with_label_values(&[state]).set(count);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        metrics.sessions_created_total.inc();
        metrics.participants.set(7);
        metrics.update_session_state("PLAYING", 2);

        let output = metrics.gather();
        assert!(output.contains("huntnet_sessions_created_total 1"));
        assert!(output.contains("huntnet_participants 7"));
        assert!(output.contains("huntnet_sessions_by_state{state=\"PLAYING\"} 2"));
    }

    #[test]
    fn test_ended_by_winner() {
        let metrics = Metrics::new();
        metrics.sessions_ended_total.with_label_values(&["hunters"]).inc();
        metrics.sessions_ended_total.with_label_values(&["runners"]).inc();
        metrics.sessions_ended_total.with_label_values(&["hunters"]).inc();

        let output = metrics.gather();
        assert!(output.contains("huntnet_sessions_ended_total{winner=\"hunters\"} 2"));
    }
}
