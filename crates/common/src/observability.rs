//! Logging initialization and Prometheus metrics for the routing engine.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::types::CircuitState;

// ============================================================================
// Logging
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Calling this twice is a
/// no-op for the second call.
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init(),
    };

    if result.is_err() {
        debug!("Tracing subscriber already installed");
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Dispatch latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Prometheus metrics for routing decisions, dispatches and circuits.
#[derive(Clone)]
pub struct RoutingMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    dispatches: IntCounterVec,
    dispatch_latency: HistogramVec,
    circuit_transitions: IntCounterVec,
    circuit_state: IntGaugeVec,
}

impl RoutingMetrics {
    /// Create metrics registered in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new_custom(Some("switchyard".to_string()), None)?)
    }

    /// Create metrics registered in `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let decisions = IntCounterVec::new(
            Opts::new("routing_decisions_total", "Routing decisions by outcome"),
            &["capability", "mode", "outcome"],
        )?;
        let dispatches = IntCounterVec::new(
            Opts::new("dispatch_attempts_total", "Dispatch attempts by provider and result"),
            &["provider", "result"],
        )?;
        let dispatch_latency = HistogramVec::new(
            HistogramOpts::new("dispatch_latency_seconds", "Upstream dispatch latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["provider"],
        )?;
        let circuit_transitions = IntCounterVec::new(
            Opts::new("circuit_transitions_total", "Circuit breaker transitions"),
            &["provider", "to"],
        )?;
        let circuit_state = IntGaugeVec::new(
            Opts::new(
                "circuit_state",
                "Current circuit state (0=closed, 1=open, 2=half_open)",
            ),
            &["provider"],
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(dispatches.clone()))?;
        registry.register(Box::new(dispatch_latency.clone()))?;
        registry.register(Box::new(circuit_transitions.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self {
            registry,
            decisions,
            dispatches,
            dispatch_latency,
            circuit_transitions,
            circuit_state,
        })
    }

    pub fn record_decision(&self, capability: &str, mode: &str, outcome: &str) {
        self.decisions
            .with_label_values(&[capability, mode, outcome])
            .inc();
    }

    pub fn record_dispatch(&self, provider: &str, success: bool, latency_secs: f64) {
        let result = if success { "success" } else { "failure" };
        self.dispatches.with_label_values(&[provider, result]).inc();
        self.dispatch_latency
            .with_label_values(&[provider])
            .observe(latency_secs);
    }

    pub fn record_transition(&self, provider: &str, to: CircuitState) {
        self.circuit_transitions
            .with_label_values(&[provider, to.as_str()])
            .inc();
        let value = match to {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        self.circuit_state.with_label_values(&[provider]).set(value);
    }

    /// Drop per-provider series of a removed provider.
    pub fn forget_provider(&self, provider: &str) {
        let _ = self.circuit_state.remove_label_values(&[provider]);
        let _ = self.dispatch_latency.remove_label_values(&[provider]);
    }

    /// Decision count for a label set (used by tests and status output).
    pub fn decision_count(&self, capability: &str, mode: &str, outcome: &str) -> u64 {
        self.decisions
            .with_label_values(&[capability, mode, outcome])
            .get()
    }

    /// Export all metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            debug!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for RoutingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_export_contains_series() {
        let metrics = RoutingMetrics::new().unwrap();
        metrics.record_decision("chat-completion", "balanced", "routed");
        metrics.record_dispatch("p1", true, 0.12);
        metrics.record_transition("p1", CircuitState::Open);

        let text = metrics.export_prometheus();
        assert!(text.contains("switchyard_routing_decisions_total"));
        assert!(text.contains("switchyard_dispatch_latency_seconds"));
        assert!(text.contains("switchyard_circuit_state"));
        assert_eq!(metrics.decision_count("chat-completion", "balanced", "routed"), 1);
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("info", LogFormat::Pretty);
        init_tracing("debug", LogFormat::Json);
    }
}
