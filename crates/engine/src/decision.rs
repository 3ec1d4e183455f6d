//! Routing decision records and where they go.
//!
//! Every routed request, successful or not, produces one
//! [`RoutingDecision`]. The engine hands it to each configured
//! [`DecisionSink`]; the broadcast sink backs [`subscribe`] for metering and
//! dashboards.
//!
//! [`subscribe`]: crate::RoutingEngine::subscribe

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, trace};

use switchyard_common::{Capability, CircuitState, DecisionId, ErrorClass, ProviderId, RoutingMode};

use crate::policy::{Constraint, ExclusionReason};

/// Final result of a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Routed,
    NoEligibleProvider,
    NoProviderAvailable,
    ConfigurationError,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Routed => "routed",
            DecisionOutcome::NoEligibleProvider => "no_eligible_provider",
            DecisionOutcome::NoProviderAvailable => "no_provider_available",
            DecisionOutcome::ConfigurationError => "configuration_error",
        }
    }
}

/// One candidate as seen by the decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateReport {
    pub provider: ProviderId,
    pub cost: f64,
    pub circuit: CircuitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded: Option<ExclusionReason>,
}

/// One dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchAttempt {
    pub provider: ProviderId,
    pub latency_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Audit record of one routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub id: DecisionId,
    pub timestamp: DateTime<Utc>,
    pub capability: Capability,
    pub mode: RoutingMode,
    /// Provider that served the request, or the last one tried
    pub chosen: Option<ProviderId>,
    /// Estimated cost at `chosen`
    pub cost: Option<f64>,
    /// Time spent deciding, excluding dispatch
    pub decision_latency_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relaxed: Option<Constraint>,
    pub candidates: Vec<CandidateReport>,
    pub attempts: Vec<DispatchAttempt>,
    pub outcome: DecisionOutcome,
}

impl RoutingDecision {
    pub fn new(capability: Capability, mode: RoutingMode) -> Self {
        Self {
            id: DecisionId::new(),
            timestamp: Utc::now(),
            capability,
            mode,
            chosen: None,
            cost: None,
            decision_latency_us: 0,
            relaxed: None,
            candidates: Vec::new(),
            attempts: Vec::new(),
            outcome: DecisionOutcome::NoEligibleProvider,
        }
    }

    /// Candidates that were not excluded.
    pub fn eligible(&self) -> impl Iterator<Item = &CandidateReport> {
        self.candidates.iter().filter(|c| c.excluded.is_none())
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Receives every decision the engine makes.
pub trait DecisionSink: Send + Sync {
    fn publish(&self, decision: &Arc<RoutingDecision>);
}

/// Fans decisions out to in-process subscribers.
///
/// Slow subscribers lag and lose the oldest records rather than slowing the
/// engine down.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Arc<RoutingDecision>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RoutingDecision>> {
        self.tx.subscribe()
    }
}

impl DecisionSink for BroadcastSink {
    fn publish(&self, decision: &Arc<RoutingDecision>) {
        // No subscribers is fine
        let receivers = self.tx.send(Arc::clone(decision)).unwrap_or(0);
        trace!(decision = %decision.id, receivers, "Published decision");
    }
}

/// Writes each decision to the log as a structured event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DecisionSink for LogSink {
    fn publish(&self, decision: &Arc<RoutingDecision>) {
        info!(
            decision = %decision.id,
            capability = %decision.capability,
            mode = %decision.mode,
            chosen = ?decision.chosen.as_ref().map(ProviderId::as_str),
            outcome = decision.outcome.as_str(),
            attempts = decision.attempts.len(),
            relaxed = ?decision.relaxed,
            latency_us = decision.decision_latency_us,
            "Routing decision"
        );
    }
}
