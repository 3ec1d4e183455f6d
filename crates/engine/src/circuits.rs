//! Per-provider circuit breaker arena.
//!
//! Breakers are created lazily on first use and keyed by provider id. Each
//! breaker carries its own lock, so providers never contend with each other.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use switchyard_common::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Clock, ProviderId,
    RoutingMetrics, Transition,
};

pub struct CircuitArena {
    breakers: DashMap<ProviderId, Arc<CircuitBreaker>>,
    config: ArcSwap<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    metrics: Option<RoutingMetrics>,
}

impl CircuitArena {
    pub fn new(
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        metrics: Option<RoutingMetrics>,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            config: ArcSwap::from_pointee(config),
            clock,
            metrics,
        }
    }

    /// Breaker for `id`, created closed if it does not exist yet.
    pub fn breaker(&self, id: &ProviderId) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(id) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(id.clone()).or_insert_with(|| {
            debug!(provider = %id, "Creating circuit breaker");
            Arc::new(CircuitBreaker::with_clock(
                (**self.config.load()).clone(),
                Arc::clone(&self.clock),
                Some(id.to_string()),
            ))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, id: &ProviderId) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(id).map(|b| Arc::clone(b.value()))
    }

    /// Current state; providers without a breaker are closed.
    pub fn state(&self, id: &ProviderId) -> CircuitState {
        match self.get(id) {
            Some(breaker) => {
                self.poll_breaker(id, &breaker);
                breaker.state()
            }
            None => CircuitState::Closed,
        }
    }

    pub fn snapshot(&self, id: &ProviderId) -> CircuitSnapshot {
        self.breaker(id).snapshot()
    }

    /// Apply cool-down expiry on one breaker, reporting the transition.
    pub fn poll_breaker(&self, id: &ProviderId, breaker: &CircuitBreaker) -> Option<Transition> {
        let transition = breaker.poll();
        if let Some(t) = transition {
            self.observe(id, t);
        }
        transition
    }

    /// Apply cool-down expiry on every breaker.
    pub fn poll_all(&self) -> Vec<(ProviderId, Transition)> {
        let mut transitions = Vec::new();
        for entry in self.breakers.iter() {
            if let Some(t) = entry.value().poll() {
                transitions.push((entry.key().clone(), t));
            }
        }
        for (id, t) in &transitions {
            self.observe(id, *t);
        }
        transitions
    }

    /// Providers whose circuit is currently half-open.
    pub fn half_open(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::HalfOpen)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Report a transition returned by a breaker operation.
    pub fn observe(&self, id: &ProviderId, transition: Transition) {
        debug!(
            provider = %id,
            from = %transition.from,
            to = %transition.to,
            "Circuit transition"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(id.as_str(), transition.to);
        }
    }

    /// Force a provider's circuit closed.
    pub fn reset(&self, id: &ProviderId) {
        if let Some(breaker) = self.get(id) {
            breaker.reset();
            if let Some(metrics) = &self.metrics {
                metrics.record_transition(id.as_str(), CircuitState::Closed);
            }
        }
    }

    pub fn remove(&self, id: &ProviderId) {
        if self.breakers.remove(id).is_some() {
            debug!(provider = %id, "Dropped circuit breaker");
        }
    }

    /// Replace the thresholds of every breaker, existing and future.
    /// Existing breakers keep their phase and counters.
    pub fn set_config(&self, config: CircuitBreakerConfig) {
        self.config.store(Arc::new(config.clone()));
        for entry in self.breakers.iter() {
            entry.value().set_config(config.clone());
        }
        debug!(breakers = self.breakers.len(), "Updated circuit breaker thresholds");
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl std::fmt::Debug for CircuitArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitArena")
            .field("breakers", &self.breakers.len())
            .finish()
    }
}
