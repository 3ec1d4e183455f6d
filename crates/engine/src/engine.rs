//! Routing decision engine.
//!
//! Ties the components together for each request:
//!
//! ```text
//! resolve capability -> list candidates -> build candidate views
//!   -> policy filter -> select -> dispatch (bounded, cancellable)
//!   -> record health sample -> on failure retry once elsewhere
//!   -> publish decision
//! ```
//!
//! No shared lock is held across the outbound call. The dispatch runs in its
//! own task bound to a cancellation token: dropping the `route` future cancels
//! the in-flight dispatch, while an outcome that completed first is still
//! recorded.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchyard_common::{
    Capability, CircuitBreakerConfig, CircuitSnapshot, Clock, ConfigurationError, ProviderId,
    ProviderInstance, Region, RoutingMetrics, RoutingPolicy, Transition, system_clock,
};
use switchyard_config::{Config, HealthConfig};

use crate::circuits::CircuitArena;
use crate::cost::CostModel;
use crate::decision::{
    BroadcastSink, CandidateReport, DecisionOutcome, DecisionSink, DispatchAttempt,
    RoutingDecision,
};
use crate::dispatch::{DispatchError, DispatchResponse, Dispatcher, GatewayRequest};
use crate::errors::RoutingError;
use crate::health::{HealthMonitor, HealthSample, ProviderHealth};
use crate::policy::{Candidate, Exclusion, PolicyEvaluator, PolicyStore};
use crate::ratelimit::RateLimiter;
use crate::registry::{ProviderRegistry, RegistrySnapshot};
use crate::selector::{SelectionStrategy, WeightedSelector};

/// First attempt plus one retry on a different provider.
const MAX_ATTEMPTS: usize = 2;

/// A successfully routed request.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub provider: ProviderId,
    pub response: DispatchResponse,
    pub decision: Arc<RoutingDecision>,
}

/// Result of an active probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy,
    Failed(DispatchError),
    /// The circuit did not admit a probe (open, or probe budget spent)
    Skipped,
}

/// Health and circuit state of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderId,
    pub capability: Capability,
    pub regions: Vec<Region>,
    pub weight: u8,
    pub health: ProviderHealth,
    pub circuit: CircuitSnapshot,
}

/// What a configuration reload changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadSummary {
    pub providers: usize,
    pub removed: Vec<ProviderId>,
}

struct Shared {
    registry: Arc<ProviderRegistry>,
    policies: Arc<PolicyStore>,
    circuits: Arc<CircuitArena>,
    health: HealthMonitor,
    limiter: RateLimiter,
    evaluator: PolicyEvaluator,
    selector: WeightedSelector,
    cost_model: CostModel,
    dispatcher: Arc<dyn Dispatcher>,
    broadcast: BroadcastSink,
    sinks: Vec<Arc<dyn DecisionSink>>,
    metrics: Option<RoutingMetrics>,
    default_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Shared {
    /// Feed a completed dispatch into health and metrics. `holds_slot` marks
    /// a dispatch that took a half-open recovery slot; an outcome that says
    /// nothing about the provider hands the slot back.
    fn record_outcome(
        &self,
        instance: &ProviderInstance,
        outcome: &Result<DispatchResponse, DispatchError>,
        latency: Duration,
        holds_slot: bool,
    ) {
        let at = self.clock.now();
        let sample = match outcome {
            Ok(_) => HealthSample::success(instance.id.clone(), at, latency),
            Err(e) if e.counts_against_provider() => {
                HealthSample::failure(instance.id.clone(), at, latency, e.class())
            }
            Err(_) => {
                if holds_slot {
                    self.release_slot(&instance.id);
                }
                return;
            }
        };
        let sample = if holds_slot { sample.as_probe() } else { sample };
        self.health.record(&instance.id, sample);

        if let Some(metrics) = &self.metrics {
            metrics.record_dispatch(instance.id.as_str(), outcome.is_ok(), latency.as_secs_f64());
        }
    }

    fn release_slot(&self, id: &ProviderId) {
        if let Some(breaker) = self.circuits.get(id) {
            breaker.release_probe();
            debug!(provider = %id, "Returned half-open slot without a verdict");
        }
    }

    fn purge(&self, id: &ProviderId) {
        self.health.forget(id);
        self.circuits.remove(id);
        self.limiter.forget(id);
        if let Some(metrics) = &self.metrics {
            metrics.forget_provider(id.as_str());
        }
    }
}

/// The routing and failover engine.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RoutingEngine {
    shared: Arc<Shared>,
}

impl RoutingEngine {
    pub fn builder(dispatcher: Arc<dyn Dispatcher>) -> RoutingEngineBuilder {
        RoutingEngineBuilder::new(dispatcher)
    }

    /// Build an engine from a loaded configuration.
    pub fn from_config(
        config: &Config,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ConfigurationError> {
        let metrics = if config.metrics.enabled {
            match RoutingMetrics::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!(error = %e, "Failed to create metrics registry, continuing without metrics");
                    None
                }
            }
        } else {
            None
        };

        let mut builder = Self::builder(dispatcher)
            .providers(config.provider_instances()?)
            .default_policy(config.default_policy())
            .policies(config.capability_policies())
            .health(config.health.clone())
            .circuit_breaker(config.circuit_breaker.clone())
            .default_timeout(config.engine.default_timeout())
            .decision_buffer(config.engine.decision_buffer);
        if let Some(seed) = config.engine.rng_seed {
            builder = builder.seed(seed);
        }
        if let Some(metrics) = metrics {
            builder = builder.metrics(metrics);
        }
        builder.build()
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Route one request: choose a provider, dispatch, retry once on failure.
    pub async fn route(&self, request: GatewayRequest) -> Result<RoutedResponse, RoutingError> {
        let started = Instant::now();
        let shared = &self.shared;
        let capability = request.capability.clone();
        let snapshot = shared.registry.snapshot();
        let policy = shared.policies.policy_for(&capability);
        let mut decision = RoutingDecision::new(capability.clone(), policy.mode);

        if !snapshot.has_capability(&capability) && !shared.policies.has_policy(&capability) {
            return Err(self.reject(
                decision,
                started,
                ConfigurationError::UnknownCapability(capability),
            ));
        }
        if let Err(e) = shared.selector.check_policy(&policy) {
            return Err(self.reject(decision, started, e));
        }

        let candidates = self.candidates(&snapshot, &request);
        let filtered = match shared
            .evaluator
            .filter(candidates, &policy, request.region.as_ref())
        {
            Ok(filtered) => filtered,
            Err(ineligible) => {
                let excluded = ineligible.excluded.len();
                decision.candidates = reports(&[], &ineligible.excluded);
                decision.relaxed = ineligible.relaxed;
                decision.outcome = DecisionOutcome::NoEligibleProvider;
                decision.decision_latency_us = elapsed_us(started);
                debug!(capability = %capability, excluded, "No eligible provider");
                self.finish(decision);
                return Err(RoutingError::NoEligibleProvider {
                    capability,
                    excluded,
                });
            }
        };

        decision.candidates = reports(&filtered.survivors, &filtered.excluded);
        decision.relaxed = filtered.relaxed;

        let timeout = policy.max_latency().unwrap_or(shared.default_timeout);
        let mut survivors = filtered.survivors;
        let mut attempts = Vec::with_capacity(MAX_ATTEMPTS);

        for attempt in 0..MAX_ATTEMPTS {
            let index = match shared.selector.select(&survivors, &policy) {
                Ok(Some(index)) => index,
                Ok(None) => break,
                Err(e) => {
                    decision.attempts = attempts;
                    return Err(self.reject(decision, started, e));
                }
            };
            let candidate = survivors.remove(index);
            if attempt == 0 {
                decision.decision_latency_us = elapsed_us(started);
            }
            decision.chosen = Some(candidate.id().clone());
            decision.cost = Some(candidate.cost);

            let (record, result) = self.attempt(&candidate, &request, timeout).await;
            attempts.push(record);
            match result {
                Ok(response) => {
                    decision.attempts = attempts;
                    decision.outcome = DecisionOutcome::Routed;
                    let decision = self.finish(decision);
                    return Ok(RoutedResponse {
                        provider: candidate.id().clone(),
                        response,
                        decision,
                    });
                }
                Err(e) => {
                    warn!(
                        capability = %capability,
                        provider = %candidate.id(),
                        attempt = attempt + 1,
                        error = %e,
                        "Dispatch failed"
                    );
                }
            }
        }

        decision.attempts = attempts.clone();
        decision.outcome = DecisionOutcome::NoProviderAvailable;
        if decision.decision_latency_us == 0 {
            decision.decision_latency_us = elapsed_us(started);
        }
        self.finish(decision);
        Err(RoutingError::NoProviderAvailable {
            capability,
            attempts,
        })
    }

    fn candidates(&self, snapshot: &RegistrySnapshot, request: &GatewayRequest) -> Vec<Candidate> {
        let shared = &self.shared;
        snapshot
            .candidates(&request.capability, None)
            .into_iter()
            .map(|instance| {
                let breaker = shared.circuits.breaker(&instance.id);
                shared.circuits.poll_breaker(&instance.id, &breaker);
                Candidate {
                    cost: shared.cost_model.estimate(&instance, &request.units),
                    health: shared.health.health_of(&instance.id),
                    circuit: breaker.state(),
                    admitted: breaker.would_admit(request.probe),
                    rate_limited: !shared.limiter.peek(&instance),
                    instance,
                }
            })
            .collect()
    }

    /// One dispatch attempt against a selected candidate.
    async fn attempt(
        &self,
        candidate: &Candidate,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> (DispatchAttempt, Result<DispatchResponse, DispatchError>) {
        let shared = &self.shared;
        let id = candidate.id().clone();

        let failed = |error: DispatchError| -> (DispatchAttempt, Result<DispatchResponse, DispatchError>) {
            let record = DispatchAttempt {
                provider: id.clone(),
                latency_ms: 0.0,
                success: false,
                error: Some(error.class()),
                detail: Some(error.to_string()),
            };
            (record, Err(error))
        };

        // The registry may have changed since the snapshot was taken
        let Ok(instance) = shared.registry.get(&id) else {
            return failed(DispatchError::ProviderRemoved);
        };
        let admission = shared.circuits.breaker(&id).admit(request.probe);
        if !admission.is_admitted() {
            return failed(DispatchError::CircuitOpen);
        }
        if !shared.limiter.try_acquire(&instance) {
            if admission.holds_slot() {
                shared.release_slot(&id);
            }
            return failed(DispatchError::RateLimited);
        }

        let (latency, result) = self
            .dispatch_bounded(instance, request.clone(), timeout, admission.holds_slot())
            .await;
        let record = DispatchAttempt {
            provider: id,
            latency_ms: latency.as_secs_f64() * 1000.0,
            success: result.is_ok(),
            error: result.as_ref().err().map(DispatchError::class),
            detail: result.as_ref().err().map(ToString::to_string),
        };
        (record, result)
    }

    /// Dispatch in a separate task with a timeout. Dropping the returned
    /// future cancels the dispatch; a cancelled dispatch records nothing and
    /// returns any half-open slot it held.
    async fn dispatch_bounded(
        &self,
        instance: Arc<ProviderInstance>,
        request: GatewayRequest,
        timeout: Duration,
        holds_slot: bool,
    ) -> (Duration, Result<DispatchResponse, DispatchError>) {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        let shared = Arc::clone(&self.shared);
        let id = instance.id.clone();

        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(DispatchError::Cancelled),
                result = tokio::time::timeout(timeout, shared.dispatcher.dispatch(&instance, &request)) => {
                    result.unwrap_or(Err(DispatchError::Timeout(timeout)))
                }
            };
            let latency = started.elapsed();
            if outcome != Err(DispatchError::Cancelled) {
                shared.record_outcome(&instance, &outcome, latency, holds_slot);
            } else {
                debug!(provider = %instance.id, "Dispatch cancelled by caller");
                if holds_slot {
                    shared.release_slot(&instance.id);
                }
            }
            (latency, outcome)
        });

        let joined = handle.await;
        guard.disarm();
        match joined {
            Ok(result) => result,
            Err(e) => {
                if holds_slot {
                    self.shared.release_slot(&id);
                }
                (
                    Duration::ZERO,
                    Err(DispatchError::Network(format!("dispatch task failed: {}", e))),
                )
            }
        }
    }

    fn reject(
        &self,
        mut decision: RoutingDecision,
        started: Instant,
        error: ConfigurationError,
    ) -> RoutingError {
        warn!(capability = %decision.capability, error = %error, "Rejected request");
        decision.outcome = DecisionOutcome::ConfigurationError;
        decision.decision_latency_us = elapsed_us(started);
        self.finish(decision);
        RoutingError::Configuration(error)
    }

    fn finish(&self, decision: RoutingDecision) -> Arc<RoutingDecision> {
        let decision = Arc::new(decision);
        let shared = &self.shared;
        if let Some(metrics) = &shared.metrics {
            metrics.record_decision(
                decision.capability.as_str(),
                decision.mode.as_str(),
                decision.outcome.as_str(),
            );
        }
        shared.broadcast.publish(&decision);
        for sink in &shared.sinks {
            sink.publish(&decision);
        }
        decision
    }

    // ========================================================================
    // Probing
    // ========================================================================

    /// Dispatch an active probe to `id`, bypassing selection.
    pub async fn probe(&self, id: &ProviderId) -> Result<ProbeOutcome, RoutingError> {
        let shared = &self.shared;
        let instance = shared.registry.get(id)?;
        let breaker = shared.circuits.breaker(id);
        shared.circuits.poll_breaker(id, &breaker);
        let admission = breaker.admit(true);
        if !admission.is_admitted() {
            return Ok(ProbeOutcome::Skipped);
        }

        let timeout = shared
            .policies
            .policy_for(&instance.capability)
            .max_latency()
            .unwrap_or(shared.default_timeout);
        let started = tokio::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, shared.dispatcher.probe(&instance))
            .await
            .unwrap_or(Err(DispatchError::Timeout(timeout)));
        shared.record_outcome(&instance, &outcome, started.elapsed(), admission.holds_slot());

        debug!(provider = %id, healthy = outcome.is_ok(), "Probe finished");
        Ok(match outcome {
            Ok(_) => ProbeOutcome::Healthy,
            Err(e) => ProbeOutcome::Failed(e),
        })
    }

    /// Apply cool-down expiry to every circuit.
    pub fn poll_circuits(&self) -> Vec<(ProviderId, Transition)> {
        self.shared.circuits.poll_all()
    }

    /// Providers currently in the half-open state.
    pub fn half_open_providers(&self) -> Vec<ProviderId> {
        self.shared.circuits.half_open()
    }

    /// Force a provider's circuit closed.
    pub fn reset_circuit(&self, id: &ProviderId) -> Result<(), RoutingError> {
        self.shared.registry.get(id)?;
        self.shared.circuits.reset(id);
        self.shared.health.restart_window(id);
        info!(provider = %id, "Circuit reset by operator");
        Ok(())
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Register or replace a provider.
    pub fn upsert_provider(&self, instance: ProviderInstance) -> Result<(), RoutingError> {
        let id = instance.id.clone();
        if let Some(previous) = self.shared.registry.upsert(instance)? {
            if let Ok(current) = self.shared.registry.get(&id) {
                if previous.capability != current.capability {
                    // Rolling stats belong to the old capability's traffic
                    self.shared.purge(&id);
                }
            }
        }
        Ok(())
    }

    /// Remove a provider and drop its health and circuit state.
    pub fn remove_provider(&self, id: &ProviderId) -> Result<Arc<ProviderInstance>, RoutingError> {
        let removed = self.shared.registry.remove(id)?;
        self.shared.purge(id);
        Ok(removed)
    }

    /// Replace the policy of one capability.
    pub fn set_policy(
        &self,
        capability: Capability,
        policy: RoutingPolicy,
    ) -> Result<(), RoutingError> {
        self.shared.selector.check_policy(&policy)?;
        self.shared.policies.set(capability, policy)?;
        Ok(())
    }

    /// Re-apply providers, policies and breaker thresholds from `config`.
    ///
    /// Everything is checked before anything changes.
    pub fn apply_config(&self, config: &Config) -> Result<ReloadSummary, ConfigurationError> {
        let shared = &self.shared;
        let instances = config.provider_instances()?;
        let default_policy = config.default_policy();
        let policies = config.capability_policies();
        shared.selector.check_policy(&default_policy)?;
        for policy in policies.values() {
            shared.selector.check_policy(policy)?;
        }

        shared.policies.replace(default_policy, policies)?;
        let providers = instances.len();
        let removed = shared
            .registry
            .replace_all(instances)
            .map_err(ConfigurationError::from)?;
        shared.circuits.set_config(config.circuit_breaker.clone());
        for id in &removed {
            shared.purge(id);
        }

        info!(providers, removed = removed.len(), "Configuration applied");
        Ok(ReloadSummary { providers, removed })
    }

    /// Make a custom selection strategy available to `custom` policies.
    pub fn register_strategy(&self, strategy: Arc<dyn SelectionStrategy>) {
        self.shared.selector.register_strategy(strategy);
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Health and circuit state of every registered provider.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let shared = &self.shared;
        shared
            .registry
            .snapshot()
            .providers()
            .map(|instance| ProviderStatus {
                provider: instance.id.clone(),
                capability: instance.capability.clone(),
                regions: instance.regions.clone(),
                weight: instance.weight,
                health: shared.health.health_of(&instance.id),
                circuit: shared.circuits.snapshot(&instance.id),
            })
            .collect()
    }

    pub fn health_of(&self, id: &ProviderId) -> ProviderHealth {
        self.shared.health.health_of(id)
    }

    /// Stream of every decision made from now on.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<RoutingDecision>> {
        self.shared.broadcast.subscribe()
    }

    pub fn metrics(&self) -> Option<&RoutingMetrics> {
        self.shared.metrics.as_ref()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.shared.registry
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.shared.policies
    }
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("registry", &self.shared.registry)
            .field("circuits", &self.shared.circuits)
            .field("default_timeout", &self.shared.default_timeout)
            .finish_non_exhaustive()
    }
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Candidate reports sorted by provider id.
fn reports(survivors: &[Candidate], excluded: &[Exclusion]) -> Vec<CandidateReport> {
    let mut reports: Vec<CandidateReport> = survivors
        .iter()
        .map(|c| CandidateReport {
            provider: c.id().clone(),
            cost: c.cost,
            circuit: c.circuit,
            excluded: None,
        })
        .chain(excluded.iter().map(|e| CandidateReport {
            provider: e.candidate.id().clone(),
            cost: e.candidate.cost,
            circuit: e.candidate.circuit,
            excluded: Some(e.reason),
        }))
        .collect();
    reports.sort_by(|a, b| a.provider.cmp(&b.provider));
    reports
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`RoutingEngine`].
pub struct RoutingEngineBuilder {
    dispatcher: Arc<dyn Dispatcher>,
    providers: Vec<ProviderInstance>,
    default_policy: RoutingPolicy,
    policies: BTreeMap<Capability, RoutingPolicy>,
    health: HealthConfig,
    circuit_breaker: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    seed: Option<u64>,
    default_timeout: Duration,
    decision_buffer: usize,
    sinks: Vec<Arc<dyn DecisionSink>>,
    metrics: Option<RoutingMetrics>,
    strategies: Vec<Arc<dyn SelectionStrategy>>,
}

impl RoutingEngineBuilder {
    fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            providers: Vec::new(),
            default_policy: RoutingPolicy::default(),
            policies: BTreeMap::new(),
            health: HealthConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            clock: None,
            seed: None,
            default_timeout: Duration::from_secs(10),
            decision_buffer: 1024,
            sinks: Vec::new(),
            metrics: None,
            strategies: Vec::new(),
        }
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = ProviderInstance>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn provider(mut self, provider: ProviderInstance) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn default_policy(mut self, policy: RoutingPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn policies(mut self, policies: BTreeMap<Capability, RoutingPolicy>) -> Self {
        self.policies.extend(policies);
        self
    }

    pub fn policy(mut self, capability: impl Into<Capability>, policy: RoutingPolicy) -> Self {
        self.policies.insert(capability.into(), policy);
        self
    }

    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Time source for breakers, health windows and rate limits.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed the selector's random source.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Dispatch timeout for policies without a latency bound.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn decision_buffer(mut self, capacity: usize) -> Self {
        self.decision_buffer = capacity;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn metrics(mut self, metrics: RoutingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn build(self) -> Result<RoutingEngine, ConfigurationError> {
        let clock = self.clock.unwrap_or_else(system_clock);

        let selector = match self.seed {
            Some(seed) => WeightedSelector::seeded(seed),
            None => WeightedSelector::new(),
        };
        for strategy in self.strategies {
            selector.register_strategy(strategy);
        }
        selector.check_policy(&self.default_policy)?;
        for policy in self.policies.values() {
            selector.check_policy(policy)?;
        }

        let registry = Arc::new(
            ProviderRegistry::with_providers(self.providers).map_err(ConfigurationError::from)?,
        );
        let policies = Arc::new(PolicyStore::with_policies(self.default_policy, self.policies)?);
        let circuits = Arc::new(CircuitArena::new(
            self.circuit_breaker,
            Arc::clone(&clock),
            self.metrics.clone(),
        ));
        let evaluator = PolicyEvaluator::new(self.health.min_samples);
        let health = HealthMonitor::new(
            self.health,
            Arc::clone(&circuits),
            Arc::clone(&policies),
            Arc::clone(&registry),
            Arc::clone(&clock),
        );

        info!(
            providers = registry.snapshot().len(),
            capabilities = registry.capabilities().len(),
            default_timeout_ms = self.default_timeout.as_millis() as u64,
            "Routing engine ready"
        );

        Ok(RoutingEngine {
            shared: Arc::new(Shared {
                registry,
                policies,
                circuits,
                health,
                limiter: RateLimiter::new(Arc::clone(&clock)),
                evaluator,
                selector,
                cost_model: CostModel::new(),
                dispatcher: self.dispatcher,
                broadcast: BroadcastSink::new(self.decision_buffer),
                sinks: self.sinks,
                metrics: self.metrics,
                default_timeout: self.default_timeout,
                clock,
            }),
        })
    }
}
