//! Passive health monitoring.
//!
//! Every dispatch outcome (and every active probe) is recorded as a
//! [`HealthSample`]. Samples live in a per-provider rolling window bounded by
//! both age and count; aggregates are maintained incrementally so recording
//! and reading are O(1) amortized.
//!
//! Recording also drives the provider's circuit breaker: the outcome is
//! forwarded to the breaker, and once the window holds enough samples the
//! rolling error rate is compared against the threshold of the provider's
//! capability policy. A circuit that closes again starts from an empty
//! window, so failures from before the outage cannot re-trip it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use switchyard_common::{CircuitState, Clock, ErrorClass, ProviderId, TripReason};
use switchyard_config::HealthConfig;

use crate::circuits::CircuitArena;
use crate::policy::PolicyStore;
use crate::registry::ProviderRegistry;

/// Outcome of one dispatch or probe.
#[derive(Debug, Clone)]
pub struct HealthSample {
    pub provider: ProviderId,
    pub at: Instant,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub success: bool,
    pub error_class: Option<ErrorClass>,
    /// Outcome of a dispatch that held a half-open recovery slot
    pub probe: bool,
}

impl HealthSample {
    pub fn success(provider: ProviderId, at: Instant, latency: Duration) -> Self {
        Self {
            provider,
            at,
            timestamp: Utc::now(),
            latency_ms: latency.as_secs_f64() * 1000.0,
            success: true,
            error_class: None,
            probe: false,
        }
    }

    pub fn failure(
        provider: ProviderId,
        at: Instant,
        latency: Duration,
        error_class: ErrorClass,
    ) -> Self {
        Self {
            success: false,
            error_class: Some(error_class),
            ..Self::success(provider, at, latency)
        }
    }

    pub fn as_probe(mut self) -> Self {
        self.probe = true;
        self
    }
}

/// Rolling statistics for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Mean latency over the window; 0 when empty
    pub avg_latency_ms: f64,
    /// Failed fraction of the window; 0 when empty
    pub error_rate: f64,
    pub sample_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

struct WindowEntry {
    at: Instant,
    latency_ms: f64,
    success: bool,
}

struct Window {
    entries: VecDeque<WindowEntry>,
    latency_sum: f64,
    failures: u64,
    last_updated: Option<DateTime<Utc>>,
}

impl Window {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            latency_sum: 0.0,
            failures: 0,
            last_updated: None,
        }
    }

    fn push(&mut self, sample: &HealthSample, max_samples: usize) {
        self.entries.push_back(WindowEntry {
            at: sample.at,
            latency_ms: sample.latency_ms,
            success: sample.success,
        });
        self.latency_sum += sample.latency_ms;
        if !sample.success {
            self.failures += 1;
        }
        self.last_updated = Some(sample.timestamp);
        while self.entries.len() > max_samples {
            self.pop_front();
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.latency_sum = 0.0;
        self.failures = 0;
    }

    fn evict_older_than(&mut self, cutoff: Option<Instant>) {
        let Some(cutoff) = cutoff else {
            return;
        };
        while self.entries.front().is_some_and(|e| e.at < cutoff) {
            self.pop_front();
        }
    }

    fn pop_front(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            self.latency_sum -= entry.latency_ms;
            if !entry.success {
                self.failures -= 1;
            }
        }
        if self.entries.is_empty() {
            // Re-anchor to avoid drift from repeated float subtraction
            self.latency_sum = 0.0;
        }
    }

    fn health(&self) -> ProviderHealth {
        let count = self.entries.len() as u64;
        if count == 0 {
            return ProviderHealth {
                last_updated: self.last_updated,
                ..Default::default()
            };
        }
        ProviderHealth {
            avg_latency_ms: self.latency_sum / count as f64,
            error_rate: self.failures as f64 / count as f64,
            sample_count: count,
            last_updated: self.last_updated,
        }
    }
}

/// Rolling health statistics for every provider.
pub struct HealthMonitor {
    windows: DashMap<ProviderId, Arc<Mutex<Window>>>,
    config: HealthConfig,
    circuits: Arc<CircuitArena>,
    policies: Arc<PolicyStore>,
    registry: Arc<ProviderRegistry>,
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        circuits: Arc<CircuitArena>,
        policies: Arc<PolicyStore>,
        registry: Arc<ProviderRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(
            window_secs = config.window_secs,
            max_samples = config.max_samples,
            min_samples = config.min_samples,
            "Creating health monitor"
        );
        Self {
            windows: DashMap::new(),
            config,
            circuits,
            policies,
            registry,
            clock,
        }
    }

    /// Record an outcome for `provider` and feed it to the circuit breaker.
    ///
    /// Samples for providers no longer in the registry are dropped.
    pub fn record(&self, provider: &ProviderId, sample: HealthSample) {
        let Ok(instance) = self.registry.get(provider) else {
            debug!(provider = %provider, "Dropping health sample for unregistered provider");
            return;
        };

        let window = self.window(provider);
        let health = {
            let mut window = window.lock();
            window.push(&sample, self.config.max_samples);
            window.evict_older_than(self.cutoff());
            window.health()
        };

        trace!(
            provider = %provider,
            success = sample.success,
            latency_ms = sample.latency_ms,
            probe = sample.probe,
            error_rate = health.error_rate,
            samples = health.sample_count,
            "Recorded health sample"
        );

        let breaker = self.circuits.breaker(provider);
        let transition = if sample.success {
            breaker.record_success(sample.probe)
        } else {
            breaker.record_failure()
        };
        if let Some(t) = transition {
            self.circuits.observe(provider, t);
        }

        if transition.is_some_and(|t| t.to == CircuitState::Closed) {
            window.lock().clear();
            debug!(provider = %provider, "Circuit closed, restarting health window");
        } else if health.sample_count >= self.config.min_samples {
            let threshold = self
                .policies
                .policy_for(&instance.capability)
                .error_rate_threshold;
            if health.error_rate > threshold {
                if let Some(t) = breaker.trip(TripReason::ErrorRate(health.error_rate)) {
                    self.circuits.observe(provider, t);
                }
            }
        }

        // The provider may have been removed while we held the window
        if !self.registry.contains(provider) {
            self.windows.remove(provider);
        }
    }

    /// Current rolling statistics. Providers never observed report zeros.
    pub fn health_of(&self, provider: &ProviderId) -> ProviderHealth {
        let Some(window) = self.windows.get(provider).map(|w| Arc::clone(w.value())) else {
            return ProviderHealth::default();
        };
        let mut window = window.lock();
        window.evict_older_than(self.cutoff());
        window.health()
    }

    /// Discard the samples gathered so far, keeping the provider tracked.
    pub fn restart_window(&self, provider: &ProviderId) {
        if let Some(window) = self.windows.get(provider).map(|w| Arc::clone(w.value())) {
            window.lock().clear();
            debug!(provider = %provider, "Restarted health window");
        }
    }

    /// Drop all state for a removed provider.
    pub fn forget(&self, provider: &ProviderId) {
        if self.windows.remove(provider).is_some() {
            debug!(provider = %provider, "Forgot provider health");
        }
    }

    pub fn min_samples(&self) -> u64 {
        self.config.min_samples
    }

    fn window(&self, provider: &ProviderId) -> Arc<Mutex<Window>> {
        if let Some(existing) = self.windows.get(provider) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.windows
                .entry(provider.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Window::new())))
                .value(),
        )
    }

    fn cutoff(&self) -> Option<Instant> {
        self.clock.now().checked_sub(self.config.window())
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("providers", &self.windows.len())
            .field("config", &self.config)
            .finish()
    }
}
