//! Circuit breaker for isolating failing providers.
//!
//! Each provider gets its own breaker. The state is an explicit tagged enum
//! ([`Phase`]) guarded by a per-breaker lock, so every transition is checked
//! against the current phase and illegal transitions cannot be expressed.
//!
//! # Transitions
//!
//! - **Closed → Open**: consecutive failures reach `failure_threshold`, or the
//!   health monitor reports an error rate above the policy threshold
//! - **Open → HalfOpen**: only once `cooldown` has elapsed since opening
//! - **HalfOpen → Closed**: `success_threshold` consecutive probe successes
//! - **HalfOpen → Open**: any failure
//!
//! # Performance
//!
//! The lock is held for a handful of field updates and never across an await
//! point. Contention is bounded by the traffic to a single provider.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::clock::{system_clock, Clock};
use crate::types::{CircuitBreakerConfig, CircuitState};

// ============================================================================
// Phase
// ============================================================================

/// Internal state with the data each state needs.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        since: Instant,
    },
    HalfOpen {
        since: Instant,
        consecutive_successes: u32,
        /// Slots handed out this episode, bounded by `half_open_max_probes`
        probes_admitted: u32,
        /// Admitted probes that have not reported an outcome yet
        probes_in_flight: u32,
    },
}

impl Phase {
    fn state(&self) -> CircuitState {
        match self {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Why a closed circuit was opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TripReason {
    ConsecutiveFailures(u32),
    ErrorRate(f64),
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit
    Admitted,
    /// One of the half-open recovery slots. The holder reports the outcome
    /// with `probe = true`, or hands the slot back.
    ProbeSlot,
    Denied,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self != Admission::Denied
    }

    pub fn holds_slot(self) -> bool {
        self == Admission::ProbeSlot
    }
}

/// Observed state change, returned to callers so they can update metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Point-in-time copy of a breaker's state for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the last state transition
    pub since_transition_ms: u64,
    /// Number of transitions since creation
    pub transitions: u64,
}

struct Inner {
    phase: Phase,
    config: CircuitBreakerConfig,
    last_transition: Instant,
    transitions: u64,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Per-provider circuit breaker.
///
/// # Example
///
/// ```ignore
/// let breaker = CircuitBreaker::with_name(CircuitBreakerConfig::default(), "openai-us");
///
/// if breaker.admits(false) {
///     match dispatch().await {
///         Ok(_) => breaker.record_success(false),
///         Err(_) => breaker.record_failure(),
///     };
/// }
/// ```
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    name: Option<String>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock(), None)
    }

    /// Create a new circuit breaker with a name for logging
    pub fn with_name(config: CircuitBreakerConfig, name: impl Into<String>) -> Self {
        Self::with_clock(config, system_clock(), Some(name.into()))
    }

    /// Create a breaker reading time from `clock`
    pub fn with_clock(
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        name: Option<String>,
    ) -> Self {
        debug!(
            name = ?name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            cooldown_secs = config.cooldown_secs,
            half_open_max_probes = config.half_open_max_probes,
            "Creating circuit breaker"
        );

        let now = clock.now();
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Closed {
                    consecutive_failures: 0,
                },
                config,
                last_transition: now,
                transitions: 0,
            }),
            clock,
            name,
        }
    }

    /// Replace the thresholds in place. The current phase and its counters
    /// are kept; the new values apply from the next admission or outcome.
    pub fn set_config(&self, config: CircuitBreakerConfig) {
        let mut inner = self.inner.lock();
        if inner.config != config {
            debug!(
                name = ?self.name,
                failure_threshold = config.failure_threshold,
                success_threshold = config.success_threshold,
                cooldown_secs = config.cooldown_secs,
                half_open_max_probes = config.half_open_max_probes,
                "Updating circuit breaker thresholds"
            );
            inner.config = config;
        }
    }

    /// Thresholds currently in force
    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.lock().config.clone()
    }

    /// Current state, applying the Open → HalfOpen transition if the
    /// cool-down has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner);
        inner.phase.state()
    }

    /// Apply time-based transitions. Returns the transition if one happened.
    pub fn poll(&self) -> Option<Transition> {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner)
    }

    /// Whether a request may be dispatched to this provider.
    ///
    /// Closed circuits admit everything. Half-open circuits admit only probe
    /// requests, up to `half_open_max_probes` per episode. Open circuits
    /// admit nothing.
    pub fn admits(&self, probe: bool) -> bool {
        self.admit(probe).is_admitted()
    }

    /// Admission check that also reports whether a half-open slot was taken.
    /// A slot must later be settled through
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure), or handed back with
    /// [`release_probe`](Self::release_probe).
    pub fn admit(&self, probe: bool) -> Admission {
        let mut guard = self.inner.lock();
        self.poll_locked(&mut guard);
        let inner = &mut *guard;
        let max_probes = inner.config.half_open_max_probes;
        match &mut inner.phase {
            Phase::Closed { .. } => Admission::Admitted,
            Phase::Open { .. } => {
                trace!(name = ?self.name, state = "open", "Circuit breaker check: blocked");
                Admission::Denied
            }
            Phase::HalfOpen {
                probes_admitted,
                probes_in_flight,
                ..
            } => {
                if !probe {
                    trace!(name = ?self.name, state = "half-open", "Non-probe request withheld");
                    return Admission::Denied;
                }
                let allowed = *probes_admitted < max_probes;
                if allowed {
                    *probes_admitted += 1;
                    *probes_in_flight += 1;
                }
                trace!(
                    name = ?self.name,
                    probe_num = *probes_admitted,
                    max_probes = max_probes,
                    allowed = allowed,
                    "Circuit breaker half-open probe check"
                );
                if allowed {
                    Admission::ProbeSlot
                } else {
                    Admission::Denied
                }
            }
        }
    }

    /// Whether the circuit would admit a request, without consuming a
    /// half-open probe slot.
    pub fn would_admit(&self, probe: bool) -> bool {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner);
        match inner.phase {
            Phase::Closed { .. } => true,
            Phase::Open { .. } => false,
            Phase::HalfOpen {
                probes_admitted, ..
            } => probe && probes_admitted < inner.config.half_open_max_probes,
        }
    }

    /// Hand back a half-open slot whose probe ended without a verdict
    /// (cancelled, rate limited locally, or failed for a reason that says
    /// nothing about the provider). No effect outside half-open or when no
    /// probe is outstanding.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if let Phase::HalfOpen {
            probes_admitted,
            probes_in_flight,
            ..
        } = &mut inner.phase
        {
            if *probes_in_flight > 0 {
                *probes_in_flight -= 1;
                *probes_admitted = probes_admitted.saturating_sub(1);
                trace!(
                    name = ?self.name,
                    probes_admitted = *probes_admitted,
                    "Released half-open probe slot"
                );
            }
        }
    }

    /// Record a successful request. `probe` marks the outcome of a request
    /// admitted as a probe; only those count towards closing a half-open
    /// circuit.
    pub fn record_success(&self, probe: bool) -> Option<Transition> {
        let mut guard = self.inner.lock();
        let now = self.clock.now();
        let inner = &mut *guard;
        let success_threshold = inner.config.success_threshold;
        match &mut inner.phase {
            Phase::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures = 0;
                None
            }
            Phase::Open { .. } => {
                // Late outcome of a request admitted before the circuit opened
                trace!(name = ?self.name, "Ignoring success while open");
                None
            }
            Phase::HalfOpen {
                consecutive_successes,
                probes_in_flight,
                ..
            } => {
                if !probe || *probes_in_flight == 0 {
                    trace!(name = ?self.name, "Ignoring success not admitted as a half-open probe");
                    return None;
                }
                *probes_in_flight -= 1;
                *consecutive_successes += 1;
                trace!(
                    name = ?self.name,
                    consecutive_successes = *consecutive_successes,
                    success_threshold = success_threshold,
                    "Recorded half-open success"
                );
                if *consecutive_successes >= success_threshold {
                    Some(self.transition(
                        inner,
                        Phase::Closed {
                            consecutive_failures: 0,
                        },
                        now,
                    ))
                } else {
                    None
                }
            }
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self) -> Option<Transition> {
        let mut guard = self.inner.lock();
        let now = self.clock.now();
        let inner = &mut *guard;
        let failure_threshold = inner.config.failure_threshold;
        match &mut inner.phase {
            Phase::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                let failures = *consecutive_failures;
                trace!(
                    name = ?self.name,
                    consecutive_failures = failures,
                    failure_threshold = failure_threshold,
                    "Recorded failure"
                );
                if failures >= failure_threshold {
                    self.log_trip(TripReason::ConsecutiveFailures(failures));
                    Some(self.transition(inner, Phase::Open { since: now }, now))
                } else {
                    None
                }
            }
            Phase::Open { .. } => None,
            Phase::HalfOpen { .. } => {
                debug!(name = ?self.name, "Failure in half-open state, re-opening circuit");
                Some(self.transition(inner, Phase::Open { since: now }, now))
            }
        }
    }

    /// Open a closed circuit because the rolling error rate crossed the
    /// policy threshold. No effect in any other state.
    pub fn trip(&self, reason: TripReason) -> Option<Transition> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        match inner.phase {
            Phase::Closed { .. } => {
                self.log_trip(reason);
                Some(self.transition(&mut inner, Phase::Open { since: now }, now))
            }
            _ => None,
        }
    }

    /// Force the circuit closed (operator override).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        inner.phase = Phase::Closed {
            consecutive_failures: 0,
        };
        inner.last_transition = now;
        inner.transitions += 1;
        info!(name = ?self.name, "Circuit breaker reset");
    }

    /// Consecutive failures while closed
    pub fn consecutive_failures(&self) -> u32 {
        match self.inner.lock().phase {
            Phase::Closed {
                consecutive_failures,
            } => consecutive_failures,
            _ => 0,
        }
    }

    /// Point-in-time view for status queries.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.inner.lock();
        self.poll_locked(&mut inner);
        let now = self.clock.now();
        let (consecutive_failures, consecutive_successes) = match inner.phase {
            Phase::Closed {
                consecutive_failures,
            } => (consecutive_failures, 0),
            Phase::Open { .. } => (0, 0),
            Phase::HalfOpen {
                consecutive_successes,
                ..
            } => (0, consecutive_successes),
        };
        CircuitSnapshot {
            state: inner.phase.state(),
            consecutive_failures,
            consecutive_successes,
            since_transition_ms: now.saturating_duration_since(inner.last_transition).as_millis()
                as u64,
            transitions: inner.transitions,
        }
    }

    // ========================================================================
    // State Transitions (caller holds the lock)
    // ========================================================================

    fn poll_locked(&self, inner: &mut Inner) -> Option<Transition> {
        if let Phase::Open { since } = inner.phase {
            let now = self.clock.now();
            let elapsed = now.saturating_duration_since(since);
            if elapsed >= inner.config.cooldown() {
                trace!(
                    name = ?self.name,
                    elapsed_secs = elapsed.as_secs(),
                    "Cool-down elapsed, transitioning to half-open"
                );
                return Some(self.transition(
                    inner,
                    Phase::HalfOpen {
                        since: now,
                        consecutive_successes: 0,
                        probes_admitted: 0,
                        probes_in_flight: 0,
                    },
                    now,
                ));
            }
        }
        None
    }
    fn transition(&self, inner: &mut Inner, to: Phase, now: Instant) -> Transition {
        let from = inner.phase.state();
        inner.phase = to;
        inner.last_transition = now;
        inner.transitions += 1;
        let to = to.state();

        match to {
            CircuitState::Open => warn!(name = ?self.name, from = %from, "Circuit breaker opened"),
            CircuitState::HalfOpen => info!(name = ?self.name, "Circuit breaker half-open"),
            CircuitState::Closed => info!(name = ?self.name, from = %from, "Circuit breaker closed"),
        }

        Transition { from, to }
    }

    fn log_trip(&self, reason: TripReason) {
        match reason {
            TripReason::ConsecutiveFailures(n) => {
                debug!(name = ?self.name, consecutive_failures = n, "Tripping on consecutive failures")
            }
            TripReason::ErrorRate(rate) => {
                debug!(name = ?self.name, error_rate = rate, "Tripping on rolling error rate")
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().phase.state())
            .finish()
    }
}
