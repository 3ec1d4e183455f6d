//! Common types and utilities shared by the Switchyard crates.
//!
//! - **Identifiers**: type-safe provider, capability, region and decision ids
//! - **Domain types**: provider instances, routing policies, circuit states
//! - **Circuit breaker**: per-provider tagged-enum state machine
//! - **Cost types**: billing units, rates and request units
//! - **Observability**: tracing setup and Prometheus metrics

pub mod circuit_breaker;
pub mod clock;
pub mod cost;
pub mod errors;
pub mod ids;
pub mod observability;
pub mod types;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitSnapshot, Transition, TripReason};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use cost::{BillingUnit, CostRate, RequestUnits};
pub use errors::ConfigurationError;
pub use ids::{Capability, DecisionId, ProviderId, Region};
pub use observability::{init_tracing, LogFormat, RoutingMetrics};
pub use types::{
    AuthType, CircuitBreakerConfig, CircuitState, ErrorClass, ProviderInstance, RoutingMode,
    RoutingPolicy,
};
