//! Switchyard routing engine.
//!
//! Chooses which upstream provider serves each gateway request and fails
//! over when providers degrade:
//!
//! - **Registry**: copy-on-write catalogue of provider instances
//! - **Health**: rolling latency and error-rate windows per provider
//! - **Circuits**: per-provider breakers with cool-down and probe recovery
//! - **Policy**: per-capability constraints with single-step relaxation
//! - **Selection**: weighted random, argmin and pluggable custom strategies
//! - **Dispatch**: bounded, cancellable outbound calls with one retry
//! - **Decisions**: an audit record for every routed request
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchyard_config::Config;
//! use switchyard_engine::{GatewayRequest, HttpDispatcher, RoutingEngine};
//!
//! let config = Config::from_file("switchyard.toml")?;
//! let dispatcher = Arc::new(HttpDispatcher::new(Duration::from_secs(2))?);
//! let engine = RoutingEngine::from_config(&config, dispatcher)?;
//!
//! let routed = engine
//!     .route(GatewayRequest::new("chat-completion", serde_json::json!({"prompt": "hi"})))
//!     .await?;
//! println!("served by {}", routed.provider);
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod circuits;
pub mod cost;
pub mod decision;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod health;
pub mod policy;
pub mod prober;
pub mod ratelimit;
pub mod registry;
pub mod reload;
pub mod selector;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Engine
pub use engine::{
    ProbeOutcome, ProviderStatus, ReloadSummary, RoutedResponse, RoutingEngine,
    RoutingEngineBuilder,
};

// Errors
pub use errors::{RegistryError, RoutingError};

// Registry and state
pub use circuits::CircuitArena;
pub use health::{HealthMonitor, HealthSample, ProviderHealth};
pub use registry::{ProviderRegistry, RegistrySnapshot};

// Policy and selection
pub use cost::CostModel;
pub use policy::{Candidate, Constraint, ExclusionReason, PolicyEvaluator, PolicyStore};
pub use selector::{PreferenceList, SelectionStrategy, WeightedSelector};

// Dispatch
pub use dispatch::{DispatchError, DispatchResponse, Dispatcher, GatewayRequest, HttpDispatcher};

// Decisions
pub use decision::{
    BroadcastSink, CandidateReport, DecisionOutcome, DecisionSink, DispatchAttempt, LogSink,
    RoutingDecision,
};

// Background work
pub use prober::RecoveryProber;
pub use reload::{DrainCoordinator, InFlight, SignalManager, SignalType};
