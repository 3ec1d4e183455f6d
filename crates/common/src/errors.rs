//! Configuration error taxonomy shared by the config loader and the engine.

use thiserror::Error;

use crate::ids::{Capability, ProviderId};

/// Operator-facing configuration defects.
///
/// These are fatal: they are surfaced immediately and never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("unknown capability '{0}'")]
    UnknownCapability(Capability),

    #[error("unknown provider '{0}'")]
    UnknownProvider(ProviderId),

    #[error("unknown billing unit '{0}' (expected request, token, minute, image or character)")]
    UnknownBillingUnit(String),

    #[error("unknown routing mode '{0}'")]
    UnknownRoutingMode(String),

    #[error("unknown selection strategy '{0}'")]
    UnknownStrategy(String),

    #[error("malformed policy for '{scope}': {reason}")]
    MalformedPolicy { scope: String, reason: String },

    #[error("invalid provider '{id}': {reason}")]
    InvalidProvider { id: ProviderId, reason: String },
}
