//! Engine error types.

use thiserror::Error;

use switchyard_common::{Capability, ConfigurationError, ProviderId};

use crate::decision::DispatchAttempt;

/// Registry lookups and mutations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("provider '{0}' is not registered")]
    NotFound(ProviderId),

    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

impl From<RegistryError> for ConfigurationError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ConfigurationError::UnknownProvider(id),
            RegistryError::Invalid(inner) => inner,
        }
    }
}

/// Why a request could not be routed.
#[derive(Error, Debug, Clone)]
pub enum RoutingError {
    /// Operator configuration is wrong; never retried
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// No candidate survived policy and circuit filtering
    #[error("no eligible provider for '{capability}' ({excluded} candidate(s) excluded)")]
    NoEligibleProvider {
        capability: Capability,
        excluded: usize,
    },

    /// Every dispatch attempt failed
    #[error("no provider available for '{capability}' after {} attempt(s)", .attempts.len())]
    NoProviderAvailable {
        capability: Capability,
        attempts: Vec<DispatchAttempt>,
    },
}

impl RoutingError {
    /// Short label used for metrics and decision outcomes.
    pub fn outcome(&self) -> &'static str {
        match self {
            RoutingError::Configuration(_) => "configuration_error",
            RoutingError::NoEligibleProvider { .. } => "no_eligible_provider",
            RoutingError::NoProviderAvailable { .. } => "no_provider_available",
        }
    }
}

impl From<RegistryError> for RoutingError {
    fn from(err: RegistryError) -> Self {
        RoutingError::Configuration(err.into())
    }
}
