//! Semantic configuration validation.
//!
//! Field-level checks live on the config structs (`validator` derive). This
//! module covers rules that span fields or entries: duplicate provider ids,
//! policy consistency, dangling references, breaker and health settings.

mod endpoints;
mod lint;
mod references;

pub use endpoints::validate_endpoints;
pub use lint::lint_config;
pub use references::validate_references;

use std::collections::HashSet;
use std::fmt;

use crate::{Config, DEFAULT_POLICY_KEY};

/// Area of the configuration an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Policy,
    CircuitBreaker,
    Health,
    Reference,
    Network,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Provider => "provider",
            ErrorCategory::Policy => "policy",
            ErrorCategory::CircuitBreaker => "circuit-breaker",
            ErrorCategory::Health => "health",
            ErrorCategory::Reference => "reference",
            ErrorCategory::Network => "network",
        };
        f.write_str(name)
    }
}

/// A validation failure.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A non-fatal finding.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Accumulated errors and warnings.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors joined into a single line
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Run all synchronous semantic checks.
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.id.as_str()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Provider,
                format!("Provider '{}' is defined more than once", provider.id),
            ));
        }
        if let Err(e) = provider.to_instance().check() {
            result.add_error(ValidationError::new(ErrorCategory::Provider, e.to_string()));
        }
    }

    for (scope, policy) in &config.policies {
        if let Err(e) = policy.check(scope) {
            result.add_error(ValidationError::new(ErrorCategory::Policy, e.to_string()));
        }
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::CircuitBreaker,
            "failure_threshold must be at least 1",
        ));
    }
    if breaker.success_threshold == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::CircuitBreaker,
            "success_threshold must be at least 1",
        ));
    }
    if breaker.half_open_max_probes < breaker.success_threshold {
        result.add_error(ValidationError::new(
            ErrorCategory::CircuitBreaker,
            format!(
                "half_open_max_probes ({}) is below success_threshold ({}); half-open circuits could never close",
                breaker.half_open_max_probes, breaker.success_threshold
            ),
        ));
    }

    let health = &config.health;
    if health.window_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Health,
            "window_secs must be at least 1",
        ));
    }
    if health.max_samples == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Health,
            "max_samples must be at least 1",
        ));
    }
    if health.probe_interval_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Health,
            "probe_interval_secs must be at least 1",
        ));
    }

    result.merge(validate_references(config));
    result
}

/// Whether a policy key names a specific capability.
pub(crate) fn is_capability_scope(scope: &str) -> bool {
    scope != DEFAULT_POLICY_KEY
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_common::{CostRate, RoutingPolicy};

    pub(crate) fn provider(id: &str, capability: &str) -> crate::ProviderConfig {
        crate::ProviderConfig {
            id: id.to_string(),
            name: None,
            capability: capability.to_string(),
            regions: Vec::new(),
            auth: Default::default(),
            endpoint: format!("https://{}.example", id),
            cost: CostRate::per_request(0.002),
            weight: 50,
            quality: 0.5,
            rate_limit_rps: None,
            probe_path: Some("/health".to_string()),
            credential_env: None,
        }
    }

    #[test]
    fn test_duplicate_provider_ids() {
        let mut config = Config::default_for_testing();
        config.providers = vec![provider("p1", "chat"), provider("p1", "chat")];

        let result = validate_config(&config);
        assert!(!result.is_ok());
        assert!(result.errors[0].message.contains("more than once"));
        assert_eq!(result.errors[0].category, ErrorCategory::Provider);
    }

    #[test]
    fn test_malformed_policy() {
        let mut config = Config::default_for_testing();
        config.policies.insert(
            "chat".to_string(),
            RoutingPolicy {
                error_rate_threshold: 1.5,
                ..Default::default()
            },
        );

        let result = validate_config(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.category == ErrorCategory::Policy));
    }

    #[test]
    fn test_probe_budget_below_success_threshold() {
        let mut config = Config::default_for_testing();
        config.circuit_breaker.half_open_max_probes = 1;

        let result = validate_config(&config);
        assert!(result.summary().contains("could never close"));
    }

    #[test]
    fn test_error_display() {
        let error = ValidationError::new(ErrorCategory::Health, "window_secs must be at least 1");
        insta::assert_snapshot!(error.to_string(), @"[health] window_secs must be at least 1");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default_for_testing()).is_ok());
    }
}
