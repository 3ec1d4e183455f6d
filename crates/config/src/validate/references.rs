//! Cross-reference validation
//!
//! Validates that policies only refer to providers and capabilities that exist.

use std::collections::HashMap;

use super::{is_capability_scope, ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Validate references between policies and provider registrations
pub fn validate_references(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let capability_of: HashMap<&str, &str> = config
        .providers
        .iter()
        .map(|p| (p.id.as_str(), p.capability.as_str()))
        .collect();

    for (scope, policy) in &config.policies {
        if is_capability_scope(scope) && !capability_of.values().any(|c| *c == scope.as_str()) {
            result.add_warning(ValidationWarning::new(format!(
                "Policy '{}' applies to a capability with no registered providers",
                scope
            )));
        }

        for provider in &policy.preference {
            match capability_of.get(provider.as_str()) {
                None => {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Reference,
                        format!(
                            "Policy '{}' prefers undefined provider '{}'",
                            scope, provider
                        ),
                    ));
                }
                Some(capability) if is_capability_scope(scope) && *capability != scope.as_str() => {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Reference,
                        format!(
                            "Policy '{}' prefers provider '{}' which serves '{}'",
                            scope, provider, capability
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    result
}
