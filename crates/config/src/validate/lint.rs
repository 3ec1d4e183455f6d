//! Configuration linting.
//!
//! Flags setups that load and validate but will route poorly: capabilities
//! with no failover target, providers that can never be probed, and similar.

use std::collections::BTreeMap;

use super::{is_capability_scope, ValidationResult, ValidationWarning};
use crate::Config;
use switchyard_common::RoutingMode;

/// Warnings for a configuration that already passed validation.
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let mut by_capability: BTreeMap<&str, Vec<&crate::ProviderConfig>> = BTreeMap::new();
    for provider in &config.providers {
        by_capability
            .entry(provider.capability.as_str())
            .or_default()
            .push(provider);
    }

    for (capability, providers) in &by_capability {
        // Single provider means no failover target
        if providers.len() == 1 {
            result.add_warning(ValidationWarning::new(format!(
                "Capability '{}' has only one provider (no failover possible)",
                capability
            )));
        }

        // Balanced routing over all-zero weights degrades to uniform
        if providers.iter().all(|p| p.weight == 0) {
            result.add_warning(ValidationWarning::new(format!(
                "All providers of capability '{}' have weight 0 (balanced mode will pick uniformly)",
                capability
            )));
        }

        if !config.policies.contains_key(*capability) {
            result.add_warning(ValidationWarning::new(format!(
                "Capability '{}' has no policy and uses the default policy",
                capability
            )));
        }
    }

    for provider in &config.providers {
        // Half-open recovery needs something to probe
        if provider.probe_path.is_none() {
            result.add_warning(ValidationWarning::new(format!(
                "Provider '{}' has no probe path (probes will replay an empty request to the endpoint)",
                provider.id
            )));
        }

        if provider.credential_env.is_none()
            && provider.auth != switchyard_common::AuthType::None
        {
            result.add_warning(ValidationWarning::new(format!(
                "Provider '{}' requires authentication but has no credential_env",
                provider.id
            )));
        }

        if let Some(var) = &provider.credential_env {
            if std::env::var_os(var).is_none() {
                result.add_warning(ValidationWarning::new(format!(
                    "Provider '{}' credential variable '{}' is not set",
                    provider.id, var
                )));
            }
        }
    }

    for (scope, policy) in &config.policies {
        // Without a latency bound the engine default timeout applies
        if policy.max_latency_ms.is_none() {
            result.add_warning(ValidationWarning::new(format!(
                "Policy '{}' has no max latency (engine default timeout of {}ms applies)",
                scope, config.engine.default_timeout_ms
            )));
        }

        if policy.mode == RoutingMode::RegionLocked && policy.preferred_region.is_none() {
            result.add_warning(ValidationWarning::new(format!(
                "Policy '{}' is region-locked but has no preferred region (behaves as balanced)",
                scope
            )));
        }

        if !policy.auto_failover && is_capability_scope(scope) {
            if let Some(providers) = by_capability.get(scope.as_str()) {
                if providers.len() > 1 && policy.cost_ceiling.is_some() {
                    result.add_warning(ValidationWarning::new(format!(
                        "Policy '{}' disables auto-failover with a cost ceiling; requests fail when every provider is over budget",
                        scope
                    )));
                }
            }
        }
    }

    if !config.metrics.enabled {
        result.add_warning(ValidationWarning::new(
            "Metrics are disabled (recommended for production monitoring)".to_string(),
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::tests::provider;
    use switchyard_common::RoutingPolicy;

    #[test]
    fn test_lint_single_provider() {
        let mut config = Config::default_for_testing();
        config.providers = vec![provider("p1", "chat")];

        let result = lint_config(&config);

        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("no failover possible")));
    }

    #[test]
    fn test_lint_zero_weights() {
        let mut config = Config::default_for_testing();
        let mut p1 = provider("p1", "chat");
        let mut p2 = provider("p2", "chat");
        p1.weight = 0;
        p2.weight = 0;
        config.providers = vec![p1, p2];

        let result = lint_config(&config);

        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("weight 0")));
    }

    #[test]
    fn test_lint_missing_latency_bound() {
        let mut config = Config::default_for_testing();
        config
            .policies
            .insert("chat".to_string(), RoutingPolicy::default());

        let result = lint_config(&config);

        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("no max latency")));
    }

    #[test]
    fn test_lint_missing_probe_path() {
        let mut config = Config::default_for_testing();
        let mut p1 = provider("p1", "chat");
        p1.probe_path = None;
        config.providers = vec![p1];

        let result = lint_config(&config);

        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("no probe path")));
    }
}
