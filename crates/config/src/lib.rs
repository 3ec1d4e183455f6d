//! Configuration loading and validation for Switchyard.
//!
//! Configuration is a single TOML document:
//!
//! ```toml
//! [engine]
//! default_timeout_ms = 10000
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! cooldown_secs = 30
//!
//! [[providers]]
//! id = "openai-us"
//! capability = "chat-completion"
//! endpoint = "https://api.openai.example/v1/chat/completions"
//! weight = 40
//! cost = { amount = 0.000002, unit = "token" }
//!
//! [policies.default]
//! mode = "balanced"
//!
//! [policies."chat-completion"]
//! mode = "lowest-cost"
//! cost_ceiling = 0.01
//! ```
//!
//! Parsing rejects unknown billing units and routing modes. [`Config::validate`]
//! runs field validation and the semantic checks in [`validate`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};
use validator::Validate;

use switchyard_common::{
    AuthType, Capability, CircuitBreakerConfig, ConfigurationError, CostRate, LogFormat,
    ProviderId, ProviderInstance, Region, RoutingPolicy,
};

pub mod validate;

pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Name of the policy entry that applies to capabilities without their own.
pub const DEFAULT_POLICY_KEY: &str = "default";

const EMBEDDED_CONFIG: &str = include_str!("../../../config/switchyard.toml");

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration fields: {0}")]
    Fields(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("configuration has {} error(s): {}", .0.errors.len(), .0.summary())]
    Validation(ValidationResult),
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Provider registrations
    #[serde(default)]
    #[validate(nested)]
    pub providers: Vec<ProviderConfig>,

    /// Routing policies keyed by capability, plus the `default` entry
    #[serde(default)]
    pub policies: BTreeMap<String, RoutingPolicy>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = ?path, "Loading configuration file");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        trace!(
            providers = config.providers.len(),
            policies = config.policies.len(),
            "Parsed configuration"
        );
        Ok(config)
    }

    /// The sample configuration shipped with the binary.
    pub fn default_embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str(EMBEDDED_CONFIG)
    }

    /// Run field validation and semantic checks.
    ///
    /// Warnings do not fail validation; use [`validate::lint_config`] to
    /// surface them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;
        let result = validate::validate_config(self);
        if result.is_ok() {
            Ok(())
        } else {
            Err(ConfigError::Validation(result))
        }
    }

    /// Provider registrations converted to registry instances.
    pub fn provider_instances(&self) -> Result<Vec<ProviderInstance>, ConfigurationError> {
        self.providers
            .iter()
            .map(|p| {
                let instance = p.to_instance();
                instance.check()?;
                Ok(instance)
            })
            .collect()
    }

    /// The global default policy.
    pub fn default_policy(&self) -> RoutingPolicy {
        self.policies
            .get(DEFAULT_POLICY_KEY)
            .cloned()
            .unwrap_or_default()
    }

    /// Policies configured for specific capabilities.
    pub fn capability_policies(&self) -> BTreeMap<Capability, RoutingPolicy> {
        self.policies
            .iter()
            .filter(|(key, _)| key.as_str() != DEFAULT_POLICY_KEY)
            .map(|(key, policy)| (Capability::from(key.as_str()), policy.clone()))
            .collect()
    }

    /// Minimal configuration for tests
    pub fn default_for_testing() -> Self {
        Self::default()
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Engine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Dispatch timeout when the policy has no latency bound
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Seed for the weighted selector; random when absent
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Buffered decision records per subscriber before lagging
    #[serde(default = "default_decision_buffer")]
    pub decision_buffer: usize,

    /// Maximum time to wait for in-flight requests on shutdown
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_decision_buffer() -> usize {
    1024
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            rng_seed: None,
            decision_buffer: default_decision_buffer(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Rolling window length
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Hard cap on samples held per provider
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Samples required before error-rate rules apply
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Active probe tick for half-open providers
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_samples() -> usize {
    1024
}

fn default_min_samples() -> u64 {
    10
}

fn default_probe_interval_secs() -> u64 {
    5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_samples: default_max_samples(),
            min_samples: default_min_samples(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl HealthConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ============================================================================
// Providers
// ============================================================================

/// A provider registration as written by operators.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    #[validate(length(min = 1, message = "provider id must not be empty"))]
    pub id: String,

    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,

    #[validate(length(min = 1, message = "capability must not be empty"))]
    pub capability: String,

    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default)]
    pub auth: AuthType,

    #[validate(url(message = "endpoint must be an absolute URL"))]
    pub endpoint: String,

    pub cost: CostRate,

    #[serde(default = "default_weight")]
    #[validate(range(max = 100, message = "weight must be between 0 and 100"))]
    pub weight: u8,

    #[serde(default = "default_quality")]
    #[validate(range(min = 0.0, max = 1.0, message = "quality must be between 0.0 and 1.0"))]
    pub quality: f64,

    #[serde(default)]
    #[validate(range(min = 1, message = "rate limit must be positive"))]
    pub rate_limit_rps: Option<u32>,

    #[serde(default)]
    pub probe_path: Option<String>,

    #[serde(default)]
    pub credential_env: Option<String>,
}

fn default_weight() -> u8 {
    50
}

fn default_quality() -> f64 {
    0.5
}

impl ProviderConfig {
    /// Convert to the registry representation.
    pub fn to_instance(&self) -> ProviderInstance {
        ProviderInstance {
            id: ProviderId::from(self.id.as_str()),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            capability: Capability::from(self.capability.as_str()),
            regions: self.regions.iter().map(Region::new).collect(),
            auth: self.auth.clone(),
            endpoint: self.endpoint.clone(),
            cost: self.cost.clone(),
            weight: self.weight,
            quality: self.quality,
            rate_limit_rps: self.rate_limit_rps,
            probe_path: self.probe_path.clone(),
            credential_env: self.credential_env.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_common::{BillingUnit, RoutingMode};

    const SAMPLE: &str = r#"
        [engine]
        default_timeout_ms = 2500
        rng_seed = 7

        [circuit_breaker]
        failure_threshold = 4
        cooldown_secs = 15

        [[providers]]
        id = "p1"
        capability = "chat-completion"
        regions = ["US-East"]
        endpoint = "https://p1.example/v1/chat"
        weight = 40
        cost = { amount = 0.000002, unit = "token" }
        auth = { type = "bearer" }
        credential_env = "P1_KEY"

        [[providers]]
        id = "p2"
        capability = "chat-completion"
        endpoint = "https://p2.example/v1/chat"
        cost = { amount = 0.002, unit = "request" }

        [policies.default]
        mode = "balanced"

        [policies."chat-completion"]
        mode = "lowest-cost"
        cost_ceiling = 0.01
        max_latency_ms = 800
        auto_failover = false
    "#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.default_timeout(), Duration::from_millis(2500));
        assert_eq!(config.engine.rng_seed, Some(7));
        assert_eq!(config.circuit_breaker.failure_threshold, 4);
        assert_eq!(config.circuit_breaker.success_threshold, 3);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].weight, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_instances() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let instances = config.provider_instances().unwrap();
        assert_eq!(instances[0].id.as_str(), "p1");
        assert_eq!(instances[0].name, "p1");
        assert_eq!(instances[0].regions, vec![Region::from("us-east")]);
        assert_eq!(instances[0].cost.unit, BillingUnit::Token);
        assert_eq!(instances[0].auth, AuthType::Bearer);
    }

    #[test]
    fn test_policies_split_default_and_capability() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.default_policy().mode, RoutingMode::Balanced);

        let policies = config.capability_policies();
        let chat = &policies[&Capability::from("chat-completion")];
        assert_eq!(chat.mode, RoutingMode::LowestCost);
        assert_eq!(chat.max_latency_ms, Some(800));
        assert!(!chat.auto_failover);
        assert!(!policies.contains_key(&Capability::from(DEFAULT_POLICY_KEY)));
    }

    #[test]
    fn test_unknown_billing_unit_rejected_at_parse() {
        let text = r#"
            [[providers]]
            id = "p1"
            capability = "chat"
            endpoint = "https://p1.example"
            cost = { amount = 0.1, unit = "furlong" }
        "#;
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("furlong"));
    }

    #[test]
    fn test_unknown_mode_rejected_at_parse() {
        let text = r#"
            [policies.default]
            mode = "cheapest"
        "#;
        assert!(Config::from_toml_str(text).is_err());
    }

    #[test]
    fn test_field_validation() {
        let text = r#"
            [[providers]]
            id = "p1"
            capability = "chat"
            endpoint = "not a url"
            cost = { amount = 0.1, unit = "request" }
        "#;
        let config = Config::from_toml_str(text).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Fields(_))));
    }

    #[test]
    fn test_embedded_config_is_valid() {
        let config = Config::default_embedded().unwrap();
        assert!(!config.providers.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchyard.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.providers.len(), 2);

        let missing = Config::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
