//! Core domain types shared across Switchyard crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cost::CostRate;
use crate::errors::ConfigurationError;
use crate::ids::{Capability, ProviderId, Region};

// ============================================================================
// Provider Instance
// ============================================================================

/// A concrete upstream endpoint/account offering a capability.
///
/// Owned exclusively by the provider registry. Everything else refers to a
/// provider through its [`ProviderId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub id: ProviderId,
    pub name: String,
    pub capability: Capability,
    /// Regions this instance serves
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub auth: AuthType,
    /// Base endpoint requests are dispatched to
    pub endpoint: String,
    pub cost: CostRate,
    /// Relative routing weight (0-100)
    #[serde(default = "default_weight")]
    pub weight: u8,
    /// Operator-supplied static quality score, higher is better
    #[serde(default = "default_quality")]
    pub quality: f64,
    /// Maximum sustained requests per second, unlimited when absent
    #[serde(default)]
    pub rate_limit_rps: Option<u32>,
    /// Path appended to `endpoint` for active probes
    #[serde(default)]
    pub probe_path: Option<String>,
    /// Environment variable holding the credential for `auth`
    #[serde(default)]
    pub credential_env: Option<String>,
}

fn default_weight() -> u8 {
    50
}

fn default_quality() -> f64 {
    0.5
}

impl ProviderInstance {
    /// Minimal instance, mostly useful for tests and programmatic registration.
    pub fn new(
        id: impl Into<ProviderId>,
        capability: impl Into<Capability>,
        endpoint: impl Into<String>,
        cost: CostRate,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            capability: capability.into(),
            regions: Vec::new(),
            auth: AuthType::None,
            endpoint: endpoint.into(),
            cost,
            weight: default_weight(),
            quality: default_quality(),
            rate_limit_rps: None,
            probe_path: None,
            credential_env: None,
        }
    }

    pub fn with_weight(mut self, weight: u8) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_regions<I, R>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Region>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_rate_limit(mut self, rps: u32) -> Self {
        self.rate_limit_rps = Some(rps);
        self
    }

    /// Whether the instance serves `region`. Instances without a region set
    /// are treated as global.
    pub fn serves_region(&self, region: &Region) -> bool {
        self.regions.is_empty() || self.regions.contains(region)
    }

    /// Check static invariants that must hold at registration time.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidProvider {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.as_str().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.weight > 100 {
            return Err(invalid("weight must be between 0 and 100"));
        }
        if !self.cost.amount.is_finite() || self.cost.amount < 0.0 {
            return Err(invalid("cost amount must be a non-negative number"));
        }
        if !self.quality.is_finite() {
            return Err(invalid("quality must be a finite number"));
        }
        if self.rate_limit_rps == Some(0) {
            return Err(invalid("rate limit must be positive when set"));
        }
        Ok(())
    }
}

/// How requests to a provider are authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthType {
    /// No credentials
    #[default]
    None,
    /// `Authorization: Bearer <credential>`
    Bearer,
    /// Credential sent in a provider-specific header
    ApiKeyHeader { header: String },
    /// `Authorization: Basic <base64(credential)>`, credential is `user:pass`
    Basic,
}

// ============================================================================
// Routing Policy
// ============================================================================

/// Operator-selected strategy for ranking eligible candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    /// Weighted random among eligible candidates
    #[default]
    Balanced,
    LowestCost,
    LowestLatency,
    HighestQuality,
    /// Prefer the policy's preferred region, then balanced over the rest
    RegionLocked,
    /// Operator-supplied strategy
    Custom,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Balanced => "balanced",
            RoutingMode::LowestCost => "lowest-cost",
            RoutingMode::LowestLatency => "lowest-latency",
            RoutingMode::HighestQuality => "highest-quality",
            RoutingMode::RegionLocked => "region-locked",
            RoutingMode::Custom => "custom",
        }
    }
}

impl FromStr for RoutingMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "balanced" => Ok(RoutingMode::Balanced),
            "lowest-cost" => Ok(RoutingMode::LowestCost),
            "lowest-latency" => Ok(RoutingMode::LowestLatency),
            "highest-quality" => Ok(RoutingMode::HighestQuality),
            "region-locked" => Ok(RoutingMode::RegionLocked),
            "custom" => Ok(RoutingMode::Custom),
            _ => Err(ConfigurationError::UnknownRoutingMode(s.to_string())),
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds a candidate must satisfy to be eligible, plus the routing mode.
///
/// Set by operators, read by the policy evaluator and selector, never
/// mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub mode: RoutingMode,

    /// Candidates cheaper than this per request are excluded
    #[serde(default)]
    pub cost_floor: Option<f64>,

    /// Candidates more expensive than this per request are excluded
    #[serde(default)]
    pub cost_ceiling: Option<f64>,

    /// Rolling latency bound; also the dispatch timeout
    #[serde(default)]
    pub max_latency_ms: Option<u64>,

    /// Rolling error rate (0.0-1.0) above which candidates are excluded and
    /// circuits trip
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Relax one constraint when nothing is eligible
    #[serde(default = "default_true")]
    pub auto_failover: bool,

    /// Region favoured by `region-locked` mode
    #[serde(default)]
    pub preferred_region: Option<Region>,

    /// Region lock: when non-empty, only providers serving one of these
    /// regions are eligible
    #[serde(default)]
    pub allowed_regions: Vec<Region>,

    /// Ordered provider preference used by `custom` mode
    #[serde(default)]
    pub preference: Vec<ProviderId>,

    /// Named custom selection strategy (defaults to the preference list)
    #[serde(default)]
    pub strategy: Option<String>,
}

fn default_error_rate_threshold() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Balanced,
            cost_floor: None,
            cost_ceiling: None,
            max_latency_ms: None,
            error_rate_threshold: default_error_rate_threshold(),
            auto_failover: true,
            preferred_region: None,
            allowed_regions: Vec::new(),
            preference: Vec::new(),
            strategy: None,
        }
    }
}

impl RoutingPolicy {
    pub fn with_mode(mut self, mode: RoutingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_latency(&self) -> Option<Duration> {
        self.max_latency_ms.map(Duration::from_millis)
    }

    /// Check the policy is internally consistent.
    pub fn check(&self, scope: &str) -> Result<(), ConfigurationError> {
        let malformed = |reason: String| ConfigurationError::MalformedPolicy {
            scope: scope.to_string(),
            reason,
        };
        if let (Some(floor), Some(ceiling)) = (self.cost_floor, self.cost_ceiling) {
            if floor > ceiling {
                return Err(malformed(format!(
                    "cost floor {} exceeds cost ceiling {}",
                    floor, ceiling
                )));
            }
        }
        for (name, bound) in [("cost floor", self.cost_floor), ("cost ceiling", self.cost_ceiling)] {
            if let Some(v) = bound {
                if !v.is_finite() || v < 0.0 {
                    return Err(malformed(format!("{} must be a non-negative number", name)));
                }
            }
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(malformed(format!(
                "error rate threshold {} must be between 0.0 and 1.0",
                self.error_rate_threshold
            )));
        }
        if self.max_latency_ms == Some(0) {
            return Err(malformed("max latency must be positive".to_string()));
        }
        if self.mode == RoutingMode::Custom && self.preference.is_empty() && self.strategy.is_none() {
            return Err(malformed(
                "custom mode requires a preference list or a named strategy".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive probe successes that close a half-open circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time an open circuit waits before admitting probes
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Probes admitted per half-open episode
    #[serde(default = "default_half_open_max_probes")]
    pub half_open_max_probes: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_half_open_max_probes() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_secs: default_cooldown_secs(),
            half_open_max_probes: default_half_open_max_probes(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Public view of a circuit's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Classes
// ============================================================================

/// Classification of a failed dispatch, carried on health samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    Network,
    /// Provider answered with a non-2xx status
    UpstreamStatus,
    /// Provider was removed while the decision was in flight
    ProviderRemoved,
    RateLimited,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::Network => "network",
            ErrorClass::UpstreamStatus => "upstream_status",
            ErrorClass::ProviderRemoved => "provider_removed",
            ErrorClass::RateLimited => "rate_limited",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::BillingUnit;

    #[test]
    fn test_routing_mode_parse() {
        assert_eq!("lowest-cost".parse::<RoutingMode>().unwrap(), RoutingMode::LowestCost);
        assert_eq!("Region_Locked".parse::<RoutingMode>().unwrap(), RoutingMode::RegionLocked);
        assert!(matches!(
            "cheapest".parse::<RoutingMode>(),
            Err(ConfigurationError::UnknownRoutingMode(_))
        ));
    }

    #[test]
    fn test_routing_mode_serde_kebab_case() {
        let json = serde_json::to_string(&RoutingMode::HighestQuality).unwrap();
        assert_eq!(json, "\"highest-quality\"");
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RoutingPolicy::default();
        assert_eq!(policy.mode, RoutingMode::Balanced);
        assert!(policy.auto_failover);
        assert!((policy.error_rate_threshold - 0.5).abs() < f64::EPSILON);
        assert!(policy.check("default").is_ok());
    }

    #[test]
    fn test_policy_floor_above_ceiling_is_malformed() {
        let policy = RoutingPolicy {
            cost_floor: Some(0.01),
            cost_ceiling: Some(0.001),
            ..Default::default()
        };
        assert!(matches!(
            policy.check("chat-completion"),
            Err(ConfigurationError::MalformedPolicy { .. })
        ));
    }

    #[test]
    fn test_custom_policy_requires_rules() {
        let policy = RoutingPolicy::default().with_mode(RoutingMode::Custom);
        assert!(policy.check("sms-send").is_err());

        let policy = RoutingPolicy {
            preference: vec![ProviderId::from("twilio")],
            ..policy
        };
        assert!(policy.check("sms-send").is_ok());
    }

    #[test]
    fn test_provider_check() {
        let provider = ProviderInstance::new(
            "p1",
            "chat-completion",
            "https://p1.example",
            CostRate::new(0.002, BillingUnit::Request),
        );
        assert!(provider.check().is_ok());
        assert!(provider.clone().with_weight(101).check().is_err());

        let mut negative = provider;
        negative.cost.amount = -1.0;
        assert!(negative.check().is_err());
    }

    #[test]
    fn test_serves_region() {
        let provider = ProviderInstance::new("p1", "chat", "https://p1", CostRate::per_request(0.1))
            .with_regions(["us-east"]);
        assert!(provider.serves_region(&Region::from("US-EAST")));
        assert!(!provider.serves_region(&Region::from("eu-west")));

        let global = ProviderInstance::new("p2", "chat", "https://p2", CostRate::per_request(0.1));
        assert!(global.serves_region(&Region::from("eu-west")));
    }

    #[test]
    fn test_auth_type_tagged() {
        let auth: AuthType =
            serde_json::from_str(r#"{"type": "api-key-header", "header": "x-api-key"}"#).unwrap();
        assert_eq!(
            auth,
            AuthType::ApiKeyHeader {
                header: "x-api-key".to_string()
            }
        );
    }
}
