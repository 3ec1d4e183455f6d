//! Routing policies and candidate filtering.
//!
//! [`PolicyStore`] holds the global default policy and per-capability
//! overrides as one copy-on-write snapshot. [`PolicyEvaluator`] applies a
//! policy to the candidate set of a request.
//!
//! # Check order
//!
//! Each candidate is tested in a fixed order and excluded with the reason of
//! the first check it fails:
//!
//! 1. circuit (open, or half-open for a non-probe request)
//! 2. rate limit
//! 3. region
//! 4. cost floor / ceiling
//! 5. rolling latency
//! 6. rolling error rate
//!
//! # Relaxation
//!
//! When nothing survives and the policy has `auto_failover` set, exactly one
//! constraint is relaxed: the lowest-priority constraint for the active mode
//! that actually excluded a candidate. Only latency, cost and region are
//! relaxable.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use switchyard_common::{
    Capability, CircuitState, ConfigurationError, ProviderId, ProviderInstance, Region,
    RoutingMode, RoutingPolicy,
};

use crate::health::ProviderHealth;

// ============================================================================
// Policy Store
// ============================================================================

#[derive(Debug, Clone, Default)]
struct PolicySet {
    default: Arc<RoutingPolicy>,
    by_capability: BTreeMap<Capability, Arc<RoutingPolicy>>,
}

/// Default and per-capability routing policies.
pub struct PolicyStore {
    current: ArcSwap<PolicySet>,
}

impl PolicyStore {
    pub fn new(default: RoutingPolicy) -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicySet {
                default: Arc::new(default),
                by_capability: BTreeMap::new(),
            }),
        }
    }

    /// Build a store after checking every policy.
    pub fn with_policies(
        default: RoutingPolicy,
        by_capability: BTreeMap<Capability, RoutingPolicy>,
    ) -> Result<Self, ConfigurationError> {
        let store = Self::new(RoutingPolicy::default());
        store.replace(default, by_capability)?;
        Ok(store)
    }

    /// Effective policy for `capability`.
    pub fn policy_for(&self, capability: &Capability) -> Arc<RoutingPolicy> {
        let set = self.current.load();
        set.by_capability
            .get(capability)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&set.default))
    }

    /// Whether `capability` has its own policy.
    pub fn has_policy(&self, capability: &Capability) -> bool {
        self.current.load().by_capability.contains_key(capability)
    }

    pub fn default_policy(&self) -> Arc<RoutingPolicy> {
        Arc::clone(&self.current.load().default)
    }

    /// Atomically replace all policies. Nothing changes if any policy is
    /// malformed.
    pub fn replace(
        &self,
        default: RoutingPolicy,
        by_capability: BTreeMap<Capability, RoutingPolicy>,
    ) -> Result<(), ConfigurationError> {
        default.check("default")?;
        for (capability, policy) in &by_capability {
            policy.check(capability.as_str())?;
        }
        let count = by_capability.len();
        self.current.store(Arc::new(PolicySet {
            default: Arc::new(default),
            by_capability: by_capability
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
        }));
        debug!(capability_policies = count, "Routing policies replaced");
        Ok(())
    }

    /// Set or replace the policy of one capability.
    pub fn set(&self, capability: Capability, policy: RoutingPolicy) -> Result<(), ConfigurationError> {
        policy.check(capability.as_str())?;
        self.current.rcu(|set| {
            let mut next = PolicySet::clone(set);
            next.by_capability
                .insert(capability.clone(), Arc::new(policy.clone()));
            next
        });
        Ok(())
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("capability_policies", &self.current.load().by_capability.len())
            .finish()
    }
}

// ============================================================================
// Candidates and Reasons
// ============================================================================

/// Everything the evaluator and selector need to know about one provider for
/// one request.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub instance: Arc<ProviderInstance>,
    /// Estimated cost of this request at this provider
    pub cost: f64,
    pub health: ProviderHealth,
    pub circuit: CircuitState,
    /// Whether the circuit would admit this request
    pub admitted: bool,
    /// Whether the provider's rate limit is exhausted
    pub rate_limited: bool,
}

impl Candidate {
    pub fn id(&self) -> &ProviderId {
        &self.instance.id
    }
}

/// Why a candidate was not eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    CircuitOpen,
    /// Half-open and not a probe, or probe budget spent
    CircuitRecovering,
    RateLimited,
    WrongRegion,
    BelowCostFloor,
    OverCost,
    OverLatency,
    OverErrorRate,
}

impl ExclusionReason {
    /// The relaxable constraint that produced this reason, if any.
    pub fn constraint(&self) -> Option<Constraint> {
        match self {
            ExclusionReason::WrongRegion => Some(Constraint::Region),
            ExclusionReason::BelowCostFloor | ExclusionReason::OverCost => Some(Constraint::Cost),
            ExclusionReason::OverLatency => Some(Constraint::Latency),
            ExclusionReason::CircuitOpen
            | ExclusionReason::CircuitRecovering
            | ExclusionReason::RateLimited
            | ExclusionReason::OverErrorRate => None,
        }
    }
}

/// Constraints the evaluator may relax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Constraint {
    Latency,
    Cost,
    Region,
}

/// Relaxable constraints for a mode, highest priority first.
pub fn constraint_priority(mode: RoutingMode) -> [Constraint; 3] {
    match mode {
        RoutingMode::LowestCost => [Constraint::Cost, Constraint::Region, Constraint::Latency],
        RoutingMode::LowestLatency | RoutingMode::HighestQuality => {
            [Constraint::Latency, Constraint::Region, Constraint::Cost]
        }
        RoutingMode::Balanced | RoutingMode::RegionLocked | RoutingMode::Custom => {
            [Constraint::Region, Constraint::Cost, Constraint::Latency]
        }
    }
}

/// An excluded candidate.
#[derive(Debug, Clone)]
pub struct Exclusion {
    pub candidate: Candidate,
    pub reason: ExclusionReason,
}

/// Result of filtering with at least one survivor.
#[derive(Debug, Clone)]
pub struct Filtered {
    pub survivors: Vec<Candidate>,
    pub excluded: Vec<Exclusion>,
    pub relaxed: Option<Constraint>,
}

/// Nothing survived, even after any relaxation.
#[derive(Debug, Clone)]
pub struct Ineligible {
    pub excluded: Vec<Exclusion>,
    pub relaxed: Option<Constraint>,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Applies a [`RoutingPolicy`] to candidates.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    /// Samples required before the error-rate rule applies
    min_samples: u64,
}

impl PolicyEvaluator {
    pub fn new(min_samples: u64) -> Self {
        Self { min_samples }
    }

    /// Split candidates into survivors and exclusions.
    ///
    /// `region` is the region requested by the caller, if any.
    pub fn filter(
        &self,
        candidates: Vec<Candidate>,
        policy: &RoutingPolicy,
        region: Option<&Region>,
    ) -> Result<Filtered, Ineligible> {
        let (survivors, excluded) = self.partition(candidates, policy, region, None);
        if !survivors.is_empty() {
            return Ok(Filtered {
                survivors,
                excluded,
                relaxed: None,
            });
        }

        if !policy.auto_failover {
            trace!("No survivors and auto-failover disabled");
            return Err(Ineligible {
                excluded,
                relaxed: None,
            });
        }

        let Some(relax) = constraint_priority(policy.mode)
            .into_iter()
            .rev()
            .find(|c| excluded.iter().any(|e| e.reason.constraint() == Some(*c)))
        else {
            return Err(Ineligible {
                excluded,
                relaxed: None,
            });
        };

        debug!(
            mode = %policy.mode,
            constraint = ?relax,
            "No eligible candidate, relaxing constraint"
        );

        let candidates = excluded.into_iter().map(|e| e.candidate).collect();
        let (survivors, excluded) = self.partition(candidates, policy, region, Some(relax));
        if survivors.is_empty() {
            Err(Ineligible {
                excluded,
                relaxed: Some(relax),
            })
        } else {
            Ok(Filtered {
                survivors,
                excluded,
                relaxed: Some(relax),
            })
        }
    }

    fn partition(
        &self,
        candidates: Vec<Candidate>,
        policy: &RoutingPolicy,
        region: Option<&Region>,
        relaxed: Option<Constraint>,
    ) -> (Vec<Candidate>, Vec<Exclusion>) {
        let mut survivors = Vec::with_capacity(candidates.len());
        let mut excluded = Vec::new();
        for candidate in candidates {
            match self.check(&candidate, policy, region, relaxed) {
                None => survivors.push(candidate),
                Some(reason) => {
                    trace!(provider = %candidate.id(), reason = ?reason, "Candidate excluded");
                    excluded.push(Exclusion { candidate, reason });
                }
            }
        }
        (survivors, excluded)
    }

    /// First failed check for a candidate, if any.
    pub fn check(
        &self,
        candidate: &Candidate,
        policy: &RoutingPolicy,
        region: Option<&Region>,
        relaxed: Option<Constraint>,
    ) -> Option<ExclusionReason> {
        if !candidate.admitted {
            return Some(match candidate.circuit {
                CircuitState::HalfOpen => ExclusionReason::CircuitRecovering,
                CircuitState::Open | CircuitState::Closed => ExclusionReason::CircuitOpen,
            });
        }

        if candidate.rate_limited {
            return Some(ExclusionReason::RateLimited);
        }

        if relaxed != Some(Constraint::Region) {
            let instance = &candidate.instance;
            let wrong_requested = region.is_some_and(|r| !instance.serves_region(r));
            let outside_lock = !policy.allowed_regions.is_empty()
                && !policy.allowed_regions.iter().any(|r| instance.serves_region(r));
            if wrong_requested || outside_lock {
                return Some(ExclusionReason::WrongRegion);
            }
        }

        if relaxed != Some(Constraint::Cost) {
            if policy.cost_floor.is_some_and(|floor| candidate.cost < floor) {
                return Some(ExclusionReason::BelowCostFloor);
            }
            if policy.cost_ceiling.is_some_and(|ceiling| candidate.cost > ceiling) {
                return Some(ExclusionReason::OverCost);
            }
        }

        if relaxed != Some(Constraint::Latency) {
            if let Some(max) = policy.max_latency_ms {
                if candidate.health.sample_count > 0 && candidate.health.avg_latency_ms > max as f64 {
                    return Some(ExclusionReason::OverLatency);
                }
            }
        }

        if candidate.health.sample_count >= self.min_samples
            && candidate.health.error_rate > policy.error_rate_threshold
        {
            return Some(ExclusionReason::OverErrorRate);
        }

        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use switchyard_common::CostRate;

    pub(crate) fn candidate(id: &str, cost: f64) -> Candidate {
        Candidate {
            instance: Arc::new(ProviderInstance::new(
                id,
                "chat",
                format!("https://{}.example", id),
                CostRate::per_request(cost),
            )),
            cost,
            health: ProviderHealth::default(),
            circuit: CircuitState::Closed,
            admitted: true,
            rate_limited: false,
        }
    }

    fn with_latency(mut c: Candidate, avg_latency_ms: f64) -> Candidate {
        c.health.avg_latency_ms = avg_latency_ms;
        c.health.sample_count = 20;
        c
    }

    fn with_regions(mut c: Candidate, regions: &[&str]) -> Candidate {
        let instance = (*c.instance).clone().with_regions(regions.iter().copied());
        c.instance = Arc::new(instance);
        c
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id().as_str()).collect()
    }

    #[test]
    fn test_exclusion_reason_serialization() {
        let reasons = [
            ExclusionReason::CircuitOpen,
            ExclusionReason::CircuitRecovering,
            ExclusionReason::RateLimited,
            ExclusionReason::WrongRegion,
            ExclusionReason::BelowCostFloor,
            ExclusionReason::OverCost,
            ExclusionReason::OverLatency,
            ExclusionReason::OverErrorRate,
        ];
        insta::assert_snapshot!(
            serde_json::to_string(&reasons).unwrap(),
            @r#"["circuit-open","circuit-recovering","rate-limited","wrong-region","below-cost-floor","over-cost","over-latency","over-error-rate"]"#
        );
    }

    #[test]
    fn test_check_order_circuit_first() {
        let evaluator = PolicyEvaluator::new(10);
        let mut c = with_latency(candidate("p1", 1.0), 5000.0);
        c.circuit = CircuitState::Open;
        c.admitted = false;
        c.rate_limited = true;
        let policy = RoutingPolicy {
            cost_ceiling: Some(0.5),
            max_latency_ms: Some(100),
            ..Default::default()
        };
        assert_eq!(
            evaluator.check(&c, &policy, None, None),
            Some(ExclusionReason::CircuitOpen)
        );

        c.circuit = CircuitState::HalfOpen;
        assert_eq!(
            evaluator.check(&c, &policy, None, None),
            Some(ExclusionReason::CircuitRecovering)
        );

        c.admitted = true;
        assert_eq!(
            evaluator.check(&c, &policy, None, None),
            Some(ExclusionReason::RateLimited)
        );

        c.rate_limited = false;
        assert_eq!(
            evaluator.check(&c, &policy, None, None),
            Some(ExclusionReason::OverCost)
        );
    }

    #[test]
    fn test_cost_bounds() {
        let evaluator = PolicyEvaluator::new(10);
        let policy = RoutingPolicy {
            cost_floor: Some(0.001),
            cost_ceiling: Some(0.01),
            ..Default::default()
        };
        let filtered = evaluator
            .filter(
                vec![
                    candidate("cheap", 0.0005),
                    candidate("ok", 0.005),
                    candidate("pricey", 0.02),
                ],
                &policy,
                None,
            )
            .unwrap();
        assert_eq!(ids(&filtered.survivors), ["ok"]);
        let reasons: Vec<_> = filtered.excluded.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            [ExclusionReason::BelowCostFloor, ExclusionReason::OverCost]
        );
    }

    #[test]
    fn test_error_rate_requires_min_samples() {
        let evaluator = PolicyEvaluator::new(10);
        let policy = RoutingPolicy {
            error_rate_threshold: 0.2,
            ..Default::default()
        };
        let mut c = candidate("p1", 0.01);
        c.health.error_rate = 0.9;
        c.health.sample_count = 5;
        assert_eq!(evaluator.check(&c, &policy, None, None), None);

        c.health.sample_count = 10;
        assert_eq!(
            evaluator.check(&c, &policy, None, None),
            Some(ExclusionReason::OverErrorRate)
        );
    }

    #[test]
    fn test_region_lock_and_requested_region() {
        let evaluator = PolicyEvaluator::new(10);
        let policy = RoutingPolicy {
            allowed_regions: vec![Region::from("eu-west")],
            ..Default::default()
        };
        let eu = with_regions(candidate("eu", 0.01), &["eu-west"]);
        let us = with_regions(candidate("us", 0.01), &["us-east"]);

        assert_eq!(evaluator.check(&eu, &policy, None, None), None);
        assert_eq!(
            evaluator.check(&us, &policy, None, None),
            Some(ExclusionReason::WrongRegion)
        );
        assert_eq!(
            evaluator.check(&eu, &RoutingPolicy::default(), Some(&Region::from("us-east")), None),
            Some(ExclusionReason::WrongRegion)
        );
    }

    #[test]
    fn test_no_relaxation_without_auto_failover() {
        let evaluator = PolicyEvaluator::new(10);
        let policy = RoutingPolicy {
            cost_ceiling: Some(0.001),
            auto_failover: false,
            ..Default::default()
        };
        let err = evaluator
            .filter(vec![candidate("p1", 0.01)], &policy, None)
            .unwrap_err();
        assert_eq!(err.relaxed, None);
        assert_eq!(err.excluded[0].reason, ExclusionReason::OverCost);
    }

    #[test]
    fn test_relaxes_lowest_priority_constraint_that_excluded() {
        let evaluator = PolicyEvaluator::new(10);
        // lowest-cost priorities: cost > region > latency
        let policy = RoutingPolicy {
            mode: RoutingMode::LowestCost,
            cost_ceiling: Some(0.01),
            max_latency_ms: Some(100),
            ..Default::default()
        };
        let slow = with_latency(candidate("slow", 0.005), 500.0);
        let pricey = candidate("pricey", 0.05);

        let filtered = evaluator.filter(vec![slow, pricey], &policy, None).unwrap();
        assert_eq!(filtered.relaxed, Some(Constraint::Latency));
        assert_eq!(ids(&filtered.survivors), ["slow"]);
        assert_eq!(filtered.excluded[0].reason, ExclusionReason::OverCost);
    }

    #[test]
    fn test_relaxation_skips_constraints_that_excluded_nobody() {
        let evaluator = PolicyEvaluator::new(10);
        // balanced priorities: region > cost > latency; nobody failed latency
        let policy = RoutingPolicy {
            cost_ceiling: Some(0.01),
            allowed_regions: vec![Region::from("eu-west")],
            ..Default::default()
        };
        let us = with_regions(candidate("us", 0.005), &["us-east"]);
        let pricey = with_regions(candidate("pricey", 0.05), &["eu-west"]);

        let filtered = evaluator.filter(vec![us, pricey], &policy, None).unwrap();
        assert_eq!(filtered.relaxed, Some(Constraint::Cost));
        assert_eq!(ids(&filtered.survivors), ["pricey"]);
    }

    #[test]
    fn test_relaxes_only_once() {
        let evaluator = PolicyEvaluator::new(10);
        let policy = RoutingPolicy {
            mode: RoutingMode::LowestLatency,
            cost_ceiling: Some(0.01),
            max_latency_ms: Some(100),
            ..Default::default()
        };
        // Fails cost first; once cost is relaxed it still fails latency
        let c = with_latency(candidate("p1", 0.05), 500.0);
        let err = evaluator.filter(vec![c], &policy, None).unwrap_err();
        assert_eq!(err.relaxed, Some(Constraint::Cost));
        assert_eq!(err.excluded[0].reason, ExclusionReason::OverLatency);
    }

    #[test]
    fn test_circuit_exclusions_never_relaxed() {
        let evaluator = PolicyEvaluator::new(10);
        let mut c = candidate("p1", 0.01);
        c.circuit = CircuitState::Open;
        c.admitted = false;
        let err = evaluator
            .filter(vec![c], &RoutingPolicy::default(), None)
            .unwrap_err();
        assert_eq!(err.relaxed, None);
        assert_eq!(err.excluded[0].reason, ExclusionReason::CircuitOpen);
    }

    #[test]
    fn test_priority_tables() {
        assert_eq!(
            constraint_priority(RoutingMode::LowestCost),
            [Constraint::Cost, Constraint::Region, Constraint::Latency]
        );
        assert_eq!(
            constraint_priority(RoutingMode::HighestQuality),
            [Constraint::Latency, Constraint::Region, Constraint::Cost]
        );
        assert_eq!(
            constraint_priority(RoutingMode::RegionLocked),
            [Constraint::Region, Constraint::Cost, Constraint::Latency]
        );
    }

    #[test]
    fn test_policy_store_fallback_and_replace() {
        let store = PolicyStore::new(RoutingPolicy::default());
        let chat = Capability::from("chat");
        assert_eq!(store.policy_for(&chat).mode, RoutingMode::Balanced);
        assert!(!store.has_policy(&chat));

        store
            .set(chat.clone(), RoutingPolicy::default().with_mode(RoutingMode::LowestCost))
            .unwrap();
        assert_eq!(store.policy_for(&chat).mode, RoutingMode::LowestCost);

        let malformed = RoutingPolicy {
            error_rate_threshold: 2.0,
            ..Default::default()
        };
        let mut map = BTreeMap::new();
        map.insert(chat.clone(), malformed);
        assert!(store.replace(RoutingPolicy::default(), map).is_err());
        // Unchanged after a rejected replace
        assert_eq!(store.policy_for(&chat).mode, RoutingMode::LowestCost);
    }
}
