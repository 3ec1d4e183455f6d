//! Candidate selection per routing mode.
//!
//! Every mode runs in a single pass (two for weighted draws) over the
//! survivor slice and returns an index into it; nothing is allocated on the
//! selection path. Draws never share a lock: unseeded selectors use the
//! thread-local generator, seeded ones derive a fresh [`StdRng`] per draw
//! from the seed and a draw counter so balanced routing stays reproducible
//! in tests and simulations.

use arc_swap::ArcSwap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, trace};

use switchyard_common::{ConfigurationError, RoutingMode, RoutingPolicy};

use crate::policy::Candidate;

/// Name of the built-in preference-list strategy.
pub const PREFERENCE_LIST: &str = "preference-list";

/// Operator-supplied selection logic for `custom` mode.
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Index of the chosen candidate, or `None` to fall back to balanced
    /// selection.
    fn select(&self, candidates: &[Candidate], policy: &RoutingPolicy) -> Option<usize>;
}

/// Picks the first provider of the policy's preference list that survived.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferenceList;

impl SelectionStrategy for PreferenceList {
    fn name(&self) -> &str {
        PREFERENCE_LIST
    }

    fn select(&self, candidates: &[Candidate], policy: &RoutingPolicy) -> Option<usize> {
        policy
            .preference
            .iter()
            .find_map(|preferred| candidates.iter().position(|c| c.id() == preferred))
    }
}

type Strategies = HashMap<String, Arc<dyn SelectionStrategy>>;

/// Where weighted draws get their randomness.
#[derive(Debug)]
enum Entropy {
    ThreadLocal,
    Seeded { seed: u64, draws: AtomicU64 },
}

impl Entropy {
    /// Uniform draw in `0..bound`. `bound` must be non-zero.
    fn below(&self, bound: u64) -> u64 {
        match self {
            Self::ThreadLocal => rand::thread_rng().gen_range(0..bound),
            Self::Seeded { seed, draws } => {
                let n = draws.fetch_add(1, AtomicOrdering::Relaxed);
                StdRng::seed_from_u64(seed ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15))
                    .gen_range(0..bound)
            }
        }
    }
}

/// Chooses one candidate among policy survivors.
pub struct WeightedSelector {
    entropy: Entropy,
    strategies: ArcSwap<Strategies>,
}

impl WeightedSelector {
    /// Selector drawing from the thread-local generator.
    pub fn new() -> Self {
        Self::with_entropy(Entropy::ThreadLocal)
    }

    /// Selector with a deterministic random source.
    pub fn seeded(seed: u64) -> Self {
        Self::with_entropy(Entropy::Seeded {
            seed,
            draws: AtomicU64::new(0),
        })
    }

    fn with_entropy(entropy: Entropy) -> Self {
        let mut strategies: Strategies = HashMap::new();
        strategies.insert(PREFERENCE_LIST.to_string(), Arc::new(PreferenceList));
        Self {
            entropy,
            strategies: ArcSwap::from_pointee(strategies),
        }
    }

    /// Make a custom strategy available to policies by name.
    pub fn register_strategy(&self, strategy: Arc<dyn SelectionStrategy>) {
        let name = strategy.name().to_string();
        debug!(strategy = %name, "Registered selection strategy");
        self.strategies.rcu(|current| {
            let mut next = Strategies::clone(current);
            next.insert(name.clone(), Arc::clone(&strategy));
            next
        });
    }

    /// Whether a policy's named strategy (if any) is registered.
    pub fn check_policy(&self, policy: &RoutingPolicy) -> Result<(), ConfigurationError> {
        match &policy.strategy {
            Some(name) if !self.strategies.load().contains_key(name) => {
                Err(ConfigurationError::UnknownStrategy(name.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Index of the chosen candidate, `None` when `candidates` is empty.
    pub fn select(
        &self,
        candidates: &[Candidate],
        policy: &RoutingPolicy,
    ) -> Result<Option<usize>, ConfigurationError> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let chosen = match policy.mode {
            RoutingMode::Balanced => self.weighted(candidates, |_| true),
            RoutingMode::LowestCost => argmin_by(candidates, |c| c.cost),
            RoutingMode::LowestLatency => argmin_by(candidates, |c| c.health.avg_latency_ms),
            RoutingMode::HighestQuality => argmin_by(candidates, |c| -c.instance.quality),
            RoutingMode::RegionLocked => match &policy.preferred_region {
                Some(region) => self
                    .weighted(candidates, |c| c.instance.serves_region(region))
                    .or_else(|| self.weighted(candidates, |_| true)),
                None => self.weighted(candidates, |_| true),
            },
            RoutingMode::Custom => {
                let name = policy.strategy.as_deref().unwrap_or(PREFERENCE_LIST);
                let strategy = self
                    .strategies
                    .load()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigurationError::UnknownStrategy(name.to_string()))?;
                strategy
                    .select(candidates, policy)
                    .filter(|i| *i < candidates.len())
                    .or_else(|| self.weighted(candidates, |_| true))
            }
        };

        if let Some(i) = chosen {
            trace!(
                mode = %policy.mode,
                provider = %candidates[i].id(),
                survivors = candidates.len(),
                "Selected candidate"
            );
        }
        Ok(chosen)
    }

    /// Weighted random draw among candidates accepted by `include`.
    /// All-zero weights fall back to a uniform draw.
    fn weighted(&self, candidates: &[Candidate], include: impl Fn(&Candidate) -> bool) -> Option<usize> {
        let (count, total) = candidates
            .iter()
            .filter(|c| include(*c))
            .fold((0usize, 0u64), |(n, w), c| (n + 1, w + u64::from(c.instance.weight)));
        if count == 0 {
            return None;
        }

        if total == 0 {
            let nth = self.entropy.below(count as u64) as usize;
            return candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| include(*c))
                .nth(nth)
                .map(|(i, _)| i);
        }

        let mut point = self.entropy.below(total);
        for (i, c) in candidates.iter().enumerate().filter(|(_, c)| include(*c)) {
            let weight = u64::from(c.instance.weight);
            if point < weight {
                return Some(i);
            }
            point -= weight;
        }
        None
    }
}

impl Default for WeightedSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeightedSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.strategies.load().keys().cloned().collect();
        names.sort();
        f.debug_struct("WeightedSelector")
            .field("entropy", &self.entropy)
            .field("strategies", &names)
            .finish()
    }
}

/// Smallest key, ties broken by provider id.
fn argmin_by(candidates: &[Candidate], key: impl Fn(&Candidate) -> f64) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        best = match best {
            None => Some(i),
            Some(b) => {
                let current = &candidates[b];
                let ordering = key(candidate)
                    .total_cmp(&key(current))
                    .then_with(|| candidate.id().cmp(current.id()));
                if ordering == Ordering::Less {
                    Some(i)
                } else {
                    Some(b)
                }
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::tests::candidate;
    use proptest::prelude::*;
    use switchyard_common::{ProviderId, Region};

    fn weighted(id: &str, weight: u8) -> Candidate {
        let mut c = candidate(id, 0.01);
        c.instance = Arc::new((*c.instance).clone().with_weight(weight));
        c
    }

    fn policy(mode: RoutingMode) -> RoutingPolicy {
        RoutingPolicy::default().with_mode(mode)
    }

    fn counts(selector: &WeightedSelector, candidates: &[Candidate], trials: usize) -> Vec<usize> {
        let mut counts = vec![0; candidates.len()];
        let policy = policy(RoutingMode::Balanced);
        for _ in 0..trials {
            let i = selector.select(candidates, &policy).unwrap().unwrap();
            counts[i] += 1;
        }
        counts
    }

    #[test]
    fn test_balanced_follows_weights() {
        let selector = WeightedSelector::seeded(42);
        let candidates = [weighted("a", 40), weighted("b", 30), weighted("c", 20)];
        let trials = 100_000;
        let counts = counts(&selector, &candidates, trials);

        let expected = [4.0 / 9.0, 3.0 / 9.0, 2.0 / 9.0];
        for (count, share) in counts.iter().zip(expected) {
            let observed = *count as f64 / trials as f64;
            assert!(
                (observed - share).abs() < 0.01,
                "observed {observed}, expected {share}"
            );
        }
    }

    #[test]
    fn test_zero_weights_fall_back_to_uniform() {
        let selector = WeightedSelector::seeded(7);
        let candidates = [weighted("a", 0), weighted("b", 0)];
        let counts = counts(&selector, &candidates, 10_000);
        assert!(counts.iter().all(|c| (4_500..=5_500).contains(c)));
    }

    #[test]
    fn test_zero_weight_never_chosen_when_others_positive() {
        let selector = WeightedSelector::seeded(7);
        let candidates = [weighted("a", 0), weighted("b", 10)];
        let counts = counts(&selector, &candidates, 1_000);
        assert_eq!(counts, vec![0, 1_000]);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let candidates = [weighted("a", 40), weighted("b", 30), weighted("c", 20)];
        let a = counts(&WeightedSelector::seeded(1), &candidates, 500);
        let b = counts(&WeightedSelector::seeded(1), &candidates, 500);
        assert_eq!(a, b);
    }

    #[test]
    fn test_concurrent_draws_keep_proportions() {
        let selector = Arc::new(WeightedSelector::new());
        let candidates = Arc::new([weighted("a", 40), weighted("b", 30), weighted("c", 20)]);
        let per_thread = 25_000;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let selector = Arc::clone(&selector);
                let candidates = Arc::clone(&candidates);
                std::thread::spawn(move || counts(&selector, &candidates[..], per_thread))
            })
            .collect();
        let mut totals = vec![0usize; 3];
        for handle in handles {
            for (total, count) in totals.iter_mut().zip(handle.join().unwrap()) {
                *total += count;
            }
        }

        let trials = (per_thread * 4) as f64;
        for (count, share) in totals.iter().zip([4.0 / 9.0, 3.0 / 9.0, 2.0 / 9.0]) {
            let observed = *count as f64 / trials;
            assert!(
                (observed - share).abs() < 0.01,
                "observed {observed}, expected {share}"
            );
        }
    }

    #[test]
    fn test_lowest_cost() {
        let selector = WeightedSelector::seeded(0);
        let candidates = [
            candidate("p1", 0.002),
            candidate("p2", 0.0018),
            candidate("p3", 0.0022),
        ];
        let i = selector
            .select(&candidates, &policy(RoutingMode::LowestCost))
            .unwrap()
            .unwrap();
        assert_eq!(candidates[i].id().as_str(), "p2");
    }

    #[test]
    fn test_ties_broken_by_provider_id() {
        let selector = WeightedSelector::seeded(0);
        let candidates = [candidate("zeta", 0.001), candidate("alpha", 0.001)];
        let i = selector
            .select(&candidates, &policy(RoutingMode::LowestCost))
            .unwrap()
            .unwrap();
        assert_eq!(candidates[i].id().as_str(), "alpha");
    }

    #[test]
    fn test_lowest_latency_and_highest_quality() {
        let selector = WeightedSelector::seeded(0);
        let mut fast = candidate("fast", 0.01);
        fast.health.avg_latency_ms = 80.0;
        let mut slow = candidate("slow", 0.01);
        slow.health.avg_latency_ms = 300.0;
        slow.instance = Arc::new((*slow.instance).clone().with_quality(0.95));
        let candidates = [slow, fast];

        let i = selector
            .select(&candidates, &policy(RoutingMode::LowestLatency))
            .unwrap()
            .unwrap();
        assert_eq!(candidates[i].id().as_str(), "fast");

        let i = selector
            .select(&candidates, &policy(RoutingMode::HighestQuality))
            .unwrap()
            .unwrap();
        assert_eq!(candidates[i].id().as_str(), "slow");
    }

    #[test]
    fn test_region_locked_prefers_region_then_falls_back() {
        let selector = WeightedSelector::seeded(3);
        let mut eu = weighted("eu", 1);
        eu.instance = Arc::new((*eu.instance).clone().with_regions(["eu-west"]));
        let mut us = weighted("us", 99);
        us.instance = Arc::new((*us.instance).clone().with_regions(["us-east"]));
        let candidates = [eu, us];

        let mut locked = policy(RoutingMode::RegionLocked);
        locked.preferred_region = Some(Region::from("eu-west"));
        for _ in 0..100 {
            let i = selector.select(&candidates, &locked).unwrap().unwrap();
            assert_eq!(candidates[i].id().as_str(), "eu");
        }

        locked.preferred_region = Some(Region::from("ap-south"));
        let i = selector.select(&candidates, &locked).unwrap().unwrap();
        assert!(i < candidates.len());
    }

    #[test]
    fn test_custom_preference_list() {
        let selector = WeightedSelector::seeded(0);
        let candidates = [candidate("a", 0.01), candidate("b", 0.01), candidate("c", 0.01)];
        let mut custom = policy(RoutingMode::Custom);
        custom.preference = vec![ProviderId::from("ghost"), ProviderId::from("c"), ProviderId::from("a")];

        let i = selector.select(&candidates, &custom).unwrap().unwrap();
        assert_eq!(candidates[i].id().as_str(), "c");
    }

    struct MostExpensive;

    impl SelectionStrategy for MostExpensive {
        fn name(&self) -> &str {
            "most-expensive"
        }

        fn select(&self, candidates: &[Candidate], _policy: &RoutingPolicy) -> Option<usize> {
            argmin_by(candidates, |c| -c.cost)
        }
    }

    #[test]
    fn test_registered_strategy() {
        let selector = WeightedSelector::seeded(0);
        let candidates = [candidate("a", 0.01), candidate("b", 0.03)];
        let mut custom = policy(RoutingMode::Custom);
        custom.strategy = Some("most-expensive".to_string());

        assert_eq!(
            selector.select(&candidates, &custom).unwrap_err(),
            ConfigurationError::UnknownStrategy("most-expensive".to_string())
        );
        assert!(selector.check_policy(&custom).is_err());

        selector.register_strategy(Arc::new(MostExpensive));
        let i = selector.select(&candidates, &custom).unwrap().unwrap();
        assert_eq!(candidates[i].id().as_str(), "b");
    }

    #[test]
    fn test_empty_candidates() {
        let selector = WeightedSelector::seeded(0);
        assert_eq!(selector.select(&[], &policy(RoutingMode::Balanced)).unwrap(), None);
    }

    proptest! {
        #[test]
        fn prop_balanced_picks_positive_weight(weights in proptest::collection::vec(0u8..=100, 1..12), seed in any::<u64>()) {
            let selector = WeightedSelector::seeded(seed);
            let candidates: Vec<Candidate> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| weighted(&format!("p{i}"), *w))
                .collect();
            let i = selector
                .select(&candidates, &policy(RoutingMode::Balanced))
                .unwrap()
                .unwrap();
            prop_assert!(i < candidates.len());
            if weights.iter().any(|w| *w > 0) {
                prop_assert!(weights[i] > 0);
            }
        }
    }
}
