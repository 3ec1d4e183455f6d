//! Provider registry.
//!
//! Holds every registered [`ProviderInstance`] grouped by capability. The
//! whole registry is an immutable snapshot behind an [`ArcSwap`]: readers load
//! the current snapshot without locking and never observe a half-applied
//! update. Writers build a new snapshot and swap it in, serialized by a
//! writer lock.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use switchyard_common::{Capability, ProviderId, ProviderInstance, Region};

use crate::errors::RegistryError;

/// Immutable view of all registrations.
#[derive(Debug, Default, Clone)]
pub struct RegistrySnapshot {
    providers: BTreeMap<ProviderId, Arc<ProviderInstance>>,
    by_capability: BTreeMap<Capability, Vec<Arc<ProviderInstance>>>,
}

impl RegistrySnapshot {
    fn from_providers(providers: BTreeMap<ProviderId, Arc<ProviderInstance>>) -> Self {
        let mut by_capability: BTreeMap<Capability, Vec<Arc<ProviderInstance>>> = BTreeMap::new();
        // BTreeMap iteration keeps each capability list sorted by id
        for instance in providers.values() {
            by_capability
                .entry(instance.capability.clone())
                .or_default()
                .push(Arc::clone(instance));
        }
        Self {
            providers,
            by_capability,
        }
    }

    pub fn get(&self, id: &ProviderId) -> Option<&Arc<ProviderInstance>> {
        self.providers.get(id)
    }

    /// Providers for `capability`, optionally restricted to one region.
    pub fn candidates(
        &self,
        capability: &Capability,
        region: Option<&Region>,
    ) -> Vec<Arc<ProviderInstance>> {
        self.by_capability
            .get(capability)
            .map(|list| {
                list.iter()
                    .filter(|p| region.map_or(true, |r| p.serves_region(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.by_capability.contains_key(capability)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.by_capability.keys()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<ProviderInstance>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Copy-on-write provider registry.
pub struct ProviderRegistry {
    current: ArcSwap<RegistrySnapshot>,
    write_lock: Mutex<()>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Build a registry from a set of instances, rejecting invalid ones.
    pub fn with_providers(
        providers: impl IntoIterator<Item = ProviderInstance>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.replace_all(providers)?;
        Ok(registry)
    }

    /// Consistent view of the whole registry.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Providers serving `capability` (and `region`, when given), sorted by id.
    pub fn list_candidates(
        &self,
        capability: &Capability,
        region: Option<&Region>,
    ) -> Vec<Arc<ProviderInstance>> {
        self.current.load().candidates(capability, region)
    }

    pub fn get(&self, id: &ProviderId) -> Result<Arc<ProviderInstance>, RegistryError> {
        self.current
            .load()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.current.load().get(id).is_some()
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.current.load().capabilities().cloned().collect()
    }

    /// Insert or replace a provider. Returns the previous registration.
    pub fn upsert(
        &self,
        instance: ProviderInstance,
    ) -> Result<Option<Arc<ProviderInstance>>, RegistryError> {
        instance.check()?;

        let _guard = self.write_lock.lock();
        let mut providers = self.current.load().providers.clone();
        let id = instance.id.clone();
        let previous = providers.insert(id.clone(), Arc::new(instance));
        self.current
            .store(Arc::new(RegistrySnapshot::from_providers(providers)));

        if previous.is_some() {
            debug!(provider = %id, "Provider registration updated");
        } else {
            info!(provider = %id, "Provider registered");
        }
        Ok(previous)
    }

    /// Remove a provider. Returns the removed registration.
    pub fn remove(&self, id: &ProviderId) -> Result<Arc<ProviderInstance>, RegistryError> {
        let _guard = self.write_lock.lock();
        let mut providers = self.current.load().providers.clone();
        let removed = providers
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        self.current
            .store(Arc::new(RegistrySnapshot::from_providers(providers)));

        info!(provider = %id, "Provider removed");
        Ok(removed)
    }

    /// Atomically replace every registration (configuration reload).
    ///
    /// Returns the ids that were registered before but not after.
    pub fn replace_all(
        &self,
        instances: impl IntoIterator<Item = ProviderInstance>,
    ) -> Result<Vec<ProviderId>, RegistryError> {
        let mut providers = BTreeMap::new();
        for instance in instances {
            instance.check()?;
            providers.insert(instance.id.clone(), Arc::new(instance));
        }

        let _guard = self.write_lock.lock();
        let dropped = self
            .current
            .load()
            .providers
            .keys()
            .filter(|id| !providers.contains_key(*id))
            .cloned()
            .collect();
        let count = providers.len();
        self.current
            .store(Arc::new(RegistrySnapshot::from_providers(providers)));

        debug!(providers = count, "Provider registry replaced");
        Ok(dropped)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.current.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_common::{ConfigurationError, CostRate};

    fn instance(id: &str, capability: &str) -> ProviderInstance {
        ProviderInstance::new(id, capability, format!("https://{}.example", id), CostRate::per_request(0.01))
    }

    #[test]
    fn test_register_lookup_remove_round_trip() {
        let registry = ProviderRegistry::new();
        let chat = Capability::from("chat");

        registry.upsert(instance("p1", "chat")).unwrap();
        let listed = registry.list_candidates(&chat, None);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_str(), "p1");

        let removed = registry.remove(&ProviderId::from("p1")).unwrap();
        assert_eq!(removed.id.as_str(), "p1");
        assert!(registry.list_candidates(&chat, None).is_empty());
        assert!(!registry.snapshot().has_capability(&chat));

        assert_eq!(
            registry.get(&ProviderId::from("p1")).unwrap_err(),
            RegistryError::NotFound(ProviderId::from("p1"))
        );
    }

    #[test]
    fn test_candidates_sorted_and_region_filtered() {
        let registry = ProviderRegistry::with_providers([
            instance("p3", "chat").with_regions(["eu-west"]),
            instance("p1", "chat").with_regions(["us-east"]),
            instance("p2", "chat"),
            instance("s1", "sms"),
        ])
        .unwrap();

        let chat = Capability::from("chat");
        let ids: Vec<_> = registry
            .list_candidates(&chat, None)
            .iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(ids, ["p1", "p2", "p3"]);

        let us: Vec<_> = registry
            .list_candidates(&chat, Some(&Region::from("us-east")))
            .iter()
            .map(|p| p.id.to_string())
            .collect();
        // p2 has no regions and is treated as global
        assert_eq!(us, ["p1", "p2"]);
    }

    #[test]
    fn test_upsert_replaces_and_moves_capability() {
        let registry = ProviderRegistry::new();
        assert!(registry.upsert(instance("p1", "chat")).unwrap().is_none());
        let previous = registry.upsert(instance("p1", "embeddings")).unwrap();
        assert_eq!(previous.unwrap().capability.as_str(), "chat");

        assert!(registry.list_candidates(&Capability::from("chat"), None).is_empty());
        assert_eq!(registry.capabilities(), vec![Capability::from("embeddings")]);
    }

    #[test]
    fn test_upsert_rejects_invalid_instance() {
        let registry = ProviderRegistry::new();
        let err = registry.upsert(instance("p1", "chat").with_weight(150)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Invalid(ConfigurationError::InvalidProvider { .. })
        ));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_across_updates() {
        let registry = ProviderRegistry::with_providers([instance("p1", "chat")]).unwrap();
        let before = registry.snapshot();
        registry.upsert(instance("p2", "chat")).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_replace_all_reports_dropped() {
        let registry =
            ProviderRegistry::with_providers([instance("p1", "chat"), instance("p2", "chat")])
                .unwrap();
        let dropped = registry
            .replace_all([instance("p2", "chat"), instance("p3", "chat")])
            .unwrap();
        assert_eq!(dropped, vec![ProviderId::from("p1")]);
        assert!(registry.contains(&ProviderId::from("p3")));
    }

    #[test]
    fn test_not_found_is_configuration_error() {
        let err: ConfigurationError = RegistryError::NotFound(ProviderId::from("ghost")).into();
        assert_eq!(err, ConfigurationError::UnknownProvider(ProviderId::from("ghost")));
    }
}
