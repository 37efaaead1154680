//! Ownership ledger
//!
//! Records which consumer created each layer and inline source on a shared
//! engine, so a consumer's resources can be cleaned up without touching
//! anyone else's, and so a leftover layer can be told apart from a
//! collision with someone else's.
//!
//! A source whose owner left while the engine still refused to remove it
//! (another consumer's layer draws from it) stays on the books as an orphan
//! until a later removal succeeds.

use std::collections::{BTreeSet, HashMap};

use void_core::ConsumerId;

/// Resources created by one consumer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedResources {
    pub layers: Vec<String>,
    pub sources: Vec<String>,
}

impl OwnedResources {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.sources.is_empty()
    }
}

/// Owner index over engine layers and sources
#[derive(Debug, Default)]
pub struct OwnershipLedger {
    layers: HashMap<String, ConsumerId>,
    sources: HashMap<String, ConsumerId>,
    by_owner: HashMap<ConsumerId, OwnedResources>,
    /// Sources left behind by departed owners, still to be removed
    orphans: BTreeSet<String>,
}

impl OwnershipLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_layer(&mut self, id: &str, owner: ConsumerId) {
        if let Some(previous) = self.layers.insert(id.to_string(), owner) {
            if let Some(owned) = self.by_owner.get_mut(&previous) {
                owned.layers.retain(|l| l != id);
            }
            self.prune_owner(previous);
        }
        self.by_owner
            .entry(owner)
            .or_default()
            .layers
            .push(id.to_string());
    }

    pub fn record_source(&mut self, id: &str, owner: ConsumerId) {
        self.orphans.remove(id);
        if let Some(previous) = self.sources.insert(id.to_string(), owner) {
            if let Some(owned) = self.by_owner.get_mut(&previous) {
                owned.sources.retain(|s| s != id);
            }
            self.prune_owner(previous);
        }
        self.by_owner
            .entry(owner)
            .or_default()
            .sources
            .push(id.to_string());
    }

    pub fn forget_layer(&mut self, id: &str) -> Option<ConsumerId> {
        let owner = self.layers.remove(id)?;
        if let Some(owned) = self.by_owner.get_mut(&owner) {
            owned.layers.retain(|l| l != id);
        }
        self.prune_owner(owner);
        Some(owner)
    }

    pub fn forget_source(&mut self, id: &str) -> Option<ConsumerId> {
        let owner = self.sources.remove(id)?;
        if let Some(owned) = self.by_owner.get_mut(&owner) {
            owned.sources.retain(|s| s != id);
        }
        self.prune_owner(owner);
        Some(owner)
    }

    /// Move an owned source to the orphans. Returns false if nobody owned it.
    pub fn orphan_source(&mut self, id: &str) -> bool {
        if self.forget_source(id).is_none() {
            return false;
        }
        self.orphans.insert(id.to_string())
    }

    pub fn forget_orphan(&mut self, id: &str) -> bool {
        self.orphans.remove(id)
    }

    pub fn is_orphan(&self, id: &str) -> bool {
        self.orphans.contains(id)
    }

    /// Orphaned sources in id order
    pub fn orphans(&self) -> Vec<String> {
        self.orphans.iter().cloned().collect()
    }

    pub fn layer_owner(&self, id: &str) -> Option<ConsumerId> {
        self.layers.get(id).copied()
    }

    pub fn source_owner(&self, id: &str) -> Option<ConsumerId> {
        self.sources.get(id).copied()
    }

    /// Resources currently recorded for `owner`
    pub fn owned_by(&self, owner: ConsumerId) -> OwnedResources {
        self.by_owner.get(&owner).cloned().unwrap_or_default()
    }

    /// Drop every record for `owner`, returning what it held
    pub fn release_owner(&mut self, owner: ConsumerId) -> OwnedResources {
        let owned = self.by_owner.remove(&owner).unwrap_or_default();
        for layer in &owned.layers {
            self.layers.remove(layer);
        }
        for source in &owned.sources {
            self.sources.remove(source);
        }
        owned
    }

    /// Drop records for resources the engine no longer has
    pub fn retain_present(
        &mut self,
        has_layer: impl Fn(&str) -> bool,
        has_source: impl Fn(&str) -> bool,
    ) -> usize {
        let gone_layers: Vec<String> = self
            .layers
            .keys()
            .filter(|id| !has_layer(id.as_str()))
            .cloned()
            .collect();
        let gone_sources: Vec<String> = self
            .sources
            .keys()
            .filter(|id| !has_source(id.as_str()))
            .cloned()
            .collect();

        for id in &gone_layers {
            self.forget_layer(id);
        }
        for id in &gone_sources {
            self.forget_source(id);
        }
        let orphans = self.orphans.len();
        self.orphans.retain(|id| has_source(id.as_str()));
        gone_layers.len() + gone_sources.len() + (orphans - self.orphans.len())
    }

    pub fn owner_count(&self) -> usize {
        self.by_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.sources.is_empty() && self.orphans.is_empty()
    }

    fn prune_owner(&mut self, owner: ConsumerId) {
        if self.by_owner.get(&owner).map_or(false, OwnedResources::is_empty) {
            self.by_owner.remove(&owner);
        }
    }
}
