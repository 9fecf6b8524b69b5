//! Store registry
//!
//! The registry owns every store, stores own profiles, and profiles own
//! their collections. `reset`, `export_snapshot`, and `import_snapshot` let
//! tests and the persistence gate sandbox the whole lifecycle.

use crate::model::ProfileState;
use engram_core::{EngramError, EngramResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// One store: a map of profile id to profile state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// Profiles owned by this store
    pub profiles: BTreeMap<String, ProfileState>,
}

/// Top-level registry of stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    /// Stores by store id
    pub stores: BTreeMap<String, StoreState>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every store.
    pub fn reset(&mut self) {
        self.stores.clear();
    }

    /// Immutable profile lookup.
    pub fn profile(&self, store_id: &str, profile_id: &str) -> Option<&ProfileState> {
        self.stores.get(store_id)?.profiles.get(profile_id)
    }

    /// Mutable profile lookup, creating the default state on miss.
    pub fn profile_mut(&mut self, store_id: &str, profile_id: &str) -> &mut ProfileState {
        self.stores
            .entry(store_id.to_string())
            .or_default()
            .profiles
            .entry(profile_id.to_string())
            .or_insert_with(|| ProfileState::new(store_id, profile_id))
    }

    /// Serialize the whole registry to the snapshot shape.
    pub fn export_snapshot(&self) -> EngramResult<Value> {
        let stores = serde_json::to_value(&self.stores)
            .map_err(|e| EngramError::storage(format!("snapshot export failed: {e}")))?;
        Ok(json!({ "stores": stores }))
    }

    /// Replace the registry from a snapshot value.
    ///
    /// The modern shape is `{"stores": {...}}`; the legacy shape
    /// `{"profiles": {...}}` imports under `default_store`.
    pub fn import_snapshot(&mut self, snapshot: &Value, default_store: &str) -> EngramResult<()> {
        let object = snapshot
            .as_object()
            .ok_or_else(|| EngramError::contract("snapshot must be an object"))?;

        let stores: BTreeMap<String, StoreState> = if let Some(stores) = object.get("stores") {
            serde_json::from_value(stores.clone())
                .map_err(|e| EngramError::contract(format!("snapshot stores malformed: {e}")))?
        } else if let Some(profiles) = object.get("profiles") {
            let profiles: BTreeMap<String, ProfileState> = serde_json::from_value(profiles.clone())
                .map_err(|e| EngramError::contract(format!("snapshot profiles malformed: {e}")))?;
            let mut stores = BTreeMap::new();
            stores.insert(default_store.to_string(), StoreState { profiles });
            stores
        } else {
            BTreeMap::new()
        };

        debug!(stores = stores.len(), "imported snapshot");
        self.stores = stores;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::constants::{DEFAULT_SLEEP_THRESHOLD, PROFILE_SENTINEL};

    #[test]
    fn profile_miss_creates_defaults() {
        let mut registry = Registry::new();
        let state = registry.profile_mut("space-a", PROFILE_SENTINEL);
        assert_eq!(state.clocks.fatigue_threshold, DEFAULT_SLEEP_THRESHOLD);
        assert_eq!(state.review_archive.active_limit, 32);
        assert_eq!(state.recall_policy.allowed_store_ids, vec!["space-a"]);
        assert!(state.recall_policy.policy_id.starts_with("pol_"));
    }

    #[test]
    fn snapshot_round_trips() {
        let mut registry = Registry::new();
        registry.profile_mut("space-a", PROFILE_SENTINEL);
        let snapshot = registry.export_snapshot().unwrap();

        let mut restored = Registry::new();
        restored.import_snapshot(&snapshot, "coding-agent").unwrap();
        assert_eq!(registry, restored);
    }

    #[test]
    fn legacy_snapshot_imports_under_default_store() {
        let mut registry = Registry::new();
        registry.profile_mut("coding-agent", PROFILE_SENTINEL);
        let snapshot = registry.export_snapshot().unwrap();
        let legacy = json!({ "profiles": snapshot["stores"]["coding-agent"]["profiles"] });

        let mut restored = Registry::new();
        restored.import_snapshot(&legacy, "coding-agent").unwrap();
        assert!(restored.profile("coding-agent", PROFILE_SENTINEL).is_some());
    }
}
