use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::ConfigError;

/// Reference data addressed by an immutable version id.
pub trait Versioned {
    fn version(&self) -> &str;
}

/// Holds every loaded version of a piece of reference data plus a pointer to
/// the active one. Snapshots are never mutated; activation swaps the `Arc`
/// so a reader sees either the old table or the new one, never a mix.
pub struct VersionedStore<T> {
    kind: &'static str,
    inner: RwLock<StoreState<T>>,
}

struct StoreState<T> {
    active: Arc<T>,
    versions: BTreeMap<String, Arc<T>>,
}

impl<T: Versioned> VersionedStore<T> {
    pub fn new(kind: &'static str, initial: T) -> Self {
        let initial = Arc::new(initial);
        let versions = BTreeMap::from([(initial.version().to_string(), Arc::clone(&initial))]);
        VersionedStore { kind, inner: RwLock::new(StoreState { active: initial, versions }) }
    }

    /// The snapshot in force right now. Hold on to the returned `Arc` for the
    /// duration of a calculation.
    pub fn active(&self) -> Arc<T> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.active)
    }

    pub fn get(&self, version: &str) -> Option<Arc<T>> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        state.versions.get(version).cloned()
    }

    pub fn versions(&self) -> Vec<String> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        state.versions.keys().cloned().collect()
    }

    /// Register a new version without activating it. Version ids are
    /// write-once.
    pub fn publish(&self, snapshot: T) -> Result<Arc<T>, ConfigError> {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let version = snapshot.version().to_string();
        if state.versions.contains_key(&version) {
            return Err(ConfigError::Invalid {
                table: self.kind,
                reason: format!("version {version:?} is already loaded"),
            });
        }
        let snapshot = Arc::new(snapshot);
        state.versions.insert(version.clone(), Arc::clone(&snapshot));
        info!(kind = self.kind, %version, "published reference data version");
        Ok(snapshot)
    }

    pub fn activate(&self, version: &str) -> Result<Arc<T>, ConfigError> {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = state.versions.get(version).cloned().ok_or_else(|| ConfigError::Invalid {
            table: self.kind,
            reason: format!("version {version:?} is not loaded"),
        })?;
        state.active = Arc::clone(&snapshot);
        info!(kind = self.kind, %version, "activated reference data version");
        Ok(snapshot)
    }

    pub fn publish_and_activate(&self, snapshot: T) -> Result<Arc<T>, ConfigError> {
        let version = snapshot.version().to_string();
        self.publish(snapshot)?;
        self.activate(&version)
    }
}
