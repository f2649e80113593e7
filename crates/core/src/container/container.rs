use std::any::Any;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::container::candidate::{BindingValue, Candidate, CandidateId, Instance};
use crate::container::diagnostics::GraphSnapshot;
use crate::container::engine::{InstantiationEngine, Request, StoreState};
use crate::container::index::CandidateFilter;
use crate::container::key::Key;
use crate::errors::CoreError;

/// The injectable store facade: candidate registration and removal with
/// batch atomicity, plus typed instance lookup backed by the engine.
///
/// Cloning is cheap and every clone shares the same store.
#[derive(Debug, Clone)]
pub struct Container {
    state: Arc<RwLock<StoreState>>,
    engine: Arc<InstantiationEngine>,
}

impl Container {
    pub(crate) fn new(
        state: Arc<RwLock<StoreState>>,
        engine: Arc<InstantiationEngine>,
    ) -> Self {
        Self { state, engine }
    }

    /// Register a single candidate. Equivalent to a one-element batch.
    pub fn register(&self, candidate: Arc<Candidate>) -> Result<(), CoreError> {
        self.register_all(vec![candidate])
    }

    /// Register a batch of candidates atomically: members may depend on each
    /// other, and a rejection of any member leaves the store untouched.
    pub fn register_all(&self, batch: Vec<Arc<Candidate>>) -> Result<(), CoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.write_state()?;
        state.commit_batch(&batch)?;
        debug!(count = batch.len(), "candidate batch registered");
        Ok(())
    }

    /// Remove a single candidate. Equivalent to a one-element batch.
    pub fn remove(&self, id: &CandidateId) -> Result<(), CoreError> {
        self.remove_all(std::slice::from_ref(id))
    }

    /// Remove a batch of candidates. Removal is checked sequentially and
    /// rolled back on failure; cached instances of removed candidates are
    /// released and destroyed after the retraction commits.
    pub fn remove_all(&self, ids: &[CandidateId]) -> Result<(), CoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let removed = self.write_state()?.retract_batch(ids)?;
        for candidate in &removed {
            self.engine.release(candidate);
        }
        debug!(count = removed.len(), "candidate batch removed");
        Ok(())
    }

    /// Resolve exactly one instance of `T`, running auto-discovery on a miss
    pub fn get_instance<T: Any + Send + Sync>(&self) -> Result<Arc<T>, CoreError> {
        let key = Key::of::<T>();
        let instance = self.engine.get_instance_dyn(&key)?;
        downcast::<T>(&key, instance)
    }

    /// Resolve exactly one instance for an explicit key
    pub fn get_instance_for<T: Any + Send + Sync>(&self, key: &Key) -> Result<Arc<T>, CoreError> {
        let instance = self.engine.get_instance_dyn(key)?;
        downcast::<T>(key, instance)
    }

    /// Resolve at most one instance of `T`; an unresolvable or ambiguous key
    /// yields `None` rather than an error
    pub fn try_get_instance<T: Any + Send + Sync>(&self) -> Result<Option<Arc<T>>, CoreError> {
        self.try_get_instance_for(&Key::of::<T>())
    }

    /// Resolve at most one instance for an explicit key
    pub fn try_get_instance_for<T: Any + Send + Sync>(
        &self,
        key: &Key,
    ) -> Result<Option<Arc<T>>, CoreError> {
        match self.engine.try_get_instance_dyn(key)? {
            Some(instance) => Ok(Some(downcast::<T>(key, instance)?)),
            None => Ok(None),
        }
    }

    /// Resolve every instance of `T`. Entries that fail to construct or
    /// downcast are omitted, never raised.
    pub fn get_instances<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.get_instances_for(&Key::of::<T>())
    }

    /// Resolve every instance for an explicit key
    pub fn get_instances_for<T: Any + Send + Sync>(&self, key: &Key) -> Vec<Arc<T>> {
        self.engine
            .get_instances_dyn(key)
            .into_iter()
            .filter_map(|instance| downcast::<T>(key, instance).ok())
            .collect()
    }

    /// Single lookup restricted by caller-supplied matchers. Filtered
    /// lookups consult the index only and never trigger discovery.
    pub fn get_instance_where<T: Any + Send + Sync>(
        &self,
        key: &Key,
        filters: &[&CandidateFilter],
    ) -> Result<Arc<T>, CoreError> {
        let instance = self.engine.get_instance_where(key, filters)?;
        downcast::<T>(key, instance)
    }

    /// Collection lookup restricted by caller-supplied matchers
    pub fn get_instances_where<T: Any + Send + Sync>(
        &self,
        key: &Key,
        filters: &[&CandidateFilter],
    ) -> Vec<Arc<T>> {
        self.engine
            .get_instances_where(key, filters)
            .into_iter()
            .filter_map(|instance| downcast::<T>(key, instance).ok())
            .collect()
    }

    /// Resolve an arbitrary request shape (multiplicity and laziness)
    pub fn resolve(&self, request: &Request) -> Result<BindingValue, CoreError> {
        self.engine.resolve_request(request)
    }

    /// Whether a candidate with this identity is registered
    pub fn contains(&self, id: &CandidateId) -> Result<bool, CoreError> {
        Ok(self.read_state()?.index.contains(id))
    }

    /// Number of registered candidates
    pub fn candidate_count(&self) -> Result<usize, CoreError> {
        Ok(self.read_state()?.index.len())
    }

    /// Point-in-time view of candidates, their bindings and the live
    /// singular-dependency reference counts
    pub fn snapshot(&self) -> Result<GraphSnapshot, CoreError> {
        let state = self.read_state()?;
        Ok(GraphSnapshot::capture(&state.index, &state.policy))
    }

    /// Drain every scope and run destructors for all cached instances.
    /// Candidate registrations survive; only instance state is torn down.
    pub fn shutdown(&self) -> Result<(), CoreError> {
        debug!("container shutdown requested");
        self.engine.shutdown()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreState>, CoreError> {
        self.state
            .read()
            .map_err(|_| CoreError::lock_poisoned("injectable store"))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreState>, CoreError> {
        self.state
            .write()
            .map_err(|_| CoreError::lock_poisoned("injectable store"))
    }
}

fn downcast<T: Any + Send + Sync>(key: &Key, instance: Instance) -> Result<Arc<T>, CoreError> {
    instance.downcast::<T>().map_err(|_| {
        CoreError::invariant(format!(
            "candidate for {} produced an instance of an unexpected concrete type",
            key.display_name()
        ))
    })
}
