use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::container::candidate::{
    BindingValue, Candidate, CandidateId, DeferredBinding, Instance, Laziness, Multiplicity,
    ResolvedBindings,
};
use crate::container::discovery::Discoverer;
use crate::container::index::{CandidateFilter, TypeIndex};
use crate::container::key::{Key, RawType};
use crate::container::policy::ConsistencyPolicy;
use crate::container::scope::{ScopeResolver, ScopeTag};
use crate::errors::CoreError;

/// The store proper: index and policy mutate together under one write guard
/// so multi-bucket changes become visible atomically.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) index: TypeIndex,
    pub(crate) policy: ConsistencyPolicy,
}

impl StoreState {
    /// Commit an addition batch: validate every member against the
    /// post-batch view, reject introduced cycles, then index and count.
    /// Any failure leaves the store unchanged.
    pub(crate) fn commit_batch(&mut self, batch: &[Arc<Candidate>]) -> Result<(), CoreError> {
        for candidate in batch {
            self.policy.check_addition(&self.index, batch, candidate)?;
        }
        self.policy.check_cycles(&self.index, batch)?;
        self.index.put_all(batch)?;
        for candidate in batch {
            self.policy.record_addition(candidate);
        }
        Ok(())
    }

    /// Retract a removal batch sequentially; on any failure every
    /// already-removed entry is restored in reverse order.
    pub(crate) fn retract_batch(
        &mut self,
        ids: &[CandidateId],
    ) -> Result<Vec<Arc<Candidate>>, CoreError> {
        let mut removed: Vec<Arc<Candidate>> = Vec::with_capacity(ids.len());

        let rollback = |state: &mut Self, removed: Vec<Arc<Candidate>>| {
            for candidate in removed.into_iter().rev() {
                // Restoring a just-removed entry cannot fail.
                let _ = state.index.put(candidate.clone());
                state.policy.record_addition(&candidate);
            }
        };

        for id in ids {
            let candidate = match self.index.get(id) {
                Some(candidate) => candidate.clone(),
                None => {
                    let err = CoreError::CandidateNotFound {
                        candidate: id.display_name(),
                    };
                    rollback(self, removed);
                    return Err(err);
                }
            };
            if let Err(err) = self.policy.check_removal(&self.index, &candidate) {
                rollback(self, removed);
                return Err(err);
            }
            if let Err(err) = self.index.remove(id) {
                rollback(self, removed);
                return Err(err);
            }
            if let Err(err) = self.policy.record_removal(&candidate) {
                let _ = self.index.put(candidate.clone());
                rollback(self, removed);
                return Err(err);
            }
            removed.push(candidate);
        }
        Ok(removed)
    }
}

/// A resolution request: what to resolve, how many, and when
#[derive(Debug, Clone)]
pub struct Request {
    pub key: Key,
    pub multiplicity: Multiplicity,
    pub laziness: Laziness,
}

impl Request {
    pub fn new(key: Key, multiplicity: Multiplicity, laziness: Laziness) -> Self {
        Self {
            key,
            multiplicity,
            laziness,
        }
    }

    pub fn one(key: Key) -> Self {
        Self::new(key, Multiplicity::ExactlyOne, Laziness::Eager)
    }

    pub fn optional(key: Key) -> Self {
        Self::new(key, Multiplicity::AtMostOne, Laziness::Eager)
    }

    pub fn all(key: Key) -> Self {
        Self::new(key, Multiplicity::Any, Laziness::Eager)
    }

    pub fn deferred(mut self) -> Self {
        self.laziness = Laziness::Deferred;
        self
    }
}

/// Handles a composite request shape for one requested raw type. The engine
/// itself only needs the built-in default plus this registry lookup.
pub trait ResolutionStrategy: Send + Sync {
    fn resolve(
        &self,
        engine: &Arc<InstantiationEngine>,
        request: &Request,
    ) -> Result<BindingValue, CoreError>;
}

/// Resolves requests to live instances: index lookup, discovery on miss,
/// scope-aware caching, recursive eager construction and deferred wrappers.
/// All instance state lives in the scope resolvers.
pub struct InstantiationEngine {
    state: Arc<RwLock<StoreState>>,
    scopes: HashMap<ScopeTag, Arc<dyn ScopeResolver>>,
    strategies: HashMap<RawType, Arc<dyn ResolutionStrategy>>,
    discoverer: Discoverer,
    discovery_enabled: bool,
}

impl std::fmt::Debug for InstantiationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantiationEngine")
            .field("scopes", &self.scopes.len())
            .field("strategies", &self.strategies.len())
            .field("max_discovery_depth", &self.discoverer.max_depth())
            .field("discovery_enabled", &self.discovery_enabled)
            .finish()
    }
}

impl InstantiationEngine {
    pub(crate) fn new(
        state: Arc<RwLock<StoreState>>,
        scopes: HashMap<ScopeTag, Arc<dyn ScopeResolver>>,
        strategies: HashMap<RawType, Arc<dyn ResolutionStrategy>>,
        discoverer: Discoverer,
        discovery_enabled: bool,
    ) -> Self {
        Self {
            state,
            scopes,
            strategies,
            discoverer,
            discovery_enabled,
        }
    }

    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>, CoreError> {
        self.state
            .read()
            .map_err(|_| CoreError::lock_poisoned("injectable store"))
    }

    pub(crate) fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>, CoreError> {
        self.state
            .write()
            .map_err(|_| CoreError::lock_poisoned("injectable store"))
    }

    /// Scope resolver registered for a tag
    pub fn scope_resolver(&self, scope: &ScopeTag) -> Option<&Arc<dyn ScopeResolver>> {
        self.scopes.get(scope)
    }

    /// Candidates matching a key. An empty unfiltered result triggers one
    /// discovery pass; filtered lookups never discover, since a freshly
    /// synthesized candidate could not be required to satisfy an arbitrary
    /// caller-supplied matcher.
    pub(crate) fn matching_candidates(
        self: &Arc<Self>,
        key: &Key,
        filters: &[&CandidateFilter],
    ) -> Result<Vec<Arc<Candidate>>, CoreError> {
        let matches = self.read_state()?.index.resolve(key, filters);
        if !matches.is_empty()
            || !filters.is_empty()
            || !self.discovery_enabled
            || !self.discoverer.has_strategies()
        {
            return Ok(matches);
        }

        self.discover_and_commit(key)?;
        Ok(self.read_state()?.index.resolve(key, &[]))
    }

    /// Run discovery for a key and commit the synthesized batch atomically.
    /// A consistency failure during commit wraps as the discovery cause and
    /// leaves the store unchanged.
    fn discover_and_commit(self: &Arc<Self>, key: &Key) -> Result<(), CoreError> {
        let mut state = self.write_state()?;

        // Another caller may have committed between our read and this write.
        if !state.index.resolve(key, &[]).is_empty() {
            return Ok(());
        }

        let discovered = self.discoverer.discover(&state.index, key)?;
        if discovered.is_empty() {
            return Ok(());
        }

        state.commit_batch(&discovered.candidates).map_err(|err| {
            CoreError::DiscoveryFailed {
                key: key.display_name(),
                path: key.display_name(),
                cause: Box::new(err),
                secondary: discovered.secondary,
            }
        })?;
        debug!(key = %key, committed = discovered.candidates.len(), "discovery batch committed");
        Ok(())
    }

    /// Resolve exactly one instance for a key
    pub fn get_instance_dyn(self: &Arc<Self>, key: &Key) -> Result<Instance, CoreError> {
        let matches = self.matching_candidates(key, &[])?;
        self.single_instance(key, matches)?
            .ok_or_else(|| CoreError::NoSuchInstance {
                key: key.display_name(),
            })
    }

    /// Resolve at most one instance for a key. Discovery misses count as
    /// absence, but more than one match is still ambiguity and raises.
    pub fn try_get_instance_dyn(self: &Arc<Self>, key: &Key) -> Result<Option<Instance>, CoreError> {
        let matches = match self.matching_candidates(key, &[]) {
            Ok(matches) => matches,
            Err(err) if err.is_resolution_error() && !err.is_ambiguity_error() => Vec::new(),
            Err(err) => return Err(err),
        };
        self.single_instance(key, matches)
    }

    fn single_instance(
        self: &Arc<Self>,
        key: &Key,
        matches: Vec<Arc<Candidate>>,
    ) -> Result<Option<Instance>, CoreError> {
        if matches.len() > 1 {
            return Err(CoreError::AmbiguousInstance {
                key: key.display_name(),
                matches: matches.iter().map(|c| c.display_name()).collect(),
            });
        }
        match matches.first() {
            Some(candidate) => Ok(Some(self.instantiate(candidate)?)),
            None => Ok(None),
        }
    }

    /// Resolve every instance for a key. Never raises for emptiness or
    /// ambiguity; entries that fail to resolve or construct are omitted.
    pub fn get_instances_dyn(self: &Arc<Self>, key: &Key) -> Vec<Instance> {
        let matches = match self.matching_candidates(key, &[]) {
            Ok(matches) => matches,
            Err(err) => {
                warn!(key = %key, error = %err, "collection lookup failed; returning empty set");
                return Vec::new();
            }
        };
        self.instantiate_all(key, matches)
    }

    /// Filtered single lookup; never triggers discovery
    pub fn get_instance_where(
        self: &Arc<Self>,
        key: &Key,
        filters: &[&CandidateFilter],
    ) -> Result<Instance, CoreError> {
        let matches = self.matching_candidates(key, filters)?;
        self.single_instance(key, matches)?
            .ok_or_else(|| CoreError::NoSuchInstance {
                key: key.display_name(),
            })
    }

    /// Filtered collection lookup; never triggers discovery
    pub fn get_instances_where(
        self: &Arc<Self>,
        key: &Key,
        filters: &[&CandidateFilter],
    ) -> Vec<Instance> {
        let matches = match self.matching_candidates(key, filters) {
            Ok(matches) => matches,
            Err(err) => {
                warn!(key = %key, error = %err, "filtered lookup failed; returning empty set");
                return Vec::new();
            }
        };
        self.instantiate_all(key, matches)
    }

    fn instantiate_all(
        self: &Arc<Self>,
        key: &Key,
        matches: Vec<Arc<Candidate>>,
    ) -> Vec<Instance> {
        let mut instances = Vec::with_capacity(matches.len());
        for candidate in matches {
            match self.instantiate(&candidate) {
                Ok(instance) => instances.push(instance),
                Err(err) => {
                    warn!(
                        key = %key,
                        candidate = %candidate.display_name(),
                        error = %err,
                        "omitting entry that failed to construct"
                    );
                }
            }
        }
        instances
    }

    /// Resolve a full request, delegating composite shapes to a registered
    /// strategy for the requested raw type when one exists.
    pub fn resolve_request(self: &Arc<Self>, request: &Request) -> Result<BindingValue, CoreError> {
        if let Some(raw) = request.key.type_ref.raw() {
            if let Some(strategy) = self.strategies.get(&raw) {
                return strategy.resolve(self, request);
            }
        }
        self.default_resolve(request)
    }

    /// Built-in request handling: deferred wrapper, collection, optional or
    /// single, in that order of precedence.
    pub fn default_resolve(self: &Arc<Self>, request: &Request) -> Result<BindingValue, CoreError> {
        if request.laziness.is_deferred() {
            let engine = Arc::clone(self);
            let eager = Request::new(request.key.clone(), request.multiplicity, Laziness::Eager);
            return Ok(BindingValue::Deferred(DeferredBinding::new(
                request.key.clone(),
                request.multiplicity,
                Arc::new(move || engine.resolve_request(&eager)),
            )));
        }
        match request.multiplicity {
            Multiplicity::ExactlyOne => Ok(BindingValue::One(self.get_instance_dyn(&request.key)?)),
            Multiplicity::AtMostOne => {
                Ok(BindingValue::Optional(self.try_get_instance_dyn(&request.key)?))
            }
            Multiplicity::Any => Ok(BindingValue::Many(self.get_instances_dyn(&request.key))),
        }
    }

    /// Produce an instance for a candidate, consulting its scope resolver
    /// for a cached one first. Pseudo-scoped candidates always construct
    /// fresh and are never cached.
    pub fn instantiate(self: &Arc<Self>, candidate: &Arc<Candidate>) -> Result<Instance, CoreError> {
        let scope = candidate.scope();
        if scope.is_pseudo() {
            return self.construct(candidate);
        }

        let resolver = self
            .scopes
            .get(scope)
            .ok_or_else(|| CoreError::ScopeInactive {
                scope: scope.to_string(),
            })?;
        if !resolver.is_active() {
            return Err(CoreError::ScopeInactive {
                scope: scope.to_string(),
            });
        }

        if let Some(instance) = resolver.get(candidate.id()) {
            return Ok(instance);
        }
        let instance = self.construct(candidate)?;
        resolver.put(candidate.id(), instance.clone());
        Ok(instance)
    }

    /// Resolve eager bindings recursively, wrap deferred ones, then invoke
    /// the factory.
    fn construct(self: &Arc<Self>, candidate: &Arc<Candidate>) -> Result<Instance, CoreError> {
        let mut values = Vec::with_capacity(candidate.bindings().len());
        for binding in candidate.bindings() {
            let request = Request::new(
                binding.target.clone(),
                binding.multiplicity,
                binding.laziness,
            );
            let value = self.resolve_request(&request).map_err(|err| {
                CoreError::CreationFailed {
                    candidate: candidate.display_name(),
                    source: Box::new(err),
                }
            })?;
            values.push(value);
        }

        let resolved = ResolvedBindings::new(values);
        candidate
            .create(&resolved)
            .map_err(|err| CoreError::CreationFailed {
                candidate: candidate.display_name(),
                source: Box::new(err),
            })
    }

    /// Release a removed candidate's cached instance, if its scope holds
    /// one, and run its destructor.
    pub(crate) fn release(&self, candidate: &Candidate) {
        if candidate.scope().is_pseudo() {
            return;
        }
        if let Some(resolver) = self.scopes.get(candidate.scope()) {
            if let Some(instance) = resolver.remove(candidate.id()) {
                debug!(candidate = %candidate.display_name(), "destroying released instance");
                candidate.destroy(instance);
            }
        }
    }

    /// Teardown hook: drain every scope resolver and run destructors for
    /// candidates still indexed. Instance release order within a scope is
    /// unspecified.
    pub(crate) fn shutdown(&self) -> Result<(), CoreError> {
        let mut drained: Vec<(CandidateId, Instance)> = Vec::new();
        for resolver in self.scopes.values() {
            drained.extend(resolver.drain());
        }

        // Pair each instance with its candidate under the read guard, then
        // drop the guard before any destructor runs.
        let mut releasable: Vec<(Arc<Candidate>, Instance)> = Vec::with_capacity(drained.len());
        {
            let state = self.read_state()?;
            for (id, instance) in drained {
                if let Some(candidate) = state.index.get(&id) {
                    releasable.push((candidate.clone(), instance));
                }
            }
        }
        for (candidate, instance) in releasable {
            candidate.destroy(instance);
        }
        Ok(())
    }
}
