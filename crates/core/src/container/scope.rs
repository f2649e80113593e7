use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use uuid::Uuid;

use crate::container::candidate::{CandidateId, Instance};

/// Scope marker carried by a candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeTag {
    /// Single instance shared across the container
    Singleton,
    /// Pseudo-scope: a fresh instance per request, never cached
    Transient,
    /// Custom scope handled by a registered resolver
    Named(String),
}

impl ScopeTag {
    /// Pseudo-scopes skip the resolver entirely and always construct fresh
    pub fn is_pseudo(&self) -> bool {
        matches!(self, ScopeTag::Transient)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ScopeTag::Singleton => "singleton",
            ScopeTag::Transient => "transient",
            ScopeTag::Named(name) => name,
        }
    }
}

impl Default for ScopeTag {
    fn default() -> Self {
        ScopeTag::Transient
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Instance cache for one scope. Implementations own all instance state;
/// the engine holds none of its own.
pub trait ScopeResolver: Send + Sync {
    /// Cached instance for a candidate in the active context, if any
    fn get(&self, id: &CandidateId) -> Option<Instance>;

    /// Cache a freshly constructed instance in the active context
    fn put(&self, id: &CandidateId, instance: Instance);

    /// Drop and return the cached instance for a candidate, if any
    fn remove(&self, id: &CandidateId) -> Option<Instance>;

    /// Whether the scope currently has an active context
    fn is_active(&self) -> bool {
        true
    }

    /// Drop and return every cached instance; used at container shutdown
    fn drain(&self) -> Vec<(CandidateId, Instance)>;
}

/// Resolver for the singleton scope: one explicit instance map, emptied only
/// through removal or the shutdown teardown hook.
#[derive(Debug, Default)]
pub struct SingletonResolver {
    instances: RwLock<HashMap<CandidateId, Instance>>,
}

impl SingletonResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScopeResolver for SingletonResolver {
    fn get(&self, id: &CandidateId) -> Option<Instance> {
        self.instances.read().ok()?.get(id).cloned()
    }

    fn put(&self, id: &CandidateId, instance: Instance) {
        if let Ok(mut instances) = self.instances.write() {
            instances.insert(id.clone(), instance);
        }
    }

    fn remove(&self, id: &CandidateId) -> Option<Instance> {
        self.instances.write().ok()?.remove(id)
    }

    fn drain(&self) -> Vec<(CandidateId, Instance)> {
        match self.instances.write() {
            Ok(mut instances) => instances.drain().collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Resolver for context-based scopes (request-style lifetimes): instances
/// are cached per opened context, and the scope is inactive while no
/// context is open.
#[derive(Debug, Default)]
pub struct ContextScopeResolver {
    contexts: RwLock<HashMap<Uuid, HashMap<CandidateId, Instance>>>,
    active: RwLock<Option<Uuid>>,
}

impl ContextScopeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh context and make it the active one
    pub fn open_context(&self) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut contexts) = self.contexts.write() {
            contexts.insert(id, HashMap::new());
        }
        if let Ok(mut active) = self.active.write() {
            *active = Some(id);
        }
        id
    }

    /// Make a previously opened context the active one
    pub fn activate(&self, id: &Uuid) -> bool {
        let known = self
            .contexts
            .read()
            .map(|c| c.contains_key(id))
            .unwrap_or(false);
        if known {
            if let Ok(mut active) = self.active.write() {
                *active = Some(*id);
            }
        }
        known
    }

    /// Close a context, returning the instances it cached so the caller can
    /// run destructors
    pub fn close_context(&self, id: &Uuid) -> Vec<(CandidateId, Instance)> {
        let released = match self.contexts.write() {
            Ok(mut contexts) => contexts
                .remove(id)
                .map(|m| m.into_iter().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        if let Ok(mut active) = self.active.write() {
            if *active == Some(*id) {
                *active = None;
            }
        }
        released
    }

    fn active_id(&self) -> Option<Uuid> {
        *self.active.read().ok()?
    }
}

impl ScopeResolver for ContextScopeResolver {
    fn get(&self, id: &CandidateId) -> Option<Instance> {
        let context = self.active_id()?;
        self.contexts.read().ok()?.get(&context)?.get(id).cloned()
    }

    fn put(&self, id: &CandidateId, instance: Instance) {
        if let Some(context) = self.active_id() {
            if let Ok(mut contexts) = self.contexts.write() {
                if let Some(cache) = contexts.get_mut(&context) {
                    cache.insert(id.clone(), instance);
                }
            }
        }
    }

    fn remove(&self, id: &CandidateId) -> Option<Instance> {
        let mut removed = None;
        if let Ok(mut contexts) = self.contexts.write() {
            for cache in contexts.values_mut() {
                if let Some(instance) = cache.remove(id) {
                    removed = Some(instance);
                }
            }
        }
        removed
    }

    fn is_active(&self) -> bool {
        self.active_id().is_some()
    }

    fn drain(&self) -> Vec<(CandidateId, Instance)> {
        let mut drained = Vec::new();
        if let Ok(mut contexts) = self.contexts.write() {
            for (_, cache) in contexts.drain() {
                drained.extend(cache);
            }
        }
        if let Ok(mut active) = self.active.write() {
            *active = None;
        }
        drained
    }
}
