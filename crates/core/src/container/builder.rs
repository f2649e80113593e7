use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::debug;

use crate::container::container::Container;
use crate::container::discovery::{
    CreationStrategy, Discoverer, DEFAULT_MAX_DISCOVERY_DEPTH,
};
use crate::container::engine::{InstantiationEngine, ResolutionStrategy, StoreState};
use crate::container::key::RawType;
use crate::container::scope::{ScopeResolver, ScopeTag, SingletonResolver};

/// Tunables for a container. Deserializable so hosts can load it from their
/// own configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Maximum auto-discovery recursion depth before the expansion aborts
    pub max_discovery_depth: usize,
    /// Whether unresolved lookups may trigger auto-discovery at all
    pub discovery_enabled: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_discovery_depth: DEFAULT_MAX_DISCOVERY_DEPTH,
            discovery_enabled: true,
        }
    }
}

/// Builder wiring scope resolvers, creation strategies and resolution
/// strategies into a [`Container`].
pub struct ContainerBuilder {
    config: ContainerConfig,
    scopes: HashMap<ScopeTag, Arc<dyn ScopeResolver>>,
    creation_typed: Vec<(RawType, Arc<dyn CreationStrategy>)>,
    creation_fallback: Vec<Arc<dyn CreationStrategy>>,
    resolution: HashMap<RawType, Arc<dyn ResolutionStrategy>>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
            scopes: HashMap::new(),
            creation_typed: Vec::new(),
            creation_fallback: Vec::new(),
            resolution: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_discovery_depth(mut self, depth: usize) -> Self {
        self.config.max_discovery_depth = depth;
        self
    }

    pub fn discovery_enabled(mut self, enabled: bool) -> Self {
        self.config.discovery_enabled = enabled;
        self
    }

    /// Register a resolver for a scope tag, replacing any previous one.
    /// The transient pseudo-scope never caches and takes no resolver.
    pub fn scope_resolver(
        mut self,
        scope: ScopeTag,
        resolver: Arc<dyn ScopeResolver>,
    ) -> Self {
        self.scopes.insert(scope, resolver);
        self
    }

    /// Register a creation strategy consulted only for one raw type
    pub fn creation_strategy_for<T: 'static + ?Sized>(
        mut self,
        strategy: Arc<dyn CreationStrategy>,
    ) -> Self {
        self.creation_typed.push((RawType::of::<T>(), strategy));
        self
    }

    /// Register a fallback creation strategy, consulted in registration
    /// order after any typed strategy
    pub fn creation_strategy(mut self, strategy: Arc<dyn CreationStrategy>) -> Self {
        self.creation_fallback.push(strategy);
        self
    }

    /// Register a resolution strategy for requests of one raw type
    pub fn resolution_strategy<T: 'static + ?Sized>(
        mut self,
        strategy: Arc<dyn ResolutionStrategy>,
    ) -> Self {
        self.resolution.insert(RawType::of::<T>(), strategy);
        self
    }

    pub fn build(self) -> Container {
        let mut scopes = self.scopes;
        scopes
            .entry(ScopeTag::Singleton)
            .or_insert_with(|| Arc::new(SingletonResolver::new()));

        let mut discoverer = Discoverer::new(self.config.max_discovery_depth);
        for (raw, strategy) in self.creation_typed {
            discoverer.register_for(raw, strategy);
        }
        for strategy in self.creation_fallback {
            discoverer.register_fallback(strategy);
        }

        let state = Arc::new(RwLock::new(StoreState::default()));
        let engine = Arc::new(InstantiationEngine::new(
            Arc::clone(&state),
            scopes,
            self.resolution,
            discoverer,
            self.config.discovery_enabled,
        ));
        debug!(
            max_discovery_depth = self.config.max_discovery_depth,
            discovery_enabled = self.config.discovery_enabled,
            "container built"
        );
        Container::new(state, engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ContainerConfig::default();
        assert_eq!(config.max_discovery_depth, DEFAULT_MAX_DISCOVERY_DEPTH);
        assert!(config.discovery_enabled);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ContainerConfig =
            serde_json::from_str(r#"{ "max_discovery_depth": 8 }"#).unwrap();
        assert_eq!(config.max_discovery_depth, 8);
        assert!(config.discovery_enabled);
    }

    #[test]
    fn test_build_installs_singleton_resolver() {
        let container = ContainerBuilder::new().build();
        assert_eq!(container.candidate_count().unwrap(), 0);
    }
}
