pub mod container;
pub mod errors;

// Re-export key types for convenience
pub use container::{
    Binding, BindingProvider, BindingValue, Candidate, CandidateBuilder, CandidateFilter,
    CandidateId, ConsistencyPolicy, Container, ContainerBuilder, ContainerConfig,
    ContextScopeResolver, CreationStrategy, DeferredBinding, DiscoveredBatch, Discoverer,
    FnCreationStrategy,
    GraphSnapshot, Instance, InstantiationEngine, Key, Laziness, Multiplicity, Qualifier, RawType,
    Request, ResolutionStrategy, ResolvedBindings, ScopeResolver, ScopeTag, SingletonResolver,
    TypeIndex, TypeRef, DEFAULT_MAX_DISCOVERY_DEPTH,
};
pub use errors::CoreError;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get crate version
pub fn version() -> &'static str {
    VERSION
}
