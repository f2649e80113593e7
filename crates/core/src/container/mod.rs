#[allow(clippy::module_inception)]
pub mod container;
pub mod builder;
pub mod candidate;
pub mod diagnostics;
pub mod discovery;
pub mod engine;
pub mod index;
pub mod key;
pub mod policy;
pub mod scope;

pub use container::Container;
pub use builder::{ContainerBuilder, ContainerConfig};
pub use candidate::{
    Binding, BindingValue, Candidate, CandidateBuilder, CandidateId, DeferredBinding, Instance,
    Laziness, Multiplicity, ResolvedBindings,
};
pub use diagnostics::{BindingEdge, CandidateNode, GraphSnapshot, RefCountEntry};
pub use discovery::{
    BindingProvider, CreationStrategy, DiscoveredBatch, Discoverer, FnCreationStrategy,
    DEFAULT_MAX_DISCOVERY_DEPTH,
};
pub use engine::{InstantiationEngine, Request, ResolutionStrategy};
pub use index::{CandidateFilter, TypeIndex};
pub use key::{Key, Qualifier, RawType, TypeRef};
pub use policy::{ConsistencyPolicy, ResolutionPath};
pub use scope::{ContextScopeResolver, ScopeResolver, ScopeTag, SingletonResolver};
