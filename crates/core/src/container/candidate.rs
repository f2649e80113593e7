use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::container::discovery::BindingProvider;
use crate::container::key::{Key, Qualifier, RawType, TypeRef};
use crate::container::scope::ScopeTag;
use crate::errors::CoreError;

/// Instance produced by a candidate factory
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Factory callback: build an instance from resolved dependency values
pub type FactoryFn =
    Box<dyn Fn(&ResolvedBindings) -> Result<Instance, CoreError> + Send + Sync>;

/// Destructor callback invoked when a cached instance is released
pub type DestructorFn = Box<dyn Fn(Instance) + Send + Sync>;

/// How many candidates a binding target must resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Multiplicity {
    /// Exactly one satisfying candidate (a singular dependency)
    ExactlyOne,
    /// Zero or one satisfying candidate
    AtMostOne,
    /// Any number of satisfying candidates
    Any,
}

impl Multiplicity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Multiplicity::ExactlyOne => "exactly-one",
            Multiplicity::AtMostOne => "at-most-one",
            Multiplicity::Any => "any",
        }
    }
}

/// When a binding is resolved relative to its owner's construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Laziness {
    /// Resolved before the owning candidate's factory runs
    Eager,
    /// Wrapped as a callable that resolves on demand; the sanctioned way to
    /// break a dependency cycle.
    Deferred,
}

impl Laziness {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Laziness::Deferred)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Laziness::Eager => "eager",
            Laziness::Deferred => "deferred",
        }
    }
}

/// A declared dependency requirement of a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub target: Key,
    pub multiplicity: Multiplicity,
    pub laziness: Laziness,
}

impl Binding {
    pub fn new(target: Key, multiplicity: Multiplicity, laziness: Laziness) -> Self {
        Self {
            target,
            multiplicity,
            laziness,
        }
    }

    /// Eager exactly-one binding
    pub fn required(target: Key) -> Self {
        Self::new(target, Multiplicity::ExactlyOne, Laziness::Eager)
    }

    /// Eager at-most-one binding
    pub fn optional(target: Key) -> Self {
        Self::new(target, Multiplicity::AtMostOne, Laziness::Eager)
    }

    /// Eager any-count binding
    pub fn collection(target: Key) -> Self {
        Self::new(target, Multiplicity::Any, Laziness::Eager)
    }

    /// Deferred variant of this binding
    pub fn deferred(mut self) -> Self {
        self.laziness = Laziness::Deferred;
        self
    }
}

/// Candidate identity: structural (primary type + qualifiers) plus an opaque
/// discriminator distinguishing same-typed producers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateId {
    pub raw: RawType,
    pub qualifiers: BTreeSet<Qualifier>,
    pub discriminator: Option<String>,
}

impl CandidateId {
    /// Human-readable name for diagnostics
    pub fn display_name(&self) -> String {
        let mut name = self.raw.short_name().to_string();
        for q in &self.qualifiers {
            name.push(' ');
            name.push_str(&q.to_string());
        }
        if let Some(disc) = &self.discriminator {
            name.push_str(&format!(" #{}", disc));
        }
        name
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A registered source of instances for a type+qualifier key.
///
/// Candidates are born fully formed outside the core and never mutated by
/// it; the container's only state transition for a candidate is indexed vs.
/// not indexed. The advertised type set is precomputed by the builder and
/// never re-walked per operation.
pub struct Candidate {
    id: CandidateId,
    /// Full satisfied supertype set; the first entry is the primary type.
    types: Vec<TypeRef>,
    qualifiers: BTreeSet<Qualifier>,
    bindings: Vec<Binding>,
    scope: ScopeTag,
    factory: FactoryFn,
    destructor: Option<DestructorFn>,
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.id)
            .field("types", &self.types)
            .field("qualifiers", &self.qualifiers)
            .field("bindings", &self.bindings)
            .field("scope", &self.scope)
            .field("destructor", &self.destructor.is_some())
            .finish()
    }
}

impl Candidate {
    /// Start building a candidate whose primary type is `T`
    pub fn builder<T: 'static + ?Sized>() -> CandidateBuilder {
        CandidateBuilder::new(TypeRef::of::<T>())
    }

    /// Start building a candidate with an explicit primary type reference
    pub fn builder_for(primary: TypeRef) -> CandidateBuilder {
        CandidateBuilder::new(primary)
    }

    pub fn id(&self) -> &CandidateId {
        &self.id
    }

    /// All advertised type references, primary first
    pub fn types(&self) -> &[TypeRef] {
        &self.types
    }

    pub fn qualifiers(&self) -> &BTreeSet<Qualifier> {
        &self.qualifiers
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn scope(&self) -> &ScopeTag {
        &self.scope
    }

    pub fn has_destructor(&self) -> bool {
        self.destructor.is_some()
    }

    /// Invoke the factory with resolved dependency values
    pub fn create(&self, bindings: &ResolvedBindings) -> Result<Instance, CoreError> {
        (self.factory)(bindings)
    }

    /// Invoke the destructor, if any, for a released instance
    pub fn destroy(&self, instance: Instance) {
        if let Some(destructor) = &self.destructor {
            destructor(instance);
        }
    }

    /// Whether this candidate satisfies a requested key: the key's type must
    /// match an advertised type (every upper bound of a wildcard request)
    /// and the key's qualifiers must all be carried by the candidate.
    pub fn satisfies(&self, key: &Key) -> bool {
        if !key.qualifiers.is_subset(&self.qualifiers) {
            return false;
        }
        match &key.type_ref {
            TypeRef::Wildcard { upper_bounds } => {
                !upper_bounds.is_empty()
                    && upper_bounds.iter().all(|bound| {
                        self.types.iter().any(|t| t.matches_requested(bound))
                    })
            }
            requested => self.types.iter().any(|t| t.matches_requested(requested)),
        }
    }

    /// Human-readable name for diagnostics
    pub fn display_name(&self) -> String {
        self.id.display_name()
    }
}

/// Builder for candidates (the only way to construct one)
pub struct CandidateBuilder {
    primary: TypeRef,
    extra_types: Vec<TypeRef>,
    qualifiers: BTreeSet<Qualifier>,
    bindings: Vec<Binding>,
    scope: ScopeTag,
    discriminator: Option<String>,
    factory: Option<FactoryFn>,
    destructor: Option<DestructorFn>,
}

impl CandidateBuilder {
    fn new(primary: TypeRef) -> Self {
        Self {
            primary,
            extra_types: Vec::new(),
            qualifiers: BTreeSet::new(),
            bindings: Vec::new(),
            scope: ScopeTag::Transient,
            discriminator: None,
            factory: None,
            destructor: None,
        }
    }

    /// Advertise an additional satisfied supertype
    pub fn satisfies_type<T: 'static + ?Sized>(self) -> Self {
        self.satisfies(TypeRef::of::<T>())
    }

    /// Advertise an additional satisfied type reference
    pub fn satisfies(mut self, type_ref: TypeRef) -> Self {
        self.extra_types.push(type_ref);
        self
    }

    /// Tag the candidate with a qualifier
    pub fn qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifiers.insert(qualifier.into());
        self
    }

    /// Add a dependency binding
    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Add an eager exactly-one binding
    pub fn requires(self, target: Key) -> Self {
        self.binding(Binding::required(target))
    }

    /// Add an eager at-most-one binding
    pub fn requires_optional(self, target: Key) -> Self {
        self.binding(Binding::optional(target))
    }

    /// Add an eager any-count binding
    pub fn requires_all(self, target: Key) -> Self {
        self.binding(Binding::collection(target))
    }

    /// Add a deferred exactly-one binding
    pub fn requires_deferred(self, target: Key) -> Self {
        self.binding(Binding::required(target).deferred())
    }

    /// Append every binding a provider derives from a candidate source
    pub fn bindings_from<P: BindingProvider>(
        mut self,
        provider: &P,
        source: &P::Source,
    ) -> Result<Self, CoreError> {
        for binding in provider.bindings(source)? {
            self.bindings.push(binding);
        }
        Ok(self)
    }

    /// Set the scope tag
    pub fn scope(mut self, scope: ScopeTag) -> Self {
        self.scope = scope;
        self
    }

    /// Shorthand for the singleton scope
    pub fn singleton(self) -> Self {
        self.scope(ScopeTag::Singleton)
    }

    /// Set the opaque discriminator distinguishing same-typed producers
    pub fn discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    /// Set a typed factory closure
    pub fn constructs<F, T>(mut self, factory: F) -> Self
    where
        F: Fn(&ResolvedBindings) -> Result<T, CoreError> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.factory = Some(Box::new(move |deps| {
            let instance = factory(deps)?;
            Ok(Arc::new(instance) as Instance)
        }));
        self
    }

    /// Set a raw factory producing a type-erased instance
    pub fn factory(mut self, factory: FactoryFn) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set a destructor run when a cached instance is released
    pub fn destructor<F>(mut self, destructor: F) -> Self
    where
        F: Fn(Instance) + Send + Sync + 'static,
    {
        self.destructor = Some(Box::new(destructor));
        self
    }

    /// Validate the definition and produce the candidate
    pub fn build(self) -> Result<Arc<Candidate>, CoreError> {
        let raw = self.primary.raw().ok_or_else(|| {
            CoreError::definition(
                self.primary.display_name(),
                "primary type must not be a wildcard",
            )
        })?;

        let id = CandidateId {
            raw,
            qualifiers: self.qualifiers.clone(),
            discriminator: self.discriminator,
        };

        let factory = self.factory.ok_or_else(|| {
            CoreError::definition(id.display_name(), "candidate has no usable creation path")
        })?;

        let mut types = Vec::with_capacity(1 + self.extra_types.len());
        types.push(self.primary);
        for t in self.extra_types {
            if t.is_wildcard() {
                return Err(CoreError::definition(
                    id.display_name(),
                    format!("advertised type {} must not be a wildcard", t),
                ));
            }
            if !types.contains(&t) {
                types.push(t);
            }
        }

        for binding in &self.bindings {
            if let TypeRef::Wildcard { upper_bounds } = &binding.target.type_ref {
                if upper_bounds.is_empty() {
                    return Err(CoreError::definition(
                        id.display_name(),
                        "binding target wildcard must carry at least one upper bound",
                    ));
                }
            }
        }

        if self.destructor.is_some() && self.scope == ScopeTag::Transient {
            return Err(CoreError::definition(
                id.display_name(),
                "transient candidates are never cached, so a destructor would never run",
            ));
        }

        Ok(Arc::new(Candidate {
            id,
            types,
            qualifiers: self.qualifiers,
            bindings: self.bindings,
            scope: self.scope,
            factory,
            destructor: self.destructor,
        }))
    }
}

/// A single resolved dependency value handed to a factory
pub enum BindingValue {
    One(Instance),
    Optional(Option<Instance>),
    Many(Vec<Instance>),
    Deferred(DeferredBinding),
}

impl fmt::Debug for BindingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingValue::One(_) => write!(f, "One(<instance>)"),
            BindingValue::Optional(v) => write!(f, "Optional(present: {})", v.is_some()),
            BindingValue::Many(v) => write!(f, "Many(len: {})", v.len()),
            BindingValue::Deferred(d) => write!(f, "Deferred({})", d.target()),
        }
    }
}

fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>, CoreError> {
    instance.downcast::<T>().map_err(|_| {
        CoreError::factory(
            std::any::type_name::<T>(),
            "resolved binding value has a different concrete type",
        )
    })
}

impl BindingValue {
    /// Downcast an exactly-one value
    pub fn one<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, CoreError> {
        match self {
            BindingValue::One(instance) => downcast(instance.clone()),
            other => Err(CoreError::factory(
                std::any::type_name::<T>(),
                format!("expected an exactly-one binding value, got {:?}", other),
            )),
        }
    }

    /// Downcast an at-most-one value
    pub fn optional<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, CoreError> {
        match self {
            BindingValue::Optional(Some(instance)) => downcast(instance.clone()).map(Some),
            BindingValue::Optional(None) => Ok(None),
            other => Err(CoreError::factory(
                std::any::type_name::<T>(),
                format!("expected an at-most-one binding value, got {:?}", other),
            )),
        }
    }

    /// Downcast an any-count value
    pub fn many<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, CoreError> {
        match self {
            BindingValue::Many(instances) => instances
                .iter()
                .map(|i| downcast(i.clone()))
                .collect(),
            other => Err(CoreError::factory(
                std::any::type_name::<T>(),
                format!("expected an any-count binding value, got {:?}", other),
            )),
        }
    }

    /// Access a deferred wrapper
    pub fn deferred(&self) -> Result<&DeferredBinding, CoreError> {
        match self {
            BindingValue::Deferred(deferred) => Ok(deferred),
            other => Err(CoreError::factory(
                "deferred binding",
                format!("expected a deferred binding value, got {:?}", other),
            )),
        }
    }
}

/// Resolved dependency values, positionally matching the owning candidate's
/// binding list.
#[derive(Debug, Default)]
pub struct ResolvedBindings {
    values: Vec<BindingValue>,
}

impl ResolvedBindings {
    pub fn new(values: Vec<BindingValue>) -> Self {
        Self { values }
    }

    /// Empty value set, for candidates without bindings
    pub fn empty() -> Self {
        Self { values: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BindingValue> {
        self.values.get(index)
    }

    fn value(&self, index: usize) -> Result<&BindingValue, CoreError> {
        self.values.get(index).ok_or_else(|| {
            CoreError::factory(
                "resolved bindings",
                format!("no binding value at position {}", index),
            )
        })
    }

    /// Typed access to an exactly-one value by binding position
    pub fn one<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, CoreError> {
        self.value(index)?.one::<T>()
    }

    /// Typed access to an at-most-one value by binding position
    pub fn optional<T: Send + Sync + 'static>(
        &self,
        index: usize,
    ) -> Result<Option<Arc<T>>, CoreError> {
        self.value(index)?.optional::<T>()
    }

    /// Typed access to an any-count value by binding position
    pub fn many<T: Send + Sync + 'static>(&self, index: usize) -> Result<Vec<Arc<T>>, CoreError> {
        self.value(index)?.many::<T>()
    }

    /// Access to a deferred wrapper by binding position
    pub fn deferred(&self, index: usize) -> Result<DeferredBinding, CoreError> {
        self.value(index)?.deferred().cloned()
    }
}

type DeferredResolveFn = Arc<dyn Fn() -> Result<BindingValue, CoreError> + Send + Sync>;

/// Callable standing in for a deferred binding: resolution runs against the
/// live container only when invoked.
#[derive(Clone)]
pub struct DeferredBinding {
    target: Key,
    multiplicity: Multiplicity,
    resolve: DeferredResolveFn,
}

impl fmt::Debug for DeferredBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredBinding")
            .field("target", &self.target.display_name())
            .field("multiplicity", &self.multiplicity)
            .finish()
    }
}

impl DeferredBinding {
    pub fn new(target: Key, multiplicity: Multiplicity, resolve: DeferredResolveFn) -> Self {
        Self {
            target,
            multiplicity,
            resolve,
        }
    }

    pub fn target(&self) -> &Key {
        &self.target
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    /// Perform the deferred resolution
    pub fn get(&self) -> Result<BindingValue, CoreError> {
        (self.resolve)()
    }

    /// Deferred resolution downcast to an exactly-one value
    pub fn get_one<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, CoreError> {
        self.get()?.one::<T>()
    }

    /// Deferred resolution downcast to an at-most-one value
    pub fn get_optional<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, CoreError> {
        self.get()?.optional::<T>()
    }

    /// Deferred resolution downcast to an any-count value
    pub fn get_all<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, CoreError> {
        self.get()?.many::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Notifier: Send + Sync {}

    #[derive(Default)]
    struct EmailNotifier;
    impl Notifier for EmailNotifier {}

    #[test]
    fn test_builder_produces_primary_first_type_set() {
        let candidate = Candidate::builder::<EmailNotifier>()
            .satisfies_type::<dyn Notifier>()
            .constructs(|_| Ok(EmailNotifier))
            .build()
            .unwrap();

        assert_eq!(candidate.types().len(), 2);
        assert_eq!(candidate.types()[0], TypeRef::of::<EmailNotifier>());
        assert!(candidate.satisfies(&Key::of::<dyn Notifier>()));
        assert!(candidate.satisfies(&Key::of::<EmailNotifier>()));
        assert!(!candidate.satisfies(&Key::of::<String>()));
    }

    #[test]
    fn test_qualified_satisfaction_requires_subset() {
        let candidate = Candidate::builder::<EmailNotifier>()
            .qualifier("primary")
            .constructs(|_| Ok(EmailNotifier))
            .build()
            .unwrap();

        assert!(candidate.satisfies(&Key::of::<EmailNotifier>()));
        assert!(candidate.satisfies(&Key::of::<EmailNotifier>().qualified("primary")));
        assert!(!candidate.satisfies(&Key::of::<EmailNotifier>().qualified("backup")));
    }

    #[test]
    fn test_build_rejects_missing_factory() {
        let result = Candidate::builder::<EmailNotifier>().build();
        assert!(matches!(result, Err(CoreError::Definition { .. })));
    }

    #[test]
    fn test_build_rejects_destructor_on_transient() {
        let result = Candidate::builder::<EmailNotifier>()
            .constructs(|_| Ok(EmailNotifier))
            .destructor(|_| {})
            .build();
        assert!(matches!(result, Err(CoreError::Definition { .. })));

        let ok = Candidate::builder::<EmailNotifier>()
            .singleton()
            .constructs(|_| Ok(EmailNotifier))
            .destructor(|_| {})
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_discriminator_distinguishes_same_typed_producers() {
        let a = Candidate::builder::<EmailNotifier>()
            .discriminator("producer-a")
            .constructs(|_| Ok(EmailNotifier))
            .build()
            .unwrap();
        let b = Candidate::builder::<EmailNotifier>()
            .discriminator("producer-b")
            .constructs(|_| Ok(EmailNotifier))
            .build()
            .unwrap();

        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_wildcard_satisfaction_needs_every_bound() {
        let candidate = Candidate::builder::<EmailNotifier>()
            .satisfies_type::<dyn Notifier>()
            .constructs(|_| Ok(EmailNotifier))
            .build()
            .unwrap();

        let both = Key::new(TypeRef::wildcard(vec![
            TypeRef::of::<EmailNotifier>(),
            TypeRef::of::<dyn Notifier>(),
        ]));
        let miss = Key::new(TypeRef::wildcard(vec![
            TypeRef::of::<dyn Notifier>(),
            TypeRef::of::<String>(),
        ]));

        assert!(candidate.satisfies(&both));
        assert!(!candidate.satisfies(&miss));
    }

    #[test]
    fn test_bindings_from_provider() {
        struct FieldList(Vec<Key>);
        struct FieldProvider;
        impl BindingProvider for FieldProvider {
            type Source = FieldList;

            fn bindings(&self, source: &FieldList) -> Result<Vec<Binding>, CoreError> {
                Ok(source.0.iter().cloned().map(Binding::required).collect())
            }
        }

        let source = FieldList(vec![Key::of::<String>(), Key::of::<usize>()]);
        let candidate = Candidate::builder::<EmailNotifier>()
            .bindings_from(&FieldProvider, &source)
            .unwrap()
            .constructs(|_| Ok(EmailNotifier))
            .build()
            .unwrap();

        assert_eq!(candidate.bindings().len(), 2);
        assert_eq!(candidate.bindings()[0].target, Key::of::<String>());
    }

    #[test]
    fn test_resolved_bindings_typed_access() {
        let value: Instance = Arc::new(EmailNotifier);
        let resolved = ResolvedBindings::new(vec![
            BindingValue::One(value),
            BindingValue::Optional(None),
            BindingValue::Many(vec![]),
        ]);

        assert!(resolved.one::<EmailNotifier>(0).is_ok());
        assert_eq!(resolved.optional::<EmailNotifier>(1).unwrap().is_none(), true);
        assert!(resolved.many::<EmailNotifier>(2).unwrap().is_empty());
        assert!(resolved.one::<String>(0).is_err());
        assert!(resolved.one::<EmailNotifier>(3).is_err());
    }
}
