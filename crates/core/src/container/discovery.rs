use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::container::candidate::{Binding, Candidate, Multiplicity};
use crate::container::index::TypeIndex;
use crate::container::key::{Key, RawType, TypeRef};
use crate::container::policy::resolve_with_staged;
use crate::errors::CoreError;

/// Default bound on discovery recursion depth
pub const DEFAULT_MAX_DISCOVERY_DEPTH: usize = 32;

/// Produces the declared dependency requirements for a candidate source.
/// This is the boundary that replaces source-declaration scanning: the core
/// never inspects declarations, it only consumes binding lists.
pub trait BindingProvider: Send + Sync {
    type Source;

    fn bindings(&self, source: &Self::Source) -> Result<Vec<Binding>, CoreError>;
}

/// Synthesizes a candidate for an unresolved type, if it knows how.
/// Registered per raw type or as a fallback tried in order.
pub trait CreationStrategy: Send + Sync {
    fn synthesize(&self, type_ref: &TypeRef) -> Result<Option<Arc<Candidate>>, CoreError>;
}

/// Creation strategy backed by a plain closure
pub struct FnCreationStrategy<F>(F);

impl<F> FnCreationStrategy<F>
where
    F: Fn(&TypeRef) -> Result<Option<Arc<Candidate>>, CoreError> + Send + Sync,
{
    pub fn new(synthesize: F) -> Self {
        Self(synthesize)
    }
}

impl<F> CreationStrategy for FnCreationStrategy<F>
where
    F: Fn(&TypeRef) -> Result<Option<Arc<Candidate>>, CoreError> + Send + Sync,
{
    fn synthesize(&self, type_ref: &TypeRef) -> Result<Option<Arc<Candidate>>, CoreError> {
        (self.0)(type_ref)
    }
}

/// A failure inside one discovery branch, with the path that led there
struct BranchFailure {
    error: CoreError,
    path: String,
}

/// Outcome of a successful expansion: the synthesized candidates plus the
/// optional-branch failures gathered along the way. The caller commits the
/// candidates and keeps the failures as diagnostics if the commit is
/// rejected.
#[derive(Debug, Default)]
pub struct DiscoveredBatch {
    pub candidates: Vec<Arc<Candidate>>,
    pub secondary: Vec<CoreError>,
}

impl DiscoveredBatch {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Recursively synthesizes candidates for unresolved keys, producing an
/// atomic batch for the store. Holds no cache of its own: once committed,
/// discovered candidates are ordinary index entries.
pub struct Discoverer {
    typed: HashMap<RawType, Arc<dyn CreationStrategy>>,
    fallback: Vec<Arc<dyn CreationStrategy>>,
    max_depth: usize,
}

impl Discoverer {
    pub fn new(max_depth: usize) -> Self {
        Self {
            typed: HashMap::new(),
            fallback: Vec::new(),
            max_depth,
        }
    }

    /// Register a strategy consulted only for one raw type
    pub fn register_for(&mut self, raw: RawType, strategy: Arc<dyn CreationStrategy>) {
        self.typed.insert(raw, strategy);
    }

    /// Register a fallback strategy, tried in registration order
    pub fn register_fallback(&mut self, strategy: Arc<dyn CreationStrategy>) {
        self.fallback.push(strategy);
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Whether any strategy is registered at all
    pub fn has_strategies(&self) -> bool {
        !self.typed.is_empty() || !self.fallback.is_empty()
    }

    /// Expand candidates for an unresolved root key. Returns the batch of
    /// newly synthesized candidates (depth-first order) together with any
    /// optional-branch failures; the caller commits the batch atomically
    /// against the live store.
    pub fn discover(
        &self,
        index: &TypeIndex,
        root: &Key,
    ) -> Result<DiscoveredBatch, CoreError> {
        let mut staged: Vec<Arc<Candidate>> = Vec::new();
        let mut path: Vec<Key> = Vec::new();
        let mut secondary: Vec<CoreError> = Vec::new();

        match self.expand(index, root, &mut staged, &mut path, &mut secondary) {
            Ok(()) => {
                debug!(key = %root, discovered = staged.len(), "discovery expansion complete");
                Ok(DiscoveredBatch {
                    candidates: staged,
                    secondary,
                })
            }
            Err(failure) => Err(CoreError::DiscoveryFailed {
                key: root.display_name(),
                path: failure.path,
                cause: Box::new(failure.error),
                secondary,
            }),
        }
    }

    fn expand(
        &self,
        index: &TypeIndex,
        key: &Key,
        staged: &mut Vec<Arc<Candidate>>,
        path: &mut Vec<Key>,
        secondary: &mut Vec<CoreError>,
    ) -> Result<(), BranchFailure> {
        // Already satisfied by the live store or an earlier expansion; a
        // staged hit is also how cycles through deferred edges terminate.
        if !resolve_with_staged(index, staged, key).is_empty() {
            return Ok(());
        }

        if path.len() >= self.max_depth {
            return Err(self.fail(
                path,
                CoreError::DepthLimitExceeded {
                    limit: self.max_depth,
                    path: render_path(path),
                },
            ));
        }

        path.push(key.clone());
        trace!(key = %key, depth = path.len(), "expanding unresolved key");

        let candidate = match self.synthesize(key, path) {
            Ok(candidate) => candidate,
            Err(failure) => {
                path.pop();
                return Err(failure);
            }
        };

        let candidate_mark = staged.len();
        staged.push(candidate.clone());

        let mut required_failures: Vec<BranchFailure> = Vec::new();
        for binding in candidate.bindings() {
            let branch_mark = staged.len();
            if let Err(failure) = self.expand(index, &binding.target, staged, path, secondary) {
                // Unwind only this branch; sibling branches stay independent.
                staged.truncate(branch_mark);
                if binding.multiplicity == Multiplicity::ExactlyOne {
                    required_failures.push(failure);
                } else {
                    secondary.push(failure.error);
                }
            }
        }

        path.pop();

        if let Some(primary) = required_failures.pop() {
            // The whole subtree rooted here fails; remaining required
            // failures become secondary diagnostics.
            staged.truncate(candidate_mark);
            for failure in required_failures {
                secondary.push(failure.error);
            }
            return Err(primary);
        }

        Ok(())
    }

    fn synthesize(&self, key: &Key, path: &[Key]) -> Result<Arc<Candidate>, BranchFailure> {
        let raw = match key.type_ref.raw() {
            Some(raw) => raw,
            None => {
                return Err(self.fail(
                    path,
                    CoreError::UnsatisfiedDependency {
                        key: key.display_name(),
                        required_by: requester_name(path),
                    },
                ));
            }
        };

        let candidate = match self.typed.get(&raw) {
            Some(strategy) => strategy
                .synthesize(&key.type_ref)
                .map_err(|e| self.fail(path, e))?,
            None => {
                let mut found = None;
                for strategy in &self.fallback {
                    if let Some(candidate) = strategy
                        .synthesize(&key.type_ref)
                        .map_err(|e| self.fail(path, e))?
                    {
                        found = Some(candidate);
                        break;
                    }
                }
                found
            }
        };

        let candidate = candidate.ok_or_else(|| {
            self.fail(
                path,
                CoreError::UnsatisfiedDependency {
                    key: key.display_name(),
                    required_by: requester_name(path),
                },
            )
        })?;

        if !candidate.satisfies(key) {
            return Err(self.fail(
                path,
                CoreError::definition(
                    candidate.display_name(),
                    format!("synthesized candidate does not satisfy {}", key),
                ),
            ));
        }

        debug!(key = %key, candidate = %candidate.display_name(), "synthesized candidate");
        Ok(candidate)
    }

    fn fail(&self, path: &[Key], error: CoreError) -> BranchFailure {
        BranchFailure {
            error,
            path: render_path(path),
        }
    }
}

impl Default for Discoverer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DISCOVERY_DEPTH)
    }
}

impl std::fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discoverer")
            .field("typed_strategies", &self.typed.len())
            .field("fallback_strategies", &self.fallback.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

fn render_path(path: &[Key]) -> String {
    path.iter()
        .map(|k| k.display_name())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// The key whose expansion asked for the current one; the root request when
/// the path holds a single entry.
fn requester_name(path: &[Key]) -> String {
    if path.len() >= 2 {
        path[path.len() - 2].display_name()
    } else {
        "the root request".to_string()
    }
}
