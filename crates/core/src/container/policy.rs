use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::container::candidate::{Candidate, CandidateId, Multiplicity};
use crate::container::index::TypeIndex;
use crate::container::key::Key;
use crate::errors::CoreError;

/// Resolution path through candidate identities, kept for error reporting
#[derive(Debug, Clone, Default)]
pub struct ResolutionPath {
    candidates: Vec<CandidateId>,
}

impl ResolutionPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: CandidateId) {
        self.candidates.push(id);
    }

    pub fn pop(&mut self) -> Option<CandidateId> {
        self.candidates.pop()
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.candidates.contains(id)
    }

    /// Render the path for error messages
    pub fn path_string(&self) -> String {
        self.candidates
            .iter()
            .map(|id| id.display_name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Resolve a key against the index as it would look after a staged batch is
/// committed: live entries first, then staged candidates that satisfy the key.
pub(crate) fn resolve_with_staged(
    index: &TypeIndex,
    staged: &[Arc<Candidate>],
    key: &Key,
) -> Vec<Arc<Candidate>> {
    let mut matches = index.resolve(key, &[]);
    let seen: HashSet<CandidateId> = matches.iter().map(|c| c.id().clone()).collect();
    for candidate in staged {
        if !seen.contains(candidate.id()) && candidate.satisfies(key) {
            matches.push(candidate.clone());
        }
    }
    matches
}

/// Guards the two store invariants on every mutation: every binding target
/// resolves to the cardinality its multiplicity requires, and a key that an
/// exactly-one binding relies on never gains a second satisfier.
///
/// The reference counter maps each key to the number of live exactly-one
/// bindings targeting it. A count reaching zero removes the entry; drift in
/// either direction raises `InvariantViolated` rather than continuing.
#[derive(Debug, Default)]
pub struct ConsistencyPolicy {
    ref_counts: HashMap<Key, usize>,
}

impl ConsistencyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate one candidate of a proposed addition batch. `staged` holds
    /// the entire batch (including the candidate itself) so binding targets
    /// resolve against the store as it would be after commit.
    pub fn check_addition(
        &self,
        index: &TypeIndex,
        staged: &[Arc<Candidate>],
        candidate: &Candidate,
    ) -> Result<(), CoreError> {
        for binding in candidate.bindings() {
            let matches = resolve_with_staged(index, staged, &binding.target);
            let names = || matches.iter().map(|c| c.display_name()).collect::<Vec<_>>();
            match binding.multiplicity {
                Multiplicity::ExactlyOne => {
                    if matches.is_empty() {
                        return Err(CoreError::UnsatisfiedDependency {
                            key: binding.target.display_name(),
                            required_by: candidate.display_name(),
                        });
                    }
                    if matches.len() > 1 {
                        return Err(CoreError::AmbiguousDependency {
                            key: binding.target.display_name(),
                            required_by: candidate.display_name(),
                            matches: names(),
                        });
                    }
                }
                Multiplicity::AtMostOne => {
                    if matches.len() > 1 {
                        return Err(CoreError::AmbiguousDependency {
                            key: binding.target.display_name(),
                            required_by: candidate.display_name(),
                            matches: names(),
                        });
                    }
                }
                Multiplicity::Any => {}
            }
        }

        // A key already relied upon by a live exactly-one binding must not
        // gain a second satisfier.
        for (key, count) in &self.ref_counts {
            if *count > 0 && candidate.satisfies(key) {
                let mut matches: Vec<String> = index
                    .resolve(key, &[])
                    .iter()
                    .map(|c| c.display_name())
                    .collect();
                matches.push(candidate.display_name());
                return Err(CoreError::AmbiguousDependency {
                    key: key.display_name(),
                    required_by: "a live exactly-one binding".to_string(),
                    matches,
                });
            }
        }

        Ok(())
    }

    /// Validate a removal: no reference-counted singular dependency may be
    /// left without its satisfier. Counts contributed by the candidate's own
    /// bindings leave with it, so they are exempt.
    pub fn check_removal(
        &self,
        index: &TypeIndex,
        candidate: &Candidate,
    ) -> Result<(), CoreError> {
        for (key, count) in &self.ref_counts {
            let own = candidate
                .bindings()
                .iter()
                .filter(|b| b.multiplicity == Multiplicity::ExactlyOne && &b.target == key)
                .count();
            if *count <= own || !candidate.satisfies(key) {
                continue;
            }
            let remaining = index
                .resolve(key, &[])
                .iter()
                .filter(|c| c.id() != candidate.id())
                .count();
            if remaining == 0 {
                return Err(CoreError::ViolatesSingularDependency {
                    candidate: candidate.display_name(),
                    key: key.display_name(),
                });
            }
        }
        Ok(())
    }

    /// Reject an addition batch that would close a dependency cycle.
    ///
    /// Edges follow eager bindings only, resolved through the post-batch
    /// index; deferred bindings are the sanctioned way to break a cycle and
    /// contribute no edge. Any new cycle must pass through a batch member,
    /// so the walk starts from those.
    pub fn check_cycles(
        &self,
        index: &TypeIndex,
        staged: &[Arc<Candidate>],
    ) -> Result<(), CoreError> {
        let mut visited: HashSet<CandidateId> = HashSet::new();
        let mut in_progress: HashSet<CandidateId> = HashSet::new();

        for candidate in staged {
            if !visited.contains(candidate.id()) {
                let mut path = ResolutionPath::new();
                self.cycle_dfs(
                    index,
                    staged,
                    candidate,
                    &mut visited,
                    &mut in_progress,
                    &mut path,
                )?;
            }
        }
        Ok(())
    }

    fn cycle_dfs(
        &self,
        index: &TypeIndex,
        staged: &[Arc<Candidate>],
        candidate: &Arc<Candidate>,
        visited: &mut HashSet<CandidateId>,
        in_progress: &mut HashSet<CandidateId>,
        path: &mut ResolutionPath,
    ) -> Result<(), CoreError> {
        let id = candidate.id().clone();

        if in_progress.contains(&id) {
            path.push(id.clone());
            return Err(CoreError::CyclicDependency {
                path: path.path_string(),
                cycle_at: id.display_name(),
            });
        }
        if visited.contains(&id) {
            return Ok(());
        }

        in_progress.insert(id.clone());
        path.push(id.clone());

        for binding in candidate.bindings() {
            if binding.laziness.is_deferred() {
                continue;
            }
            for required in resolve_with_staged(index, staged, &binding.target) {
                self.cycle_dfs(index, staged, &required, visited, in_progress, path)?;
            }
        }

        path.pop();
        in_progress.remove(&id);
        visited.insert(id);
        Ok(())
    }

    /// Bump reference counts for a committed candidate's exactly-one bindings
    pub fn record_addition(&mut self, candidate: &Candidate) {
        for binding in candidate.bindings() {
            if binding.multiplicity == Multiplicity::ExactlyOne {
                let count = self.ref_counts.entry(binding.target.clone()).or_insert(0);
                *count += 1;
                trace!(key = %binding.target, count = *count, "reference count incremented");
            }
        }
    }

    /// Decrement reference counts for a removed candidate's exactly-one
    /// bindings. Addition then removal of the same bindings nets to the
    /// original counts; drift is an internal fault, not a caller error.
    pub fn record_removal(&mut self, candidate: &Candidate) -> Result<(), CoreError> {
        for binding in candidate.bindings() {
            if binding.multiplicity != Multiplicity::ExactlyOne {
                continue;
            }
            match self.ref_counts.get_mut(&binding.target) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    trace!(key = %binding.target, count = *count, "reference count decremented");
                }
                Some(_) => {
                    // Count reaches zero; the entry must disappear with it.
                    self.ref_counts.remove(&binding.target);
                    trace!(key = %binding.target, "reference count cleared");
                }
                None => {
                    return Err(CoreError::invariant(format!(
                        "reference count for {} already zero while removing '{}'",
                        binding.target,
                        candidate.display_name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Live exactly-one binding count for a key
    pub fn ref_count(&self, key: &Key) -> usize {
        self.ref_counts.get(key).copied().unwrap_or(0)
    }

    /// True when no singular dependency is live
    pub fn is_quiescent(&self) -> bool {
        self.ref_counts.is_empty()
    }

    /// Counter state, for diagnostics
    pub fn counts(&self) -> impl Iterator<Item = (&Key, usize)> {
        self.ref_counts.iter().map(|(k, v)| (k, *v))
    }
}
