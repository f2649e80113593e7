use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::container::candidate::{Candidate, CandidateId};
use crate::container::key::{Key, Qualifier, RawType, TypeRef};
use crate::errors::CoreError;

/// Extra match criterion applied after index lookup. Filtered lookups never
/// trigger auto-discovery.
pub type CandidateFilter = dyn Fn(&Candidate) -> bool + Send + Sync;

/// One index bucket: a raw type crossed with an optional qualifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    raw: RawType,
    qualifier: Option<Qualifier>,
}

/// Multi-map store of candidates, indexed under every advertised raw type
/// crossed with the unqualified bucket and one bucket per qualifier.
///
/// The same bucket-key set computed at registration is recomputed at
/// unregistration; candidates are immutable, so the two sets are identical.
#[derive(Default)]
pub struct TypeIndex {
    buckets: HashMap<BucketKey, Vec<Arc<Candidate>>>,
    indexed: HashMap<CandidateId, Arc<Candidate>>,
}

impl TypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket keys a candidate occupies: (raw, none) plus (raw, qualifier)
    /// for every advertised raw type and every qualifier.
    fn entry_keys(candidate: &Candidate) -> Vec<BucketKey> {
        let mut raws = Vec::new();
        for type_ref in candidate.types() {
            if let Some(raw) = type_ref.raw() {
                if !raws.contains(&raw) {
                    raws.push(raw);
                }
            }
        }

        let mut keys = Vec::with_capacity(raws.len() * (1 + candidate.qualifiers().len()));
        for raw in raws {
            keys.push(BucketKey {
                raw,
                qualifier: None,
            });
            for qualifier in candidate.qualifiers() {
                keys.push(BucketKey {
                    raw,
                    qualifier: Some(qualifier.clone()),
                });
            }
        }
        keys
    }

    /// Register a candidate under every bucket key it occupies
    pub fn put(&mut self, candidate: Arc<Candidate>) -> Result<(), CoreError> {
        if self.indexed.contains_key(candidate.id()) {
            return Err(CoreError::DuplicateCandidate {
                candidate: candidate.display_name(),
            });
        }

        for key in Self::entry_keys(&candidate) {
            self.buckets
                .entry(key)
                .or_default()
                .push(candidate.clone());
        }
        self.indexed
            .insert(candidate.id().clone(), candidate.clone());

        debug!(candidate = %candidate.display_name(), "indexed candidate");
        Ok(())
    }

    /// Unregister a candidate from every bucket key it occupies
    pub fn remove(&mut self, id: &CandidateId) -> Result<Arc<Candidate>, CoreError> {
        let candidate = self
            .indexed
            .remove(id)
            .ok_or_else(|| CoreError::CandidateNotFound {
                candidate: id.display_name(),
            })?;

        for key in Self::entry_keys(&candidate) {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.retain(|c| c.id() != id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }

        debug!(candidate = %candidate.display_name(), "unindexed candidate");
        Ok(candidate)
    }

    /// Register a batch; on any failure every already-applied entry is undone
    /// in reverse order before the error propagates.
    pub fn put_all(&mut self, batch: &[Arc<Candidate>]) -> Result<(), CoreError> {
        let mut applied: Vec<CandidateId> = Vec::with_capacity(batch.len());
        for candidate in batch {
            if let Err(err) = self.put(candidate.clone()) {
                for id in applied.iter().rev() {
                    // Undo of a successful put cannot fail.
                    let _ = self.remove(id);
                }
                return Err(err);
            }
            applied.push(candidate.id().clone());
        }
        Ok(())
    }

    /// Unregister a batch; on any failure every already-removed entry is
    /// re-registered in reverse order before the error propagates.
    pub fn remove_all(&mut self, ids: &[CandidateId]) -> Result<Vec<Arc<Candidate>>, CoreError> {
        let mut removed: Vec<Arc<Candidate>> = Vec::with_capacity(ids.len());
        for id in ids {
            match self.remove(id) {
                Ok(candidate) => removed.push(candidate),
                Err(err) => {
                    for candidate in removed.into_iter().rev() {
                        let _ = self.put(candidate);
                    }
                    return Err(err);
                }
            }
        }
        Ok(removed)
    }

    /// Candidate set satisfying a key, with optional extra filters applied
    /// last. Returns an empty set on no match; never errors.
    pub fn resolve(&self, key: &Key, filters: &[&CandidateFilter]) -> Vec<Arc<Candidate>> {
        let mut result = match &key.type_ref {
            TypeRef::Wildcard { upper_bounds } => self.resolve_wildcard(key, upper_bounds),
            _ => self.resolve_direct(key),
        };

        if !filters.is_empty() {
            result.retain(|c| filters.iter().all(|f| f(c)));
        }
        trace!(key = %key, matches = result.len(), "resolved key");
        result
    }

    fn resolve_direct(&self, key: &Key) -> Vec<Arc<Candidate>> {
        let raw = match key.type_ref.raw() {
            Some(raw) => raw,
            None => return Vec::new(),
        };

        // Gather the unqualified bucket plus one bucket per qualifier; every
        // bucket must be present for an intersection to exist.
        let mut sets: Vec<&Vec<Arc<Candidate>>> = Vec::with_capacity(1 + key.qualifiers.len());
        match self.buckets.get(&BucketKey {
            raw,
            qualifier: None,
        }) {
            Some(bucket) => sets.push(bucket),
            None => return Vec::new(),
        }
        for qualifier in &key.qualifiers {
            match self.buckets.get(&BucketKey {
                raw,
                qualifier: Some(qualifier.clone()),
            }) {
                Some(bucket) => sets.push(bucket),
                None => return Vec::new(),
            }
        }

        // Intersect smallest-set-first to minimize copying.
        sets.sort_by_key(|s| s.len());
        let (first, rest) = match sets.split_first() {
            Some(split) => split,
            None => return Vec::new(),
        };
        let mut result: Vec<Arc<Candidate>> = (*first).clone();
        for other in rest {
            let ids: HashSet<&CandidateId> = other.iter().map(|c| c.id()).collect();
            result.retain(|c| ids.contains(c.id()));
        }

        // Parameterized requests additionally filter on assignability.
        if matches!(key.type_ref, TypeRef::Parameterized { .. }) {
            result.retain(|c| c.satisfies(key));
        }
        result
    }

    fn resolve_wildcard(&self, key: &Key, upper_bounds: &[TypeRef]) -> Vec<Arc<Candidate>> {
        let mut bounds = upper_bounds.iter();
        let first = match bounds.next() {
            Some(bound) => bound,
            None => return Vec::new(),
        };

        let mut result = self.resolve_direct(&key.retargeted(first.clone()));
        for bound in bounds {
            if result.is_empty() {
                return result;
            }
            let matched = self.resolve_direct(&key.retargeted(bound.clone()));
            let ids: HashSet<&CandidateId> = matched.iter().map(|c| c.id()).collect();
            result.retain(|c| ids.contains(c.id()));
        }
        result
    }

    pub fn get(&self, id: &CandidateId) -> Option<&Arc<Candidate>> {
        self.indexed.get(id)
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.indexed.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.indexed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty()
    }

    /// All indexed candidates, in no particular order
    pub fn candidates(&self) -> impl Iterator<Item = &Arc<Candidate>> {
        self.indexed.values()
    }
}

impl std::fmt::Debug for TypeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeIndex")
            .field("candidates", &self.indexed.len())
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
