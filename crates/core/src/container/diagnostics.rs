use serde::Serialize;

use crate::container::candidate::Candidate;
use crate::container::index::TypeIndex;
use crate::container::policy::ConsistencyPolicy;
use crate::errors::CoreError;

/// One registered candidate as seen at capture time
#[derive(Debug, Clone, Serialize)]
pub struct CandidateNode {
    pub id: String,
    pub scope: String,
    pub types: Vec<String>,
    pub qualifiers: Vec<String>,
    pub bindings: Vec<BindingEdge>,
}

/// One declared requirement of a candidate, with the candidates that
/// satisfied it when the snapshot was taken
#[derive(Debug, Clone, Serialize)]
pub struct BindingEdge {
    pub target: String,
    pub multiplicity: String,
    pub laziness: String,
    pub resolved: Vec<String>,
}

/// A live reference count for a key required by exactly-one bindings
#[derive(Debug, Clone, Serialize)]
pub struct RefCountEntry {
    pub key: String,
    pub count: usize,
}

/// Point-in-time view of the store: every candidate with its resolved
/// binding edges, plus the singular-dependency reference counts. Ordering
/// is deterministic so captures diff cleanly.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub candidates: Vec<CandidateNode>,
    pub ref_counts: Vec<RefCountEntry>,
}

impl GraphSnapshot {
    pub(crate) fn capture(index: &TypeIndex, policy: &ConsistencyPolicy) -> Self {
        let mut candidates: Vec<CandidateNode> = index
            .candidates()
            .map(|candidate| Self::node(index, candidate))
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let mut ref_counts: Vec<RefCountEntry> = policy
            .counts()
            .map(|(key, count)| RefCountEntry {
                key: key.display_name(),
                count,
            })
            .collect();
        ref_counts.sort_by(|a, b| a.key.cmp(&b.key));

        Self {
            candidates,
            ref_counts,
        }
    }

    fn node(index: &TypeIndex, candidate: &Candidate) -> CandidateNode {
        let bindings = candidate
            .bindings()
            .iter()
            .map(|binding| {
                let mut resolved: Vec<String> = index
                    .resolve(&binding.target, &[])
                    .iter()
                    .map(|c| c.display_name())
                    .collect();
                resolved.sort();
                BindingEdge {
                    target: binding.target.display_name(),
                    multiplicity: binding.multiplicity.as_str().to_string(),
                    laziness: binding.laziness.as_str().to_string(),
                    resolved,
                }
            })
            .collect();

        CandidateNode {
            id: candidate.display_name(),
            scope: candidate.scope().as_str().to_string(),
            types: candidate
                .types()
                .iter()
                .map(|t| t.display_name())
                .collect(),
            qualifiers: candidate
                .qualifiers()
                .iter()
                .map(|q| q.to_string())
                .collect(),
            bindings,
        }
    }

    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
