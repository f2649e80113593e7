use thiserror::Error;

/// Core error type for the wirebox container
#[derive(Debug, Error)]
pub enum CoreError {
    /// A candidate definition is not usable on its own (no advertised type,
    /// conflicting markers, malformed binding target).
    #[error("Invalid candidate definition for '{candidate}': {message}")]
    Definition { candidate: String, message: String },

    #[error("Candidate already indexed: {candidate}")]
    DuplicateCandidate { candidate: String },

    #[error("Candidate not indexed: {candidate}")]
    CandidateNotFound { candidate: String },

    #[error("Unsatisfied dependency: {key} (required by {required_by})")]
    UnsatisfiedDependency { key: String, required_by: String },

    #[error("Ambiguous dependency: {key} (required by {required_by}) matches {}: [{}]", matches.len(), matches.join(", "))]
    AmbiguousDependency {
        key: String,
        required_by: String,
        matches: Vec<String>,
    },

    #[error("Removing '{candidate}' would leave singular dependency {key} unresolved")]
    ViolatesSingularDependency { candidate: String, key: String },

    #[error("Cyclic dependency detected: {path} (cycle at: {cycle_at})")]
    CyclicDependency { path: String, cycle_at: String },

    #[error("Auto-discovery failed for {key} (path: {path}): {cause}")]
    DiscoveryFailed {
        key: String,
        path: String,
        #[source]
        cause: Box<CoreError>,
        /// Failures of sibling discovery branches, kept for diagnostics.
        secondary: Vec<CoreError>,
    },

    #[error("No candidate provides an instance for {key}")]
    NoSuchInstance { key: String },

    #[error("More than one candidate provides an instance for {key}: [{}]", matches.join(", "))]
    AmbiguousInstance { key: String, matches: Vec<String> },

    #[error("Instance creation failed for '{candidate}': {source}")]
    CreationFailed {
        candidate: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Scope '{scope}' has no active resolver")]
    ScopeInactive { scope: String },

    #[error("Auto-discovery exceeded depth limit {limit} (path: {path})")]
    DepthLimitExceeded { limit: usize, path: String },

    /// Internal bookkeeping drifted from the indexed state. Never expected;
    /// raised instead of silently continuing.
    #[error("Container invariant violated: {message}")]
    InvariantViolated { message: String },

    #[error("Lock poisoned on resource: {resource}")]
    LockPoisoned { resource: String },

    #[error("Factory error in '{candidate}': {message}")]
    Factory { candidate: String, message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new definition error
    pub fn definition(candidate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Definition {
            candidate: candidate.into(),
            message: message.into(),
        }
    }

    /// Create a new factory error
    pub fn factory(candidate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Factory {
            candidate: candidate.into(),
            message: message.into(),
        }
    }

    /// Create a new invariant-violated error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolated {
            message: message.into(),
        }
    }

    /// Create a new lock-poisoned error
    pub fn lock_poisoned(resource: impl Into<String>) -> Self {
        Self::LockPoisoned {
            resource: resource.into(),
        }
    }

    /// Whether this error (or, for discovery failures, its cause) signals an
    /// unresolvable or ambiguous request rather than an internal fault.
    pub fn is_resolution_error(&self) -> bool {
        match self {
            Self::NoSuchInstance { .. }
            | Self::UnsatisfiedDependency { .. }
            | Self::AmbiguousInstance { .. }
            | Self::AmbiguousDependency { .. } => true,
            Self::DiscoveryFailed { cause, .. } => cause.is_resolution_error(),
            _ => false,
        }
    }

    /// Whether this error (or, for discovery failures, its cause) reports
    /// more satisfiers than the request allows. Optional lookups tolerate
    /// absence but never ambiguity, so the two are told apart here.
    pub fn is_ambiguity_error(&self) -> bool {
        match self {
            Self::AmbiguousInstance { .. } | Self::AmbiguousDependency { .. } => true,
            Self::DiscoveryFailed { cause, .. } => cause.is_ambiguity_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = CoreError::UnsatisfiedDependency {
            key: "Database".to_string(),
            required_by: "UserRepo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsatisfied dependency: Database (required by UserRepo)"
        );

        let err = CoreError::AmbiguousDependency {
            key: "Cache".to_string(),
            required_by: "SessionStore".to_string(),
            matches: vec!["RedisCache".to_string(), "MemoryCache".to_string()],
        };
        assert!(err.to_string().contains("matches 2"));
        assert!(err.to_string().contains("RedisCache"));
    }

    #[test]
    fn test_discovery_failure_carries_cause() {
        let cause = CoreError::NoSuchInstance {
            key: "Mailer".to_string(),
        };
        let err = CoreError::DiscoveryFailed {
            key: "Notifier".to_string(),
            path: "Notifier -> Mailer".to_string(),
            cause: Box::new(cause),
            secondary: Vec::new(),
        };
        assert!(err.is_resolution_error());
        assert!(err.to_string().contains("Notifier -> Mailer"));
    }

    #[test]
    fn test_helper_constructors() {
        let err = CoreError::definition("Widget", "no advertised type");
        assert!(matches!(err, CoreError::Definition { .. }));

        let err = CoreError::invariant("reference count drift");
        assert!(matches!(err, CoreError::InvariantViolated { .. }));
    }
}
