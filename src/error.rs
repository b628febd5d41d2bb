use thiserror::Error;

/// Unified error type for patch-lineage operations
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reference not found: '{reference}' in {repo}")]
    RefNotFound { reference: String, repo: String },

    #[error("Invalid repository: {0}")]
    InvalidRepo(String),

    #[error("Ambiguous reference '{reference}': {}", .matches.join(", "))]
    AmbiguousRef {
        reference: String,
        matches: Vec<String>,
    },

    #[error("Version parsing error: {0}")]
    Version(String),

    #[error("Baseline not found for '{0}'")]
    MissingBaseline(String),

    #[error("Baseline inconsistent: {computed}, {declared}(from tag)")]
    BaselineInconsistency { computed: String, declared: String },

    #[error("Command `{command}` failed (exit code {code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<LineageError>,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience type alias for Results in patch-lineage
pub type Result<T> = std::result::Result<T, LineageError>;

impl LineageError {
    /// Create a configuration error with context
    pub fn config(msg: impl Into<String>) -> Self {
        LineageError::Config(msg.into())
    }

    /// Create a version error with context
    pub fn version(msg: impl Into<String>) -> Self {
        LineageError::Version(msg.into())
    }

    /// Create an invalid-repository error with context
    pub fn invalid_repo(msg: impl Into<String>) -> Self {
        LineageError::InvalidRepo(msg.into())
    }

    /// Create a ref-not-found error
    pub fn ref_not_found(reference: impl Into<String>, repo: impl Into<String>) -> Self {
        LineageError::RefNotFound {
            reference: reference.into(),
            repo: repo.into(),
        }
    }

    /// Errors that mean the run's inputs are wrong; they abort the run
    /// instead of being retried or degraded.
    pub fn is_fatal_domain(&self) -> bool {
        matches!(
            self,
            LineageError::RefNotFound { .. }
                | LineageError::InvalidRepo(_)
                | LineageError::AmbiguousRef { .. }
                | LineageError::MissingBaseline(_)
                | LineageError::BaselineInconsistency { .. }
        )
    }
}
