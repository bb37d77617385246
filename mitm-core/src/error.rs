//! Error types for rule administration, flow evaluation and the relay

use thiserror::Error;

/// Main error type for interception operations
#[derive(Debug, Error)]
pub enum MitmError {
    /// A remove operation found nothing to remove. Never fatal.
    #[error("{collection} entry '{key}' not found")]
    NotFound {
        collection: RuleKind,
        key: String,
    },

    /// A response mutation could not be applied. The exchange continues.
    #[error("mutation for rule '{alias}' failed: {reason}")]
    MutationFailure { alias: String, reason: String },

    /// Delay text that does not resolve to a non-negative duration
    #[error("invalid time string: {0}")]
    InvalidDuration(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Certificate-related errors
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Network-related errors
    #[error("network error: {0}")]
    Network(String),

    /// General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rule files and config files
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The rule collection an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Block,
    Override,
    Status,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleKind::Block => "block list",
            RuleKind::Override => "custom response",
            RuleKind::Status => "custom status",
        };
        f.write_str(name)
    }
}

impl MitmError {
    pub(crate) fn not_found(collection: RuleKind, key: &str) -> Self {
        MitmError::NotFound {
            collection,
            key: key.to_string(),
        }
    }

    pub(crate) fn mutation(alias: &str, reason: impl std::fmt::Display) -> Self {
        MitmError::MutationFailure {
            alias: alias.to_string(),
            reason: reason.to_string(),
        }
    }
}
