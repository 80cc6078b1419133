//! Error types for the qualflow engine

use thiserror::Error;

/// Errors produced by the lattice, the dataflow engine, inference and the session layer.
///
/// Use-site qualifier violations are *not* errors in this sense: they are accumulated
/// as [`crate::checker::Diagnostic`]s and never abort an analysis.
#[derive(Debug, Error)]
pub enum QualflowError {
    /// An engine invariant was violated. Fatal for the compilation unit being analysed.
    #[error("internal error: {0}")]
    Internal(String),

    /// GLB over unresolved qualifier variables has no defined meaning.
    #[error("greatest lower bound is not supported for {0}")]
    UnsupportedGlb(String),

    #[error("invalid qualifier hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("malformed predicate `{predicate}`: {message}")]
    PredicateParse { predicate: String, message: String },

    #[error("cannot resolve expression `{0}`")]
    MalformedExpression(String),

    /// The inference constraints contradict each other.
    #[error("unsatisfiable constraints for `{target}`: {reason}")]
    Unsatisfiable { target: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl QualflowError {
    pub fn internal(message: impl Into<String>) -> Self {
        QualflowError::Internal(message.into())
    }

    /// Whether the error must abort analysis of the current compilation unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QualflowError::Internal(_) | QualflowError::InvalidHierarchy(_))
    }
}

pub type Result<T> = std::result::Result<T, QualflowError>;
