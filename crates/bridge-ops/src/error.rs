//! Operation errors

use crate::path::PathError;
use bridge_protocol::{FailureKind, OperationResponse};

/// Failure of a single file or folder operation
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// Bad path or arguments; surfaced before any side effect
    #[error("{0}")]
    Validation(#[from] PathError),

    /// Target already exists
    #[error("{0}")]
    Conflict(String),

    /// Target does not exist
    #[error("{0}")]
    NotFound(String),

    /// Filesystem failure while executing
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl OperationError {
    /// Wrap an I/O failure with what was being attempted
    #[inline]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wire classification
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Conflict(_) => FailureKind::Conflict,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Io { .. } => FailureKind::Io,
        }
    }

    /// Whether a result notification follows this failure
    ///
    /// Precondition failures (conflict, not found) stop before the operation
    /// is attempted and report only through the correlated response.
    #[inline]
    #[must_use]
    pub fn emits_result_notification(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Structured `{ success: false, error }` response
    #[must_use]
    pub fn to_response(&self) -> OperationResponse {
        OperationResponse::failure(self.kind(), self.to_string())
    }
}
