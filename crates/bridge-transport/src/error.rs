//! Transport errors

use bridge_protocol::{ProtocolError, RequestId};

/// Errors surfaced by links and the correlated transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Link is down or could not be opened
    #[error("connection error: {0}")]
    Connection(String),

    /// No matching response arrived within the caller's deadline
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Request that timed out
        request_id: RequestId,
        /// Deadline the caller chose
        timeout_ms: u64,
    },

    /// Outgoing message could not be encoded
    #[error("codec error: {0}")]
    Codec(String),

    /// A call with the same `requestId` is already in flight
    #[error("duplicate in-flight request id: {0}")]
    DuplicateRequest(RequestId),
}

impl TransportError {
    /// Check if the failure came from the link going away
    #[inline]
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Check if the caller may retry the same call
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }
}

impl From<ProtocolError> for TransportError {
    fn from(value: ProtocolError) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(value.to_string())
    }
}
