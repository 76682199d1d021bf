//! Registry errors

use bridge_protocol::ConnectionId;

/// Errors surfaced by the connection registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Registry was shut down and refuses new work
    #[error("connection registry is shut down")]
    ShutDown,

    /// Table is full
    #[error("connection registry full ({0} connections)")]
    CapacityExhausted(usize),

    /// No connection with this id
    #[error("connection not found: {0}")]
    NotFound(ConnectionId),

    /// Peer hung up before the envelope could be delivered
    #[error("delivery to {connection_id} failed: {reason}")]
    Delivery {
        /// Target connection
        connection_id: ConnectionId,
        /// Failure description
        reason: String,
    },
}

impl RegistryError {
    /// Check if the error ends the caller's session
    ///
    /// Resource exhaustion and a shut-down registry are process-visible;
    /// a missing or departed peer is not.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ShutDown | Self::CapacityExhausted(_))
    }
}
