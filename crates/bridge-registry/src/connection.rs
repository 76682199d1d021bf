//! Connection handles

use crate::error::RegistryError;
use bridge_protocol::{ConnectionId, ConnectionRole, Envelope};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Descriptive data attached to a connection at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// Actor whose work this connection observes or performs
    pub owner_id: Option<String>,
    /// Environment the connection belongs to, if any
    pub environment_name: Option<String>,
    /// Backend kind of that environment
    pub provider_kind: Option<String>,
    /// Id the peer knows itself by; not unique across peers
    pub remote_id: Option<ConnectionId>,
    /// Registration time
    pub connected_at: DateTime<Utc>,
}

impl ConnectionMetadata {
    /// Metadata stamped with the current time
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner_id: None,
            environment_name: None,
            provider_kind: None,
            remote_id: None,
            connected_at: Utc::now(),
        }
    }

    /// Set the owning actor
    #[inline]
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Set the environment name and backend kind
    #[inline]
    #[must_use]
    pub fn with_environment(mut self, name: impl Into<String>, provider_kind: impl Into<String>) -> Self {
        self.environment_name = Some(name.into());
        self.provider_kind = Some(provider_kind.into());
        self
    }

    /// Record the id the peer assigned itself
    #[inline]
    #[must_use]
    pub fn with_remote_id(mut self, remote_id: ConnectionId) -> Self {
        self.remote_id = Some(remote_id);
        self
    }
}

impl Default for ConnectionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one registered peer
///
/// Cloning is cheap; every clone delivers to the same peer.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// Connection ID
    pub id: ConnectionId,
    /// Logical role
    pub role: ConnectionRole,
    /// Registration metadata
    pub metadata: ConnectionMetadata,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl ClientConnection {
    /// Create a connection with a fresh id and the receiver of its traffic
    #[must_use]
    pub fn open(
        role: ConnectionRole,
        metadata: ConnectionMetadata,
    ) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        Self::open_with_id(ConnectionId::generate(), role, metadata)
    }

    /// Same as [`ClientConnection::open`] with a caller-chosen id
    #[must_use]
    pub fn open_with_id(
        id: ConnectionId,
        role: ConnectionRole,
        metadata: ConnectionMetadata,
    ) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            id,
            role,
            metadata,
            sender,
        };
        (connection, receiver)
    }

    /// Deliver an envelope to the peer
    ///
    /// # Errors
    /// Returns [`RegistryError::Delivery`] if the peer hung up
    pub fn deliver(&self, envelope: Envelope) -> Result<(), RegistryError> {
        self.sender.send(envelope).map_err(|_| RegistryError::Delivery {
            connection_id: self.id.clone(),
            reason: "peer closed".to_string(),
        })
    }

    /// Check if the peer is still listening
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Check if this connection belongs to `owner_id`
    #[inline]
    #[must_use]
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.metadata.owner_id.as_deref() == Some(owner_id)
    }
}
