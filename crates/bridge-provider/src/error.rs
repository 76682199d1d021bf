//! Error types for the provider
//!
//! Classifies failures into:
//! - Retryable connection problems, handled by bounded reconnection
//! - Fatal conditions that end the provider's session (`Failed`)
//! - Caller mistakes such as an illegal phase transition

use crate::phase::ProviderPhase;
use bridge_registry::RegistryError;
use bridge_transport::TransportError;

/// Main provider error type
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Environment backend failed to come up
    #[error("environment setup failed: {0}")]
    Setup(String),

    /// Environment backend failed to release its resources
    #[error("environment teardown failed: {0}")]
    Teardown(String),

    /// Could not reach or register with the remote executor
    #[error("connection failed: {0}")]
    Connection(String),

    /// Every reconnection attempt failed
    #[error("reconnection gave up after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        /// Attempts made
        attempts: u32,
        /// Failure of the final attempt
        last_error: String,
    },

    /// Phase change not permitted by the lifecycle
    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition {
        /// Phase at the time of the request
        from: ProviderPhase,
        /// Requested phase
        to: ProviderPhase,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connection registry failure
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A lifecycle phase exceeded its time budget
    #[error("{phase} timed out after {timeout_ms}ms")]
    Timeout {
        /// Phase that timed out
        phase: &'static str,
        /// Budget that was exceeded
        timeout_ms: u64,
    },

    /// The provider was stopped while the operation was in progress
    #[error("provider stopped")]
    Stopped,
}

impl ProviderError {
    /// Check if another connection attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Transport(e) => e.is_retryable(),
            Self::Timeout { phase, .. } => *phase == "connection",
            _ => false,
        }
    }

    /// Check if the error ends the provider's session
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Setup(_) | Self::ReconnectExhausted { .. } | Self::Config(_) => true,
            Self::Registry(e) => e.is_fatal(),
            Self::Timeout { phase, .. } => *phase == "setup",
            _ => false,
        }
    }
}

/// Result alias for provider operations
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
