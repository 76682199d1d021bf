//! Provider lifecycle phases
//!
//! ```text
//! Idle -> SettingUp -> Connecting -> Connected <-> Active
//!                          |            |            |
//!                          +------> Reconnecting <---+
//!                                       |
//! SettingUp / Connecting / Reconnecting -> Failed
//! any live phase -> TearingDown -> Closed
//! ```

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderPhase {
    /// Constructed, not started
    Idle,
    /// Running the backend setup hooks
    SettingUp,
    /// First connection and registration attempt
    Connecting,
    /// Registered with the remote executor; no agent running
    Connected,
    /// An agent session is running
    Active,
    /// Link lost; retrying within the configured bound
    Reconnecting,
    /// Releasing the session and environment
    TearingDown,
    /// Done; terminal
    Closed,
    /// Unrecoverable failure; waits for teardown
    Failed,
}

impl ProviderPhase {
    /// Every phase
    pub const ALL: [ProviderPhase; 9] = [
        Self::Idle,
        Self::SettingUp,
        Self::Connecting,
        Self::Connected,
        Self::Active,
        Self::Reconnecting,
        Self::TearingDown,
        Self::Closed,
        Self::Failed,
    ];

    /// Check if the executor link is up
    #[inline]
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Active)
    }

    /// Check if no further transitions are possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ProviderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SettingUp => "settingUp",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::TearingDown => "tearingDown",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ProviderPhase) -> Vec<ProviderPhase> {
    use ProviderPhase::{
        Active, Closed, Connected, Connecting, Failed, Idle, Reconnecting, SettingUp, TearingDown,
    };
    match from {
        Idle => vec![SettingUp, Closed],
        SettingUp => vec![Connecting, Failed, TearingDown],
        Connecting => vec![Connected, Reconnecting, Failed, TearingDown],
        Connected => vec![Active, Reconnecting, TearingDown],
        Active => vec![Connected, Reconnecting, TearingDown],
        Reconnecting => vec![Connected, Failed, TearingDown],
        Failed => vec![TearingDown],
        TearingDown => vec![Closed],
        Closed => vec![],
    }
}

/// Check a single transition
///
/// # Errors
/// Returns `ProviderError::InvalidTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: ProviderPhase, to: ProviderPhase) -> Result<(), ProviderError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ProviderError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failure_never_reaches_connecting_first() {
        assert!(validate_transition(ProviderPhase::SettingUp, ProviderPhase::Failed).is_ok());
        assert!(validate_transition(ProviderPhase::Idle, ProviderPhase::Connecting).is_err());
    }

    #[test]
    fn failed_only_tears_down() {
        assert_eq!(allowed_transitions(ProviderPhase::Failed), vec![ProviderPhase::TearingDown]);
        assert!(validate_transition(ProviderPhase::Failed, ProviderPhase::Reconnecting).is_err());
    }

    #[test]
    fn closed_is_terminal() {
        assert!(allowed_transitions(ProviderPhase::Closed).is_empty());
        assert!(ProviderPhase::Closed.is_terminal());
    }
}
