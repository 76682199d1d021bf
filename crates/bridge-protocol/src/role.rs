//! Logical roles of registered connections

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a connection plays in the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Remote executor living inside an environment
    Executor,
    /// Coordinating application (observes notifications)
    App,
    /// Interactive terminal client
    Terminal,
}

impl ConnectionRole {
    /// Wire name of the role
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executor => "executor",
            Self::App => "app",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
