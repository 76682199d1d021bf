//! `fsnotify` notification body
//!
//! Every relayed file operation produces a request notification before it runs
//! and (on the paths that reach execution) a result notification after it ends.
//! Both carry the same `requestId` (on the envelope) and `toolUseId`.

use crate::error::ProtocolError;
use crate::ids::ToolUseId;
use crate::operation::FsVerb;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which half of the notification pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationPhase {
    /// Emitted before the side effect
    Request,
    /// Emitted after the side effect
    Result,
}

/// `<verb>Request` / `<verb>Result` action string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NotificationAction {
    /// Operation the notification describes
    pub verb: FsVerb,
    /// Request or result half
    pub phase: NotificationPhase,
}

impl NotificationAction {
    /// Request half for `verb`
    #[inline]
    #[must_use]
    pub fn request(verb: FsVerb) -> Self {
        Self {
            verb,
            phase: NotificationPhase::Request,
        }
    }

    /// Result half for `verb`
    #[inline]
    #[must_use]
    pub fn result(verb: FsVerb) -> Self {
        Self {
            verb,
            phase: NotificationPhase::Result,
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.phase {
            NotificationPhase::Request => "Request",
            NotificationPhase::Result => "Result",
        };
        write!(f, "{}{}", self.verb.as_str(), suffix)
    }
}

impl FromStr for NotificationAction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, phase) = if let Some(verb) = s.strip_suffix("Request") {
            (verb, NotificationPhase::Request)
        } else if let Some(verb) = s.strip_suffix("Result") {
            (verb, NotificationPhase::Result)
        } else {
            return Err(ProtocolError::UnknownAction(s.to_string()));
        };

        let verb = verb
            .parse::<FsVerb>()
            .map_err(|_| ProtocolError::UnknownAction(s.to_string()))?;
        Ok(Self { verb, phase })
    }
}

impl From<NotificationAction> for String {
    fn from(value: NotificationAction) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for NotificationAction {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Body of a `fsnotify` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsNotification {
    /// Pairs the request half with the result half
    pub tool_use_id: ToolUseId,
    /// `<verb>Request` or `<verb>Result`
    pub action: NotificationAction,
    /// Operation arguments (request half)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Operation outcome (result half)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    /// True iff the operation raised or returned a failure
    #[serde(default)]
    pub is_error: bool,
}
