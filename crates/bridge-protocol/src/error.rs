//! Protocol-level errors

/// Errors raised while encoding or decoding wire messages
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match any known message shape
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame decoded but a field violated the message contract
    #[error("invalid message `{kind}`: {reason}")]
    InvalidMessage {
        /// Wire `type` of the offending message
        kind: String,
        /// What was wrong with it
        reason: String,
    },

    /// Notification action string did not name a known verb/phase pair
    #[error("unknown notification action: {0}")]
    UnknownAction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::InvalidMessage {
            kind: "createFile".to_string(),
            reason: "empty path".to_string(),
        };
        assert_eq!(err.to_string(), "invalid message `createFile`: empty path");
    }
}
