//! Opaque string identifiers
//!
//! Identifiers travel over the wire as plain strings. Locally generated ones
//! are UUID v4; identifiers chosen by the remote side are accepted verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the raw string form
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Correlation token tying one request to one response
    RequestId
);

string_id!(
    /// Identifier of a single message on the wire
    MessageId
);

string_id!(
    /// Identifier pairing a request notification with its result notification
    ToolUseId
);

string_id!(
    /// Identifier of a registered client connection
    ConnectionId
);

impl From<RequestId> for MessageId {
    fn from(value: RequestId) -> Self {
        Self(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = RequestId::from("req-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req-1\"");

        let back: RequestId = serde_json::from_str("\"req-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn request_id_converts_to_message_id() {
        let id = RequestId::from("abc");
        let message_id: MessageId = id.into();
        assert_eq!(message_id.as_str(), "abc");
    }
}
