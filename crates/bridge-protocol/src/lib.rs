//! Bridge Protocol - wire shapes shared by every provider component
//!
//! Defines:
//! - The message [`Envelope`] carried over a correlated connection
//! - The typed [`Message`] union keyed by the `type` field
//! - File-operation request/response payloads and the `fsnotify` notification body
//! - Opaque identifiers ([`RequestId`], [`MessageId`], [`ToolUseId`], [`ConnectionId`])
//!
//! # Example
//!
//! ```rust
//! use bridge_protocol::{Envelope, Message, ReadFileRequest};
//!
//! let envelope = Envelope::new(Message::ReadFile(ReadFileRequest {
//!     file_path: "/tmp/proj/a.txt".to_string(),
//! }));
//! let json = envelope.to_json().unwrap();
//! assert!(json.contains("\"type\":\"readFile\""));
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod ids;
pub mod message;
pub mod notification;
pub mod operation;
pub mod role;

pub use error::ProtocolError;
pub use ids::{ConnectionId, MessageId, RequestId, ToolUseId};
pub use message::{
    AgentCompleted, AgentStart, Envelope, Heartbeat, Message, ProviderFailed, Register, Registered,
};
pub use notification::{FsNotification, NotificationAction, NotificationPhase};
pub use operation::{
    CreateFileRequest, CreateFolderRequest, DeleteFileRequest, DeleteFolderRequest, DiffFile,
    DiffFiles, DiffFilesResponse, DirEntry, FailureKind, FsVerb, ListDirectoryRequest,
    OperationResponse, ReadFileRequest, WriteToFileRequest,
};
pub use role::ConnectionRole;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
