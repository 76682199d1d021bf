//! Bridge Ops - file operations relayed on behalf of a remote executor
//!
//! Provides:
//! - [`SafePath`] validation (absolute, no `..` segment)
//! - [`NotificationRelay`] emitting paired `fsnotify` request/result notifications
//! - [`FileOperations`] with one handler per file and folder verb
//! - [`OperationDispatcher`] turning a request envelope into its correlated response
//!
//! Every handler follows the same shape: validate, notify request, execute,
//! notify result, respond. A validation failure stops before any
//! notification or filesystem access.

#![warn(unreachable_pub)]

pub mod dispatch;
pub mod error;
pub mod fs;
pub mod handlers;
pub mod path;
pub mod relay;

pub use dispatch::OperationDispatcher;
pub use error::OperationError;
pub use fs::{FileSystem, TokioFileSystem};
pub use handlers::FileOperations;
pub use path::{PathError, SafePath};
pub use relay::{NotificationRelay, NotificationTicket};
