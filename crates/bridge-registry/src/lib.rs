//! Bridge Registry - process-wide table of active connections
//!
//! Provides:
//! - [`ConnectionRegistry`] with an explicit `init`/`shutdown`/`reset` lifecycle
//! - [`ClientConnection`] handles that deliver envelopes to one peer
//! - Lookup by id, by role, by owner, and by role and owner together
//!
//! One registry is constructed by the process entry point and shared by
//! `Arc` with every provider and handler; there is no ambient global.

#![warn(unreachable_pub)]

pub mod connection;
pub mod error;
pub mod registry;

pub use connection::{ClientConnection, ConnectionMetadata};
pub use error::RegistryError;
pub use registry::{ConnectionRegistry, RegistryStats, DEFAULT_CAPACITY};
