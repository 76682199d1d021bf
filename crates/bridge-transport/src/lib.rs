//! Bridge Transport - correlated messaging over a shared link
//!
//! A [`CorrelatedTransport`] sits on top of one bidirectional [`Link`] and:
//! - Stamps outgoing messages with a `requestId` when absent
//! - Resolves waiting callers by `requestId` first, accepted `type` second
//! - Emits every unmatched inbound message as a [`TransportEvent`]
//! - Rejects all outstanding calls with a connection error when the link drops
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_transport::{Connector, CorrelatedTransport, WebSocketConnector};
//!
//! let link = WebSocketConnector::new("ws://127.0.0.1:3001/provider").connect().await?;
//! let (transport, mut events) = CorrelatedTransport::start(link);
//! let reply = transport
//!     .send_and_wait(envelope, &["registered"], Some(Duration::from_secs(5)))
//!     .await?;
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod link;
pub mod memory;
mod pending;
pub mod transport;
pub mod websocket;

pub use error::TransportError;
pub use link::{Connector, FrameSink, FrameStream, Link};
pub use memory::{MemoryConnector, RemoteEnd};
pub use transport::{CorrelatedTransport, TransportEvent};
pub use websocket::WebSocketConnector;
