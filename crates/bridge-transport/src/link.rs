//! Raw text-frame links
//!
//! A [`Link`] is one open bidirectional connection carrying JSON text frames.
//! A [`Connector`] knows how to open a fresh link (and is asked again on every
//! reconnect attempt).

use crate::error::TransportError;
use futures::{Sink, Stream};
use std::pin::Pin;

/// Outgoing half of a link
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming half of a link; ends when the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open bidirectional connection
pub struct Link {
    /// Frames to the peer
    pub sink: FrameSink,
    /// Frames from the peer
    pub stream: FrameStream,
}

impl Link {
    /// Assemble a link from its halves
    #[inline]
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to a remote executor
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a new link
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if the peer is unreachable
    async fn connect(&self) -> Result<Link, TransportError>;

    /// Human-readable endpoint, for logs
    fn endpoint(&self) -> String;
}
