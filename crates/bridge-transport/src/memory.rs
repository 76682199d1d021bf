//! In-process links
//!
//! [`MemoryConnector`] hands the provider side of each new link to the caller
//! and the remote side ([`RemoteEnd`]) to whoever plays the remote executor.
//! Used for tests and for embedding an executor in the same process.

use crate::error::TransportError;
use crate::link::{Connector, Link};
use bridge_protocol::Envelope;
use futures::channel::mpsc as frame_channel;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Connector producing in-memory link pairs
#[derive(Debug)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<RemoteEnd>,
    refuse_next: AtomicUsize,
    refuse_all: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Create a connector and the receiver of remote ends it produces
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (accepted, remote_ends) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            refuse_next: AtomicUsize::new(0),
            refuse_all: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        };
        (connector, remote_ends)
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Refuse every connection attempt until turned off again
    pub fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far, refused ones included
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn should_refuse(&self) -> bool {
        if self.refuse_all.load(Ordering::SeqCst) {
            return true;
        }
        self.refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_refuse() {
            return Err(TransportError::Connection("connection refused".to_string()));
        }

        let (to_remote, from_provider) = frame_channel::unbounded::<String>();
        let (to_provider, from_remote) = frame_channel::unbounded::<Result<String, TransportError>>();

        self.accepted
            .send(RemoteEnd {
                from_provider,
                to_provider: Some(to_provider),
            })
            .map_err(|_| TransportError::Connection("no remote listener".to_string()))?;

        let sink = to_remote.sink_map_err(|e| TransportError::Connection(e.to_string()));
        Ok(Link::new(Box::pin(sink), Box::pin(from_remote)))
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

/// Remote side of an in-memory link
#[derive(Debug)]
pub struct RemoteEnd {
    from_provider: frame_channel::UnboundedReceiver<String>,
    to_provider: Option<frame_channel::UnboundedSender<Result<String, TransportError>>>,
}

impl RemoteEnd {
    /// Next decodable message from the provider; `None` once the provider hung up
    pub async fn recv(&mut self) -> Option<Envelope> {
        while let Some(frame) = self.from_provider.next().await {
            match Envelope::from_json(&frame) {
                Ok(envelope) => return Some(envelope),
                Err(e) => tracing::warn!(error = %e, "remote end dropped undecodable frame"),
            }
        }
        None
    }

    /// Send a message to the provider
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if either side has closed
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.send_raw(envelope.to_json()?)
    }

    /// Send an arbitrary text frame to the provider
    ///
    /// # Errors
    /// Returns [`TransportError::Connection`] if either side has closed
    pub fn send_raw(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        let sender = self
            .to_provider
            .as_ref()
            .ok_or_else(|| TransportError::Connection("remote end closed".to_string()))?;
        sender
            .unbounded_send(Ok(frame.into()))
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Deliver a link error to the provider, then hang up
    pub fn fail(&mut self, reason: impl Into<String>) {
        if let Some(sender) = self.to_provider.take() {
            let _ = sender.unbounded_send(Err(TransportError::Connection(reason.into())));
        }
    }

    /// Hang up cleanly
    pub fn close(&mut self) {
        self.to_provider = None;
    }

    /// Whether this end has hung up
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.to_provider.is_none()
    }
}
