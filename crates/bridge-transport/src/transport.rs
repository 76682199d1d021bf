//! Correlated transport
//!
//! Owns one [`Link`]: a writer task drains the outbound queue into the sink,
//! a reader task decodes inbound frames and routes each one through the
//! pending-request table. Whatever no caller is waiting for is emitted as a
//! [`TransportEvent::Message`]; when the link ends a single
//! [`TransportEvent::Closed`] follows and every waiter is rejected.

use crate::error::TransportError;
use crate::link::{FrameSink, FrameStream, Link};
use crate::pending::{PendingGuard, PendingTable, Resolution};
use bridge_protocol::{Envelope, MessageId, RequestId};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Events for passive listeners
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Inbound message nobody was waiting for
    Message(Envelope),
    /// Link ended; emitted exactly once
    Closed {
        /// Why the link ended
        reason: String,
    },
}

/// Request/response correlation over one link
pub struct CorrelatedTransport {
    outbound: mpsc::UnboundedSender<String>,
    pending: Arc<PendingTable>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CorrelatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelatedTransport")
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CorrelatedTransport {
    /// Take ownership of `link` and start its reader and writer tasks
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(link: Link) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingTable::default());
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(write_loop(link.sink, outbound_rx, shutdown.clone()));
        let reader = tokio::spawn(read_loop(
            link.stream,
            pending.clone(),
            events_tx,
            shutdown.clone(),
        ));

        let transport = Arc::new(Self {
            outbound,
            pending,
            shutdown,
            tasks: Mutex::new(vec![writer, reader]),
        });
        (transport, events_rx)
    }

    /// Fire-and-forget send; stamps `id` and `requestId` when absent
    ///
    /// # Errors
    /// - `TransportError::Connection` if the transport is closed
    /// - `TransportError::Codec` if the message cannot be encoded
    pub fn send(&self, mut envelope: Envelope) -> Result<RequestId, TransportError> {
        let request_id = stamp(&mut envelope);
        self.enqueue(&envelope)?;
        Ok(request_id)
    }

    /// Send and wait for the matching reply
    ///
    /// The reply is the first inbound message carrying this call's
    /// `requestId`, or failing that the first whose `type` is listed in
    /// `accepted_types`. `None` or a zero `timeout` waits indefinitely.
    ///
    /// # Errors
    /// - `TransportError::Timeout` if the deadline passes first
    /// - `TransportError::Connection` if the link drops while waiting
    /// - `TransportError::DuplicateRequest` if the `requestId` is already in flight
    pub async fn send_and_wait(
        &self,
        mut envelope: Envelope,
        accepted_types: &[&str],
        timeout: Option<Duration>,
    ) -> Result<Envelope, TransportError> {
        let request_id = stamp(&mut envelope);
        let mut receiver = self.pending.insert(request_id.clone(), accepted_types)?;
        let mut guard = PendingGuard::new(self.pending.clone(), request_id.clone());

        self.enqueue(&envelope)?;

        let outcome = match timeout.filter(|d| !d.is_zero()) {
            None => receiver.await,
            Some(deadline) => {
                match tokio::time::timeout(deadline, &mut receiver).await {
                    Ok(outcome) => outcome,
                    Err(_) if self.pending.expire(&request_id) => {
                        guard.disarm();
                        tracing::debug!(%request_id, ?deadline, "request timed out");
                        return Err(TransportError::Timeout {
                            request_id,
                            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    // Resolved concurrently with the deadline; the value is already queued.
                    Err(_) => receiver.await,
                }
            }
        };
        guard.disarm();

        outcome.unwrap_or_else(|_| Err(TransportError::Connection("transport dropped".to_string())))
    }

    /// Close the link and reject every waiting caller
    ///
    /// Idempotent. The `Closed` event is still emitted by the reader task.
    pub fn close(&self, reason: &str) {
        let rejected = self.pending.reject_all(reason);
        if !self.shutdown.is_cancelled() {
            tracing::debug!(reason, rejected, "closing transport");
            self.shutdown.cancel();
        }
    }

    /// Whether the link has ended or been closed
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbound.is_closed()
    }

    /// Number of callers currently waiting for a reply
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn enqueue(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Connection("transport closed".to_string()));
        }
        let frame = envelope.to_json()?;
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Connection("transport closed".to_string()))
    }
}

impl Drop for CorrelatedTransport {
    fn drop(&mut self) {
        self.close("transport dropped");
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn stamp(envelope: &mut Envelope) -> RequestId {
    if envelope.id.is_none() {
        envelope.id = Some(MessageId::generate());
    }
    envelope
        .request_id
        .get_or_insert_with(RequestId::generate)
        .clone()
}

async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "write failed, closing transport");
                    shutdown.cancel();
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: FrameStream,
    pending: Arc<PendingTable>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break "closed locally".to_string(),
            frame = stream.next() => match frame {
                Some(Ok(text)) => route(&text, &pending, &events),
                Some(Err(e)) => break e.to_string(),
                None => break "closed by peer".to_string(),
            }
        }
    };

    shutdown.cancel();
    let rejected = pending.reject_all(&reason);
    tracing::info!(%reason, rejected, "transport closed");
    let _ = events.send(TransportEvent::Closed { reason });
}

fn route(text: &str, pending: &PendingTable, events: &mpsc::UnboundedSender<TransportEvent>) {
    let envelope = match Envelope::from_json(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable frame");
            return;
        }
    };

    match pending.resolve(envelope) {
        Resolution::ById(request_id) => tracing::trace!(%request_id, "resolved by request id"),
        Resolution::ByType(request_id) => tracing::trace!(%request_id, "resolved by message type"),
        Resolution::Late(request_id) => {
            tracing::debug!(%request_id, "dropping response that arrived after timeout");
        }
        Resolution::Unmatched(envelope) => {
            let _ = events.send(TransportEvent::Message(envelope));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Connector;
    use crate::memory::{MemoryConnector, RemoteEnd};
    use bridge_protocol::{Heartbeat, Message, ReadFileRequest, Registered};
    use proptest::prelude::*;

    async fn connected() -> (Arc<CorrelatedTransport>, mpsc::UnboundedReceiver<TransportEvent>, RemoteEnd) {
        let (connector, mut remotes) = MemoryConnector::channel();
        let link = connector.connect().await.unwrap();
        let remote = remotes.recv().await.unwrap();
        let (transport, events) = CorrelatedTransport::start(link);
        (transport, events, remote)
    }

    fn ping() -> Envelope {
        Envelope::new(Message::Heartbeat(Heartbeat::now()))
    }

    #[tokio::test]
    async fn send_stamps_ids() {
        let (transport, _events, mut remote) = connected().await;

        let request_id = transport.send(ping()).unwrap();
        let received = remote.recv().await.unwrap();

        assert_eq!(received.request_id, Some(request_id));
        assert!(received.id.is_some());
    }

    #[tokio::test]
    async fn send_keeps_caller_chosen_request_id() {
        let (transport, _events, mut remote) = connected().await;

        let id = transport
            .send(ping().with_request_id(RequestId::from("mine")))
            .unwrap();
        assert_eq!(id.as_str(), "mine");
        assert_eq!(remote.recv().await.unwrap().request_id, Some(id));
    }

    #[tokio::test]
    async fn send_and_wait_resolves_by_request_id() {
        let (transport, _events, mut remote) = connected().await;

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send_and_wait(ping(), &[], None).await })
        };

        let request = remote.recv().await.unwrap();
        remote
            .send(
                &Envelope::new(Message::HeartbeatAck(Heartbeat::now()))
                    .with_request_id(request.request_id.unwrap()),
            )
            .unwrap();

        let reply = waiter.await.unwrap().unwrap();
        assert_eq!(reply.kind(), "heartbeatAck");
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_and_wait_falls_back_to_accepted_type() {
        let (transport, _events, mut remote) = connected().await;

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .send_and_wait(ping(), &["registered"], Some(Duration::from_secs(5)))
                    .await
            })
        };

        let _ = remote.recv().await.unwrap();
        remote
            .send(&Envelope::new(Message::Registered(Registered {
                connection_id: "conn-1".into(),
            })))
            .unwrap();

        let reply = waiter.await.unwrap().unwrap();
        assert_eq!(reply.kind(), "registered");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_once_and_drops_late_reply() {
        let (transport, mut events, mut remote) = connected().await;

        let result = transport
            .send_and_wait(ping(), &["heartbeatAck"], Some(Duration::from_millis(50)))
            .await;
        let Err(TransportError::Timeout { request_id, timeout_ms }) = result else {
            panic!("expected timeout, got {result:?}");
        };
        assert_eq!(timeout_ms, 50);
        assert_eq!(transport.pending_count(), 0);

        let _ = remote.recv().await.unwrap();
        remote
            .send(&Envelope::new(Message::HeartbeatAck(Heartbeat::now())).with_request_id(request_id))
            .unwrap();
        remote.send(&ping()).unwrap();

        // The late ack is swallowed; the next unsolicited ping is the first event.
        let event = events.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Message(ref e) if e.kind() == "heartbeat"));
    }

    #[tokio::test]
    async fn zero_timeout_waits_indefinitely() {
        let (transport, _events, mut remote) = connected().await;

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send_and_wait(ping(), &[], Some(Duration::ZERO)).await })
        };

        let request = remote.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        remote
            .send(&Envelope::new(Message::HeartbeatAck(Heartbeat::now())).with_request_id(request.request_id.unwrap()))
            .unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unmatched_messages_become_events() {
        let (_transport, mut events, remote) = connected().await;

        remote
            .send(
                &Envelope::new(Message::ReadFile(ReadFileRequest {
                    file_path: "/tmp/a".to_string(),
                }))
                .with_request_id(RequestId::from("remote-1")),
            )
            .unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Message(envelope) => {
                assert_eq!(envelope.kind(), "readFile");
                assert_eq!(envelope.request_id, Some(RequestId::from("remote-1")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let (_transport, mut events, remote) = connected().await;

        remote.send_raw("{not json").unwrap();
        remote.send_raw(r#"{"type":"nope"}"#).unwrap();
        remote.send(&ping()).unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Message(ref e) if e.kind() == "heartbeat"));
    }

    #[tokio::test]
    async fn peer_close_rejects_pending_and_emits_closed_once() {
        let (transport, mut events, mut remote) = connected().await;

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let transport = transport.clone();
                tokio::spawn(async move { transport.send_and_wait(ping(), &[], None).await })
            })
            .collect();

        for _ in 0..3 {
            let _ = remote.recv().await.unwrap();
        }
        remote.close();

        for waiter in waiters {
            let result = waiter.await.unwrap();
            assert!(matches!(result, Err(TransportError::Connection(_))));
        }

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed {
                reason: "closed by peer".to_string()
            })
        );
        assert!(transport.is_closed());
        assert!(matches!(transport.send(ping()), Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn local_close_rejects_pending() {
        let (transport, mut events, mut remote) = connected().await;

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send_and_wait(ping(), &[], None).await })
        };
        let _ = remote.recv().await.unwrap();

        transport.close("provider stopping");
        transport.close("provider stopping");

        assert!(matches!(waiter.await.unwrap(), Err(TransportError::Connection(_))));
        assert!(matches!(events.recv().await, Some(TransportEvent::Closed { .. })));
        assert!(remote.recv().await.is_none());
    }

    #[tokio::test]
    async fn link_error_closes_transport() {
        let (transport, mut events, mut remote) = connected().await;

        remote.fail("reset by peer");

        match events.recv().await {
            Some(TransportEvent::Closed { reason }) => assert!(reason.contains("reset by peer")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn dropped_waiter_leaves_no_pending_entry() {
        let (transport, _events, _remote) = connected().await;

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send_and_wait(ping(), &[], None).await })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        assert_eq!(transport.pending_count(), 0);
    }

    /// Answer every request in `order`, tagging each reply with its request's index
    async fn replies_reach_their_callers(order: Vec<usize>) -> Vec<(usize, Envelope)> {
        let (transport, _events, mut remote) = connected().await;

        let waiters: Vec<_> = (0..order.len())
            .map(|i| {
                let transport = transport.clone();
                let request = ping().with_request_id(RequestId::from(format!("req-{i}")));
                tokio::spawn(async move { (i, transport.send_and_wait(request, &[], None).await) })
            })
            .collect();

        // Each request on the wire is already pending.
        for _ in 0..order.len() {
            remote.recv().await.unwrap();
        }
        for &i in &order {
            let reply = Envelope::new(Message::Registered(Registered {
                connection_id: format!("tag-{i}").into(),
            }))
            .with_request_id(RequestId::from(format!("req-{i}")));
            remote.send(&reply).unwrap();
        }

        let mut replies = Vec::new();
        for waiter in waiters {
            let (i, reply) = waiter.await.unwrap();
            replies.push((i, reply.unwrap()));
        }
        assert_eq!(transport.pending_count(), 0);
        replies
    }

    proptest! {
        #[test]
        fn permuted_replies_reach_their_callers(
            order in (1usize..16).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let replies = runtime.block_on(replies_reach_their_callers(order));

            for (i, reply) in replies {
                let Message::Registered(body) = reply.message else {
                    panic!("expected registered, got {}", reply.kind());
                };
                prop_assert_eq!(body.connection_id.as_str(), format!("tag-{i}"));
                prop_assert_eq!(reply.request_id, Some(RequestId::from(format!("req-{i}"))));
            }
        }
    }
}
