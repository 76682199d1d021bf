//! Keep-alive loop
//!
//! Sends a `heartbeat` every interval and waits for its `heartbeatAck`. An
//! answered beat resets the miss counter; after `max_missed` consecutive
//! unanswered beats the link is closed, which the provider's supervisor sees
//! as a connection loss.

use crate::config::HeartbeatConfig;
use bridge_protocol::{Envelope, Heartbeat, Message};
use bridge_transport::{CorrelatedTransport, TransportError};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Why the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The session's token was cancelled
    Cancelled,
    /// Too many beats went unanswered; the link was closed
    Dead {
        /// Consecutive misses
        missed: u32,
    },
    /// The link failed underneath the loop
    LinkDown(String),
}

/// Run until cancelled, the peer stops answering, or the link fails
pub async fn run(
    transport: Arc<CorrelatedTransport>,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) -> HeartbeatOutcome {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval(), config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed = 0u32;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        let beat = Envelope::new(Message::Heartbeat(Heartbeat::now()));
        let answer = tokio::select! {
            () = cancel.cancelled() => return HeartbeatOutcome::Cancelled,
            answer = transport.send_and_wait(beat, &["heartbeatAck"], Some(config.ack_timeout())) => answer,
        };

        match answer {
            Ok(_) => {
                if missed > 0 {
                    tracing::debug!(missed, "heartbeat recovered");
                }
                missed = 0;
            }
            Err(TransportError::Timeout { .. }) => {
                missed += 1;
                tracing::warn!(missed, max_missed = config.max_missed, "heartbeat missed");
                if missed >= config.max_missed {
                    transport.close("heartbeat missed");
                    return HeartbeatOutcome::Dead { missed };
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "heartbeat stopped");
                return HeartbeatOutcome::LinkDown(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_transport::{Connector, MemoryConnector, RemoteEnd};
    use std::time::Duration;

    async fn linked() -> (Arc<CorrelatedTransport>, RemoteEnd) {
        let (connector, mut remotes) = MemoryConnector::channel();
        let link = connector.connect().await.unwrap();
        let remote = remotes.recv().await.unwrap();
        let (transport, _events) = CorrelatedTransport::start(link);
        (transport, remote)
    }

    #[tokio::test(start_paused = true)]
    async fn answered_beats_keep_running() {
        let (transport, mut remote) = linked().await;
        let acks = tokio::spawn(async move {
            let mut answered = 0;
            while let Some(envelope) = remote.recv().await {
                if let Message::Heartbeat(beat) = envelope.message {
                    let mut ack = Envelope::new(Message::HeartbeatAck(beat));
                    ack.request_id = envelope.request_id;
                    remote.send(&ack).unwrap();
                    answered += 1;
                }
            }
            answered
        });

        let cancel = CancellationToken::new();
        let beats = tokio::spawn(run(transport.clone(), HeartbeatConfig::new(100, 2), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(!transport.is_closed());

        cancel.cancel();
        assert_eq!(beats.await.unwrap(), HeartbeatOutcome::Cancelled);

        transport.close("test over");
        assert_eq!(acks.await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_closes_link() {
        let (transport, _remote) = linked().await;
        let config = HeartbeatConfig::new(100, 3).with_ack_timeout(50);

        let outcome = run(transport.clone(), config, CancellationToken::new()).await;

        assert_eq!(outcome, HeartbeatOutcome::Dead { missed: 3 });
        assert!(transport.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_link_ends_loop() {
        let (transport, mut remote) = linked().await;
        remote.close();

        let outcome = run(transport, HeartbeatConfig::new(100, 3), CancellationToken::new()).await;
        assert!(matches!(outcome, HeartbeatOutcome::LinkDown(_)));
    }
}
