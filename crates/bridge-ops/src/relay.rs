//! Notification relay
//!
//! Broadcasts `fsnotify` messages to the app connections observing an owner.
//! The relay never changes control flow: a notification nobody receives is
//! logged and forgotten.

use bridge_protocol::{
    ConnectionRole, Envelope, FsNotification, FsVerb, NotificationAction, RequestId, ToolUseId,
};
use bridge_registry::{ClientConnection, ConnectionRegistry};
use serde_json::Value;
use std::sync::Arc;

/// Identity shared by the two halves of one notification pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTicket {
    /// Correlation token on both envelopes
    pub request_id: RequestId,
    /// Tool-use id on both bodies
    pub tool_use_id: ToolUseId,
    /// Operation being reported
    pub verb: FsVerb,
    owner_id: Option<String>,
}

/// Emits paired request/result notifications
#[derive(Debug, Clone)]
pub struct NotificationRelay {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationRelay {
    /// Relay resolving observers through `registry`
    #[inline]
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Announce that `verb` is about to run
    ///
    /// Allocates a fresh `requestId`/`toolUseId` pair for the whole exchange.
    pub fn notify_request(&self, owner_id: Option<&str>, verb: FsVerb, data: Value) -> NotificationTicket {
        let ticket = NotificationTicket {
            request_id: RequestId::generate(),
            tool_use_id: ToolUseId::generate(),
            verb,
            owner_id: owner_id.map(str::to_string),
        };

        let body = FsNotification {
            tool_use_id: ticket.tool_use_id.clone(),
            action: NotificationAction::request(verb),
            data: Some(data),
            content: None,
            is_error: false,
        };
        self.broadcast(&ticket, body);
        ticket
    }

    /// Announce how the operation behind `ticket` ended
    pub fn notify_response(&self, ticket: &NotificationTicket, content: Value, is_error: bool) {
        let body = FsNotification {
            tool_use_id: ticket.tool_use_id.clone(),
            action: NotificationAction::result(ticket.verb),
            data: None,
            content: Some(content),
            is_error,
        };
        self.broadcast(ticket, body);
    }

    /// App connections observing `owner_id`; every app connection when unknown
    #[must_use]
    pub fn observers(&self, owner_id: Option<&str>) -> Vec<ClientConnection> {
        match owner_id {
            Some(owner) => self.registry.find_by_role_and_owner(ConnectionRole::App, owner),
            None => self.registry.find_by_role(ConnectionRole::App),
        }
    }

    fn broadcast(&self, ticket: &NotificationTicket, body: FsNotification) {
        let action = body.action;
        let envelope = Envelope::notification(ticket.request_id.clone(), body);
        let observers = self.observers(ticket.owner_id.as_deref());

        if observers.is_empty() {
            tracing::trace!(%action, request_id = %ticket.request_id, "no observers for notification");
            return;
        }

        for observer in observers {
            if let Err(e) = observer.deliver(envelope.clone()) {
                tracing::warn!(
                    %action,
                    connection_id = %observer.id,
                    error = %e,
                    "notification delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::{Message, NotificationPhase};
    use bridge_registry::ConnectionMetadata;
    use serde_json::json;

    fn app(registry: &ConnectionRegistry, owner: &str) -> tokio::sync::mpsc::UnboundedReceiver<Envelope> {
        let (conn, rx) = ClientConnection::open(ConnectionRole::App, ConnectionMetadata::new().with_owner(owner));
        registry.register(conn).unwrap();
        rx
    }

    fn fsnotify(envelope: &Envelope) -> &FsNotification {
        match &envelope.message {
            Message::FsNotify(body) => body,
            other => panic!("expected fsnotify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pair_shares_ids_and_reaches_owner_only() {
        let registry = ConnectionRegistry::init(8);
        let mut mine = app(&registry, "user-1");
        let mut theirs = app(&registry, "user-2");
        let relay = NotificationRelay::new(registry);

        let ticket = relay.notify_request(Some("user-1"), FsVerb::ReadFile, json!({"filePath": "/tmp/a"}));
        relay.notify_response(&ticket, json!({"success": true}), false);

        let request = mine.recv().await.unwrap();
        let result = mine.recv().await.unwrap();
        assert_eq!(request.request_id, Some(ticket.request_id.clone()));
        assert_eq!(result.request_id, Some(ticket.request_id.clone()));

        let (request, result) = (fsnotify(&request), fsnotify(&result));
        assert_eq!(request.action.phase, NotificationPhase::Request);
        assert_eq!(result.action.phase, NotificationPhase::Result);
        assert_eq!(request.tool_use_id, result.tool_use_id);
        assert!(!result.is_error);

        assert!(theirs.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_owner_reaches_every_app() {
        let registry = ConnectionRegistry::init(8);
        let mut a = app(&registry, "user-1");
        let mut b = app(&registry, "user-2");
        let relay = NotificationRelay::new(registry);

        relay.notify_request(None, FsVerb::ListDirectory, json!({}));

        assert_eq!(a.recv().await.unwrap().kind(), "fsnotify");
        assert_eq!(b.recv().await.unwrap().kind(), "fsnotify");
    }

    #[test]
    fn dropped_observer_is_swallowed() {
        let registry = ConnectionRegistry::init(8);
        drop(app(&registry, "user-1"));
        let relay = NotificationRelay::new(registry);

        let ticket = relay.notify_request(Some("user-1"), FsVerb::DeleteFile, json!({}));
        relay.notify_response(&ticket, json!({}), true);
    }
}
