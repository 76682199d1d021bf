//! Request envelope to response envelope

use crate::handlers::FileOperations;
use bridge_protocol::{Envelope, Message, OperationResponse, RequestId};

/// Routes file-operation requests to their handler
#[derive(Debug, Clone)]
pub struct OperationDispatcher {
    operations: FileOperations,
}

impl OperationDispatcher {
    /// Dispatcher over `operations`
    #[inline]
    #[must_use]
    pub fn new(operations: FileOperations) -> Self {
        Self { operations }
    }

    /// Underlying handlers
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &FileOperations {
        &self.operations
    }

    /// Mutable access to the underlying handlers
    #[inline]
    pub fn operations_mut(&mut self) -> &mut FileOperations {
        &mut self.operations
    }

    /// Check if `message` is a file-operation request
    #[inline]
    #[must_use]
    pub fn handles(message: &Message) -> bool {
        message.requested_verb().is_some()
    }

    /// Run the request in `envelope` and build its correlated response
    ///
    /// The response carries the request's `requestId` as both `id` and
    /// `requestId`; one is generated if the request had none. Returns `None`
    /// for anything that is not a file-operation request.
    pub async fn dispatch(&self, owner_id: Option<&str>, envelope: &Envelope) -> Option<Envelope> {
        let verb = envelope.message.requested_verb()?;
        let ops = &self.operations;

        let response: OperationResponse = match &envelope.message {
            Message::CreateFile(request) => ops.create_file(owner_id, request).await,
            Message::ReadFile(request) => ops.read_file(owner_id, request).await,
            Message::WriteToFile(request) => ops.write_to_file(owner_id, request).await,
            Message::DeleteFile(request) => ops.delete_file(owner_id, request).await,
            Message::CreateFolder(request) => ops.create_folder(owner_id, request).await,
            Message::DeleteFolder(request) => ops.delete_folder(owner_id, request).await,
            Message::ListDirectory(request) => ops.list_directory(owner_id, request).await,
            _ => return None,
        };

        let request_id = envelope.request_id.clone().unwrap_or_else(RequestId::generate);
        tracing::debug!(%verb, %request_id, success = response.success, "operation handled");
        Some(Envelope::operation_response(verb, request_id, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::NotificationRelay;
    use bridge_protocol::{Heartbeat, ListDirectoryRequest, MessageId};
    use bridge_registry::ConnectionRegistry;

    fn dispatcher() -> OperationDispatcher {
        let relay = NotificationRelay::new(ConnectionRegistry::init(4));
        OperationDispatcher::new(FileOperations::new(relay))
    }

    #[tokio::test]
    async fn ignores_non_operations() {
        let envelope = Envelope::new(Message::Heartbeat(Heartbeat::now()));
        assert!(!OperationDispatcher::handles(&envelope.message));
        assert!(dispatcher().dispatch(None, &envelope).await.is_none());
    }

    #[tokio::test]
    async fn response_is_correlated_to_request() {
        let envelope = Envelope::new(Message::ListDirectory(ListDirectoryRequest {
            dir_path: "relative/dir".into(),
        }))
        .with_request_id(RequestId::from("req-7"));

        let response = dispatcher().dispatch(None, &envelope).await.unwrap();

        assert_eq!(response.kind(), "listDirectoryResponse");
        assert_eq!(response.request_id, Some(RequestId::from("req-7")));
        assert_eq!(response.id, Some(MessageId::from("req-7")));
        let (_, body) = response.message.as_operation_response().unwrap();
        assert!(!body.success);
    }
}
