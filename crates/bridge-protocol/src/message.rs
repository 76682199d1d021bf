//! Message envelope and the typed message union
//!
//! Wire form: `{ "id"?, "requestId"?, "type", ...fields }`. The `type` field
//! selects a [`Message`] variant; each variant has exactly one payload shape,
//! so a frame is validated once when it is decoded at the transport edge.

use crate::error::ProtocolError;
use crate::ids::{ConnectionId, MessageId, RequestId};
use crate::notification::FsNotification;
use crate::operation::{
    CreateFileRequest, CreateFolderRequest, DeleteFileRequest, DeleteFolderRequest,
    DiffFilesResponse, FsVerb, ListDirectoryRequest, OperationResponse, ReadFileRequest,
    WriteToFileRequest,
};
use crate::role::ConnectionRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration handshake sent by a provider right after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    /// Role the connecting side plays
    pub role: ConnectionRole,
    /// Environment the provider fronts
    pub environment_name: String,
    /// Backend kind (`local`, `docker`, `worktree`, ...)
    pub provider_kind: String,
    /// Actor that owns observability for this connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// Handshake acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    /// Identifier the remote side assigned to this connection
    pub connection_id: ConnectionId,
}

/// Keep-alive ping and its acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// When the ping was sent
    pub sent_at: DateTime<Utc>,
}

impl Heartbeat {
    /// Heartbeat stamped with the current time
    #[inline]
    #[must_use]
    pub fn now() -> Self {
        Self {
            sent_at: Utc::now(),
        }
    }
}

/// Coordinating app asks the provider to start an agent session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStart {
    /// Agent being started
    pub agent_id: String,
    /// Actor that observes this agent's notifications
    pub owner_id: String,
    /// Free-form task description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Opaque payload forwarded to the remote executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Remote executor reports the end of an agent session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCompleted {
    /// Agent that finished
    pub agent_id: String,
    /// Whether the session ended successfully
    pub success: bool,
    /// Optional summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Sent to app connections when a provider reaches `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailed {
    /// Environment whose provider failed
    pub environment_name: String,
    /// Failure description
    pub reason: String,
}

/// Every message the bridge understands, keyed by wire `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Registration handshake
    Register(Register),
    /// Registration acknowledgement
    Registered(Registered),
    /// Keep-alive ping
    Heartbeat(Heartbeat),
    /// Keep-alive acknowledgement
    HeartbeatAck(Heartbeat),
    /// Start an agent session
    AgentStart(AgentStart),
    /// Agent session finished
    AgentCompleted(AgentCompleted),
    /// Provider reached the `Failed` state
    ProviderFailed(ProviderFailed),
    /// Create a file
    CreateFile(CreateFileRequest),
    /// Response to `createFile`
    CreateFileResponse(OperationResponse),
    /// Read a file
    ReadFile(ReadFileRequest),
    /// Response to `readFile`
    ReadFileResponse(OperationResponse),
    /// Write a file by project-relative path
    WriteToFile(WriteToFileRequest),
    /// Response to `writeToFile`
    WriteToFileResponse(OperationResponse),
    /// Delete a file
    DeleteFile(DeleteFileRequest),
    /// Response to `deleteFile`
    DeleteFileResponse(OperationResponse),
    /// Create a folder
    CreateFolder(CreateFolderRequest),
    /// Response to `createFolder`
    CreateFolderResponse(OperationResponse),
    /// Delete a folder
    DeleteFolder(DeleteFolderRequest),
    /// Response to `deleteFolder`
    DeleteFolderResponse(OperationResponse),
    /// List a directory
    ListDirectory(ListDirectoryRequest),
    /// Response to `listDirectory`
    ListDirectoryResponse(OperationResponse),
    /// Ask the provider for the environment's changed files
    GetDiffFiles,
    /// Response to `getDiffFiles`
    GetDiffFilesResponse(DiffFilesResponse),
    /// Paired request/result notification
    #[serde(rename = "fsnotify")]
    FsNotify(FsNotification),
}

impl Message {
    /// Wire `type` of this message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Registered(_) => "registered",
            Self::Heartbeat(_) => "heartbeat",
            Self::HeartbeatAck(_) => "heartbeatAck",
            Self::AgentStart(_) => "agentStart",
            Self::AgentCompleted(_) => "agentCompleted",
            Self::ProviderFailed(_) => "providerFailed",
            Self::CreateFile(_) => FsVerb::CreateFile.as_str(),
            Self::CreateFileResponse(_) => FsVerb::CreateFile.response_type(),
            Self::ReadFile(_) => FsVerb::ReadFile.as_str(),
            Self::ReadFileResponse(_) => FsVerb::ReadFile.response_type(),
            Self::WriteToFile(_) => FsVerb::WriteToFile.as_str(),
            Self::WriteToFileResponse(_) => FsVerb::WriteToFile.response_type(),
            Self::DeleteFile(_) => FsVerb::DeleteFile.as_str(),
            Self::DeleteFileResponse(_) => FsVerb::DeleteFile.response_type(),
            Self::CreateFolder(_) => FsVerb::CreateFolder.as_str(),
            Self::CreateFolderResponse(_) => FsVerb::CreateFolder.response_type(),
            Self::DeleteFolder(_) => FsVerb::DeleteFolder.as_str(),
            Self::DeleteFolderResponse(_) => FsVerb::DeleteFolder.response_type(),
            Self::ListDirectory(_) => FsVerb::ListDirectory.as_str(),
            Self::ListDirectoryResponse(_) => FsVerb::ListDirectory.response_type(),
            Self::GetDiffFiles => "getDiffFiles",
            Self::GetDiffFilesResponse(_) => "getDiffFilesResponse",
            Self::FsNotify(_) => "fsnotify",
        }
    }

    /// Wrap an operation outcome in the response variant matching `verb`
    #[must_use]
    pub fn operation_response(verb: FsVerb, response: OperationResponse) -> Self {
        match verb {
            FsVerb::CreateFile => Self::CreateFileResponse(response),
            FsVerb::ReadFile => Self::ReadFileResponse(response),
            FsVerb::WriteToFile => Self::WriteToFileResponse(response),
            FsVerb::DeleteFile => Self::DeleteFileResponse(response),
            FsVerb::CreateFolder => Self::CreateFolderResponse(response),
            FsVerb::DeleteFolder => Self::DeleteFolderResponse(response),
            FsVerb::ListDirectory => Self::ListDirectoryResponse(response),
        }
    }

    /// Borrow the operation outcome if this is a `<verb>Response`
    #[must_use]
    pub fn as_operation_response(&self) -> Option<(FsVerb, &OperationResponse)> {
        match self {
            Self::CreateFileResponse(r) => Some((FsVerb::CreateFile, r)),
            Self::ReadFileResponse(r) => Some((FsVerb::ReadFile, r)),
            Self::WriteToFileResponse(r) => Some((FsVerb::WriteToFile, r)),
            Self::DeleteFileResponse(r) => Some((FsVerb::DeleteFile, r)),
            Self::CreateFolderResponse(r) => Some((FsVerb::CreateFolder, r)),
            Self::DeleteFolderResponse(r) => Some((FsVerb::DeleteFolder, r)),
            Self::ListDirectoryResponse(r) => Some((FsVerb::ListDirectory, r)),
            _ => None,
        }
    }

    /// Verb requested, if this is a file-operation request
    #[must_use]
    pub fn requested_verb(&self) -> Option<FsVerb> {
        match self {
            Self::CreateFile(_) => Some(FsVerb::CreateFile),
            Self::ReadFile(_) => Some(FsVerb::ReadFile),
            Self::WriteToFile(_) => Some(FsVerb::WriteToFile),
            Self::DeleteFile(_) => Some(FsVerb::DeleteFile),
            Self::CreateFolder(_) => Some(FsVerb::CreateFolder),
            Self::DeleteFolder(_) => Some(FsVerb::DeleteFolder),
            Self::ListDirectory(_) => Some(FsVerb::ListDirectory),
            _ => None,
        }
    }
}

/// A message plus its identity and correlation token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier of this message (stamped by the transport when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Correlation token shared by a request and its response
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Typed body
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Unstamped envelope around `message`
    #[inline]
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            id: None,
            request_id: None,
            message,
        }
    }

    /// Set the correlation token
    #[inline]
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Set the message identifier
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Correlated `<verb>Response` answering `request_id`
    ///
    /// Both `id` and `requestId` carry the request's token.
    #[must_use]
    pub fn operation_response(
        verb: FsVerb,
        request_id: RequestId,
        response: OperationResponse,
    ) -> Self {
        Self::new(Message::operation_response(verb, response))
            .with_id(request_id.clone().into())
            .with_request_id(request_id)
    }

    /// `fsnotify` envelope for one half of a notification pair
    #[must_use]
    pub fn notification(request_id: RequestId, body: FsNotification) -> Self {
        Self::new(Message::FsNotify(body)).with_request_id(request_id)
    }

    /// Wire `type` of the body
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }

    /// Encode to a JSON text frame
    ///
    /// # Errors
    /// Returns [`ProtocolError::Malformed`] if serialization fails
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame
    ///
    /// # Errors
    /// Returns [`ProtocolError::Malformed`] for invalid JSON or an unknown `type`
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
