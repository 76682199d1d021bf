//! Testing utilities for the provider bridge workspace
//!
//! Shared fixtures: a backend that records its hook calls, a scripted remote
//! executor over in-memory links, and small-timeout provider configs.

#![allow(missing_docs, clippy::missing_panics_doc, clippy::must_use_candidate)]

use async_trait::async_trait;
use bridge_protocol::{
    ConnectionId, ConnectionRole, DiffFiles, Envelope, Message, Register, Registered, RequestId,
};
use bridge_provider::{
    AgentServerConfig, BackendError, EnvironmentBackend, HeartbeatConfig, InitVars, Provider,
    ProviderConfig, ReconnectConfig, TransportKind,
};
use bridge_registry::{ClientConnection, ConnectionMetadata, ConnectionRegistry};
use bridge_transport::{MemoryConnector, RemoteEnd};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Hook invocations seen by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Setup(String),
    Teardown,
    ResolveProjectContext,
    ResolveWorkspacePath,
    EnsureAgentServer,
    GetDiffFiles,
}

/// Backend that records calls and fails on request
#[derive(Debug)]
pub struct RecordingBackend {
    project_path: PathBuf,
    calls: Mutex<Vec<BackendCall>>,
    setup_error: Option<String>,
    teardown_error: Option<String>,
    teardown_delay: Option<Duration>,
    diff: Result<DiffFiles, String>,
}

impl RecordingBackend {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            calls: Mutex::new(Vec::new()),
            setup_error: None,
            teardown_error: None,
            teardown_delay: None,
            diff: Ok(DiffFiles::default()),
        }
    }

    #[must_use]
    pub fn failing_setup(mut self, reason: &str) -> Self {
        self.setup_error = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn failing_teardown(mut self, reason: &str) -> Self {
        self.teardown_error = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn slow_teardown(mut self, delay: Duration) -> Self {
        self.teardown_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_diff(mut self, diff: DiffFiles) -> Self {
        self.diff = Ok(diff);
        self
    }

    #[must_use]
    pub fn failing_diff(mut self, reason: &str) -> Self {
        self.diff = Err(reason.to_string());
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &BackendCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl EnvironmentBackend for RecordingBackend {
    fn kind(&self) -> String {
        "recording".to_string()
    }

    async fn setup_environment(&self, vars: &InitVars) -> Result<(), BackendError> {
        self.record(BackendCall::Setup(vars.environment_name.clone()));
        match &self.setup_error {
            Some(reason) => Err(BackendError::Failed(reason.clone())),
            None => Ok(()),
        }
    }

    async fn teardown_environment(&self) -> Result<(), BackendError> {
        self.record(BackendCall::Teardown);
        if let Some(delay) = self.teardown_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.teardown_error {
            Some(reason) => Err(BackendError::Failed(reason.clone())),
            None => Ok(()),
        }
    }

    async fn resolve_project_context(&self, _vars: &InitVars) -> Result<PathBuf, BackendError> {
        self.record(BackendCall::ResolveProjectContext);
        Ok(self.project_path.clone())
    }

    async fn resolve_workspace_path(&self, _vars: &InitVars) -> Result<PathBuf, BackendError> {
        self.record(BackendCall::ResolveWorkspacePath);
        Ok(self.project_path.clone())
    }

    async fn ensure_agent_server(&self) -> Result<(), BackendError> {
        self.record(BackendCall::EnsureAgentServer);
        Ok(())
    }

    async fn get_diff_files(&self) -> Result<DiffFiles, BackendError> {
        self.record(BackendCall::GetDiffFiles);
        self.diff.clone().map_err(BackendError::Failed)
    }
}

/// Config over the in-memory transport: 3 reconnect attempts 10ms apart,
/// 1s heartbeat, 2 missed beats allowed
pub fn test_config() -> ProviderConfig {
    ProviderConfig::new(
        AgentServerConfig::new("127.0.0.1", 1).with_transport(TransportKind::Memory),
        HeartbeatConfig::new(1_000, 2),
    )
    .with_reconnect(ReconnectConfig::fixed(3, 10))
    .with_registration_timeout(1_000)
}

/// Plays the remote executor for a provider under test
pub struct ScriptedExecutor {
    remotes: UnboundedReceiver<RemoteEnd>,
}

impl ScriptedExecutor {
    pub fn new(remotes: UnboundedReceiver<RemoteEnd>) -> Self {
        Self { remotes }
    }

    /// Next link the provider opened
    pub async fn accept(&mut self) -> RemoteEnd {
        self.remotes.recv().await.expect("connector dropped")
    }

    /// Accept a link and answer its registration
    pub async fn accept_and_register(&mut self, connection_id: &str) -> ExecutorLink {
        let mut remote = self.accept().await;
        let register = answer_registration(&mut remote, connection_id).await;
        ExecutorLink { remote, register }
    }
}

/// Read the `register` message and reply `registered`
pub async fn answer_registration(remote: &mut RemoteEnd, connection_id: &str) -> Register {
    let envelope = remote.recv().await.expect("link closed before registration");
    let Message::Register(register) = envelope.message else {
        panic!("expected register, got {}", envelope.message.kind());
    };
    let mut reply = Envelope::new(Message::Registered(Registered {
        connection_id: ConnectionId::from(connection_id),
    }));
    reply.request_id = envelope.request_id;
    remote.send(&reply).expect("provider hung up");
    register
}

/// A registered executor link
pub struct ExecutorLink {
    pub remote: RemoteEnd,
    pub register: Register,
}

impl ExecutorLink {
    /// Next non-heartbeat message; heartbeats are acknowledged on the way
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let envelope = self.remote.recv().await?;
            if let Message::Heartbeat(beat) = &envelope.message {
                let mut ack = Envelope::new(Message::HeartbeatAck(beat.clone()));
                ack.request_id = envelope.request_id.clone();
                let _ = self.remote.send(&ack);
                continue;
            }
            return Some(envelope);
        }
    }

    pub fn send(&self, envelope: &Envelope) {
        self.remote.send(envelope).expect("provider hung up");
    }

    /// Send `message` under `request_id` and wait for the reply carrying it
    pub async fn request(&mut self, request_id: &str, message: Message) -> Envelope {
        let request_id = RequestId::from(request_id);
        self.send(&Envelope::new(message).with_request_id(request_id.clone()));
        loop {
            let envelope = self.recv().await.expect("link closed before reply");
            if envelope.request_id.as_ref() == Some(&request_id) {
                return envelope;
            }
        }
    }
}

/// Provider wired to an in-memory connector
pub struct Harness {
    pub provider: Provider,
    pub connector: Arc<MemoryConnector>,
    pub executor: ScriptedExecutor,
    pub registry: Arc<ConnectionRegistry>,
}

impl Harness {
    pub fn new(backend: Arc<dyn EnvironmentBackend>, config: ProviderConfig) -> Self {
        Self::with_registry(backend, config, ConnectionRegistry::init(16))
    }

    /// Provider that shares `registry` with whoever else holds it
    pub fn with_registry(
        backend: Arc<dyn EnvironmentBackend>,
        config: ProviderConfig,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let (connector, remotes) = MemoryConnector::channel();
        let connector = Arc::new(connector);
        let provider = Provider::with_connector(config, backend, connector.clone(), registry.clone());
        Self {
            provider,
            connector,
            executor: ScriptedExecutor::new(remotes),
            registry,
        }
    }

    /// Register an app connection observing `owner_id`
    pub fn observe(&self, owner_id: &str) -> UnboundedReceiver<Envelope> {
        let (connection, receiver) =
            ClientConnection::open(ConnectionRole::App, ConnectionMetadata::new().with_owner(owner_id));
        self.registry.register(connection).expect("registry full");
        receiver
    }

    /// Number of registry entries for the executor that called itself `remote_id`
    pub fn executor_entries(&self, remote_id: &str) -> usize {
        executor_entries(&self.registry, remote_id)
    }
}

/// Executor connections in `registry` whose peer id is `remote_id`
pub fn executor_entries(registry: &ConnectionRegistry, remote_id: &str) -> usize {
    let remote_id = ConnectionId::from(remote_id);
    registry
        .find_by_role(ConnectionRole::Executor)
        .into_iter()
        .filter(|c| c.metadata.remote_id.as_ref() == Some(&remote_id))
        .count()
}
