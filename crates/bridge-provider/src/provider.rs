//! Provider lifecycle
//!
//! One [`Provider`] owns one environment and at most one executor link. It:
//! - Drives the backend hooks through setup and teardown
//! - Connects and registers with the remote executor, retrying within the
//!   configured bound
//! - Keeps the link alive with heartbeats and reconnects when it drops
//! - Serves file operations and diff requests arriving from the executor
//!
//! Lifecycle methods (`on_provider_start`, `close`, reconnection) are
//! serialized by one async mutex. `close` cancels the provider's token before
//! taking that mutex, so it never waits behind a pending retry delay.

use crate::backend::{BackendError, Environment, EnvironmentBackend, InitVars};
use crate::config::{ProviderConfig, TransportKind};
use crate::error::{ProviderError, Result};
use crate::heartbeat;
use crate::phase::{validate_transition, ProviderPhase};
use bridge_ops::{FileOperations, NotificationRelay, OperationDispatcher, SafePath};
use bridge_protocol::{
    AgentCompleted, AgentStart, ConnectionId, ConnectionRole, DiffFilesResponse, Envelope,
    Message, MessageId, ProviderFailed, Register, Registered, RequestId,
};
use bridge_registry::{ClientConnection, ConnectionMetadata, ConnectionRegistry};
use bridge_transport::{Connector, CorrelatedTransport, TransportEvent, WebSocketConnector};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Snapshot of what a provider knows about its environment and link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderState {
    /// Environment brought up by `on_provider_start`
    pub environment: Option<Environment>,
    /// Project root; file operations resolve relative paths under it
    pub project_path: Option<PathBuf>,
    /// Workspace root reported by the backend
    pub workspace_path: Option<PathBuf>,
    /// Id assigned by the executor during registration
    pub connection_id: Option<ConnectionId>,
    /// Actor observing this provider's notifications
    pub owner_id: Option<String>,
    /// Attempt number of the reconnection in progress; 0 when connected
    pub reconnect_attempts: u32,
    /// Error that moved the provider to `Failed`
    pub last_error: Option<String>,
}

struct Session {
    transport: Arc<CorrelatedTransport>,
    /// Registry key; local so providers whose executors reuse ids stay apart
    registry_id: ConnectionId,
    token: CancellationToken,
}

struct Established {
    transport: Arc<CorrelatedTransport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    connection_id: ConnectionId,
}

struct Inner {
    config: ProviderConfig,
    backend: Arc<dyn EnvironmentBackend>,
    connector: Arc<dyn Connector>,
    registry: Arc<ConnectionRegistry>,
    relay: NotificationRelay,
    phase: watch::Sender<ProviderPhase>,
    state: Mutex<ProviderState>,
    session: Mutex<Option<Session>>,
    dispatcher: RwLock<OperationDispatcher>,
    shutdown: CancellationToken,
    lifecycle: tokio::sync::Mutex<()>,
    span: tracing::Span,
}

/// Lifecycle controller bridging the coordinating app to one environment
pub struct Provider {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("phase", &self.phase())
            .field("endpoint", &self.inner.connector.endpoint())
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// Provider connecting over the transport named in `config`
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if the config is invalid or names the
    /// in-memory transport, which needs [`Provider::with_connector`]
    pub fn new(
        config: ProviderConfig,
        backend: Arc<dyn EnvironmentBackend>,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let connector: Arc<dyn Connector> = match config.agent_server.transport {
            TransportKind::WebSocket => Arc::new(WebSocketConnector::new(config.agent_server.url())),
            TransportKind::Memory => {
                return Err(ProviderError::Config(
                    "memory transport needs an explicit connector".into(),
                ))
            }
        };
        Ok(Self::with_connector(config, backend, connector, registry))
    }

    /// Provider opening links through `connector`
    #[must_use]
    pub fn with_connector(
        config: ProviderConfig,
        backend: Arc<dyn EnvironmentBackend>,
        connector: Arc<dyn Connector>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let relay = NotificationRelay::new(registry.clone());
        let dispatcher = OperationDispatcher::new(FileOperations::new(relay.clone()));
        let (phase, _) = watch::channel(ProviderPhase::Idle);
        let span = tracing::info_span!(
            "provider",
            environment = tracing::field::Empty,
            endpoint = %connector.endpoint()
        );

        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                connector,
                registry,
                relay,
                phase,
                state: Mutex::new(ProviderState::default()),
                session: Mutex::new(None),
                dispatcher: RwLock::new(dispatcher),
                shutdown: CancellationToken::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                span,
            }),
        }
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> ProviderPhase {
        *self.inner.phase.borrow()
    }

    /// Receiver notified on every phase change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProviderPhase> {
        self.inner.phase.subscribe()
    }

    /// Snapshot of the provider's state
    #[must_use]
    pub fn state(&self) -> ProviderState {
        self.inner.state.lock().clone()
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    /// Bring the environment up and connect to its executor
    ///
    /// Runs setup, then connects with bounded retries. Returns once the
    /// provider is `Connected`; a supervisor task then handles inbound
    /// traffic and reconnection.
    ///
    /// # Errors
    /// - `ProviderError::InvalidTransition` if the provider is not `Idle`
    /// - `ProviderError::Setup` or a setup `Timeout`; no connection is attempted
    /// - `ProviderError::ReconnectExhausted` once every attempt failed
    /// - `ProviderError::Stopped` if `close` was called meanwhile
    pub async fn on_provider_start(&self, vars: InitVars) -> Result<()> {
        let inner = &self.inner;
        inner.span.record("environment", vars.environment_name.as_str());
        let span = inner.span.clone();

        async move {
            let _lifecycle = inner.lifecycle.lock().await;
            if inner.shutdown.is_cancelled() {
                return Err(ProviderError::Stopped);
            }
            inner.transition(ProviderPhase::SettingUp)?;
            {
                let mut state = inner.state.lock();
                state.environment = Some(Environment::new(&vars.environment_name, inner.backend.kind()));
                state.owner_id.clone_from(&vars.owner_id);
            }

            if let Err(e) = inner.set_up(&vars).await {
                if !matches!(e, ProviderError::Stopped) {
                    inner.fail(&e);
                }
                return Err(e);
            }

            inner.transition(ProviderPhase::Connecting)?;
            let connected = match inner.cancellable(inner.connect_once()).await {
                Ok(established) => Ok(established),
                Err(ProviderError::Stopped) => return Err(ProviderError::Stopped),
                Err(e) if inner.config.reconnect.max_attempts == 0 => Err(ProviderError::ReconnectExhausted {
                    attempts: 0,
                    last_error: e.to_string(),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "initial connection failed");
                    inner.transition(ProviderPhase::Reconnecting)?;
                    inner.retry_connect(e).await
                }
            };

            let events = match connected.and_then(|established| inner.after_connected(established)) {
                Ok(events) => events,
                Err(ProviderError::Stopped) => return Err(ProviderError::Stopped),
                Err(e) => {
                    inner.fail(&e);
                    return Err(e);
                }
            };

            tokio::spawn(Arc::clone(inner).supervise(events).instrument(inner.span.clone()));
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Stop heartbeats, drop the link, and tear the environment down
    ///
    /// Waiting callers are rejected with a connection error. Backend teardown
    /// runs under the cleanup budget; a failure or timeout is logged and the
    /// provider still ends `Closed`. Calling `close` again is a no-op.
    ///
    /// # Errors
    /// Returns `ProviderError::InvalidTransition` only if the phase table is
    /// violated, which indicates a bug
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shutdown.cancel();

        async move {
            let _lifecycle = inner.lifecycle.lock().await;
            match inner.current_phase() {
                ProviderPhase::Closed => return Ok(()),
                ProviderPhase::Idle => return inner.transition(ProviderPhase::Closed),
                _ => {}
            }

            inner.transition(ProviderPhase::TearingDown)?;
            inner.end_session("provider closed");

            let teardown = async {
                inner
                    .backend
                    .teardown_environment()
                    .await
                    .map_err(|e| ProviderError::Teardown(e.to_string()))
            };
            match within("cleanup", inner.config.timeouts.cleanup(), teardown).await {
                Ok(()) => tracing::debug!("environment torn down"),
                Err(e) => tracing::warn!(error = %e, "teardown did not complete cleanly"),
            }

            inner.transition(ProviderPhase::Closed)
        }
        .instrument(self.inner.span.clone())
        .await
    }

    /// Fire-and-forget message to the executor
    ///
    /// # Errors
    /// Returns `ProviderError::Connection` if no link is up
    pub fn send(&self, envelope: Envelope) -> Result<RequestId> {
        Ok(self.inner.transport()?.send(envelope)?)
    }

    /// Request/response call to the executor; see
    /// [`CorrelatedTransport::send_and_wait`]
    ///
    /// # Errors
    /// - `ProviderError::Connection` if no link is up
    /// - `ProviderError::Transport` for timeouts and dropped links
    pub async fn send_and_wait(
        &self,
        envelope: Envelope,
        accepted_types: &[&str],
        timeout: Option<Duration>,
    ) -> Result<Envelope> {
        let transport = self.inner.transport()?;
        Ok(transport.send_and_wait(envelope, accepted_types, timeout).await?)
    }

    /// Forward an agent start to the executor and mark the session active
    ///
    /// # Errors
    /// Returns `ProviderError::Connection` if no link is up
    pub fn handle_agent_start(&self, start: AgentStart) -> Result<RequestId> {
        let (agent_id, owner_id) = (start.agent_id.clone(), start.owner_id.clone());
        let request_id = self.send(Envelope::new(Message::AgentStart(start)))?;
        self.inner.on_agent_start(&agent_id, &owner_id);
        Ok(request_id)
    }

    /// Mark the agent session finished
    pub fn handle_agent_completed(&self, completed: &AgentCompleted) {
        self.inner.on_agent_completed(completed);
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.end_session("provider dropped");
    }
}

impl Inner {
    fn current_phase(&self) -> ProviderPhase {
        *self.phase.borrow()
    }

    fn transition(&self, to: ProviderPhase) -> Result<()> {
        let mut outcome = Ok(());
        self.phase.send_if_modified(|current| match validate_transition(*current, to) {
            Ok(()) => {
                tracing::info!(from = %current, %to, "phase transition");
                *current = to;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    /// Move `from -> to` only if the provider is currently in `from`
    fn transition_from(&self, from: ProviderPhase, to: ProviderPhase) -> bool {
        self.phase.send_if_modified(|current| {
            if *current == from && validate_transition(from, to).is_ok() {
                tracing::info!(%from, %to, "phase transition");
                *current = to;
                true
            } else {
                false
            }
        })
    }

    async fn cancellable<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(ProviderError::Stopped),
            result = work => result,
        }
    }

    fn transport(&self) -> Result<Arc<CorrelatedTransport>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.transport.clone())
            .ok_or_else(|| ProviderError::Connection("not connected".into()))
    }

    async fn set_up(&self, vars: &InitVars) -> Result<()> {
        let setup_error = |e: BackendError| ProviderError::Setup(e.to_string());
        let work = async {
            self.backend.setup_environment(vars).await.map_err(setup_error)?;
            let project = self.backend.resolve_project_context(vars).await.map_err(setup_error)?;
            let workspace = self.backend.resolve_workspace_path(vars).await.map_err(setup_error)?;
            Ok::<_, ProviderError>((project, workspace))
        };
        let (project, workspace) = self
            .cancellable(within("setup", self.config.timeouts.setup(), work))
            .await?;

        let root = SafePath::parse(&project.to_string_lossy())
            .map_err(|e| ProviderError::Setup(format!("project path: {e}")))?;
        self.dispatcher.write().operations_mut().set_project_root(root);

        tracing::info!(project = %project.display(), workspace = %workspace.display(), "environment ready");
        let mut state = self.state.lock();
        state.project_path = Some(project);
        state.workspace_path = Some(workspace);
        if let Some(environment) = state.environment.as_mut() {
            environment.touch();
        }
        Ok(())
    }

    /// Open one link and complete the registration handshake
    async fn connect_once(&self) -> Result<Established> {
        self.backend
            .ensure_agent_server()
            .await
            .map_err(|e| ProviderError::Connection(format!("agent server unavailable: {e}")))?;

        let connect = async { self.connector.connect().await.map_err(ProviderError::from) };
        let link = within("connection", self.config.timeouts.connection(), connect).await?;
        let (transport, events) = CorrelatedTransport::start(link);

        let register = {
            let state = self.state.lock();
            Register {
                role: ConnectionRole::Executor,
                environment_name: state
                    .environment
                    .as_ref()
                    .map(|env| env.name.clone())
                    .unwrap_or_default(),
                provider_kind: self.backend.kind(),
                owner_id: state.owner_id.clone(),
            }
        };

        let reply = match transport
            .send_and_wait(
                Envelope::new(Message::Register(register)),
                &["registered"],
                self.config.registration_timeout(),
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                transport.close("registration failed");
                return Err(e.into());
            }
        };

        match reply.message {
            Message::Registered(Registered { connection_id }) => {
                tracing::debug!(%connection_id, "registered with executor");
                Ok(Established {
                    transport,
                    events,
                    connection_id,
                })
            }
            other => {
                transport.close("unexpected registration reply");
                Err(ProviderError::Connection(format!(
                    "unexpected registration reply: {}",
                    other.kind()
                )))
            }
        }
    }

    /// Retry `connect_once` up to the configured bound; phase must be `Reconnecting`
    async fn retry_connect(&self, first_error: ProviderError) -> Result<Established> {
        let policy = &self.config.reconnect;
        let mut last_error = first_error.to_string();

        for attempt in 1..=policy.max_attempts {
            self.state.lock().reconnect_attempts = attempt;
            let delay = policy.delay_for(attempt);
            tracing::info!(attempt, max_attempts = policy.max_attempts, ?delay, "reconnecting");

            self.cancellable(async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;

            match self.cancellable(self.connect_once()).await {
                Ok(established) => return Ok(established),
                Err(ProviderError::Stopped) => return Err(ProviderError::Stopped),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(ProviderError::ReconnectExhausted {
            attempts: policy.max_attempts,
            last_error,
        })
    }

    /// Register the executor link, start its helpers, and enter `Connected`
    fn after_connected(&self, established: Established) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let Established {
            transport,
            events,
            connection_id,
        } = established;

        let metadata = {
            let state = self.state.lock();
            let mut metadata = ConnectionMetadata::new().with_remote_id(connection_id.clone());
            if let Some(env) = &state.environment {
                metadata = metadata.with_environment(&env.name, &env.provider_kind);
            }
            if let Some(owner) = &state.owner_id {
                metadata = metadata.with_owner(owner);
            }
            metadata
        };
        let (connection, outbound) = ClientConnection::open(ConnectionRole::Executor, metadata);
        let registry_id = match self.registry.register(connection) {
            Ok(id) => id,
            Err(e) => {
                transport.close("registry rejected connection");
                return Err(e.into());
            }
        };

        let token = self.shutdown.child_token();
        tokio::spawn(forward(outbound, transport.clone(), token.clone()).instrument(self.span.clone()));
        tokio::spawn(
            heartbeat::run(transport.clone(), self.config.heartbeat, token.clone()).instrument(self.span.clone()),
        );

        *self.session.lock() = Some(Session {
            transport,
            registry_id,
            token,
        });
        {
            let mut state = self.state.lock();
            state.connection_id = Some(connection_id);
            state.reconnect_attempts = 0;
        }
        self.transition(ProviderPhase::Connected)?;
        Ok(events)
    }

    /// Cancel helpers, deregister, and close the link; waiting callers are rejected
    fn end_session(&self, reason: &str) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.token.cancel();
        if let Err(e) = self.registry.deregister(&session.registry_id) {
            tracing::debug!(error = %e, "executor connection already gone");
        }
        session.transport.close(reason);
        self.state.lock().connection_id = None;
    }

    /// Enter `Failed` and tell the observing app connections
    fn fail(&self, error: &ProviderError) {
        tracing::error!(error = %error, "provider failed");
        let (environment_name, owner_id) = {
            let mut state = self.state.lock();
            state.last_error = Some(error.to_string());
            let name = state
                .environment
                .as_ref()
                .map(|env| env.name.clone())
                .unwrap_or_default();
            (name, state.owner_id.clone())
        };
        if let Err(e) = self.transition(ProviderPhase::Failed) {
            tracing::warn!(error = %e, "could not record failure");
        }

        let notice = Envelope::new(Message::ProviderFailed(ProviderFailed {
            environment_name,
            reason: error.to_string(),
        }))
        .with_id(MessageId::generate());
        for observer in self.relay.observers(owner_id.as_deref()) {
            if let Err(e) = observer.deliver(notice.clone()) {
                tracing::warn!(connection_id = %observer.id, error = %e, "failure notice not delivered");
            }
        }
    }

    fn on_agent_start(&self, agent_id: &str, owner_id: &str) {
        self.state.lock().owner_id = Some(owner_id.to_string());
        if self.transition_from(ProviderPhase::Connected, ProviderPhase::Active) {
            tracing::info!(agent_id, owner_id, "agent session started");
        }
    }

    fn on_agent_completed(&self, completed: &AgentCompleted) {
        if self.transition_from(ProviderPhase::Active, ProviderPhase::Connected) {
            tracing::info!(agent_id = %completed.agent_id, success = completed.success, "agent session ended");
        }
    }

    async fn supervise(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            let event = tokio::select! {
                () = self.shutdown.cancelled() => return,
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Message(envelope)) => self.handle_inbound(envelope),
                Some(TransportEvent::Closed { reason }) => match self.recover(&reason).await {
                    Some(next) => events = next,
                    None => return,
                },
                None => match self.recover("event stream ended").await {
                    Some(next) => events = next,
                    None => return,
                },
            }
        }
    }

    /// Reconnect after the link dropped; `None` ends supervision
    async fn recover(&self, reason: &str) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        let _lifecycle = tokio::select! {
            () = self.shutdown.cancelled() => return None,
            guard = self.lifecycle.lock() => guard,
        };
        if self.shutdown.is_cancelled() {
            return None;
        }

        tracing::warn!(%reason, "connection lost");
        self.end_session(reason);
        if let Err(e) = self.transition(ProviderPhase::Reconnecting) {
            tracing::warn!(error = %e, "not reconnecting");
            return None;
        }

        let result = self
            .retry_connect(ProviderError::Connection(reason.to_string()))
            .await
            .and_then(|established| self.after_connected(established));
        match result {
            Ok(events) => {
                tracing::info!("reconnected");
                Some(events)
            }
            Err(ProviderError::Stopped) => None,
            Err(e) => {
                self.fail(&e);
                None
            }
        }
    }

    fn handle_inbound(&self, envelope: Envelope) {
        let Ok(transport) = self.transport() else {
            tracing::debug!(kind = envelope.kind(), "dropping message received without a session");
            return;
        };

        match &envelope.message {
            Message::AgentStart(start) => self.on_agent_start(&start.agent_id, &start.owner_id),
            Message::AgentCompleted(completed) => self.on_agent_completed(completed),
            Message::Heartbeat(beat) => {
                let mut ack = Envelope::new(Message::HeartbeatAck(beat.clone()));
                ack.request_id = envelope.request_id.clone();
                if let Err(e) = transport.send(ack) {
                    tracing::debug!(error = %e, "heartbeat ack not sent");
                }
            }
            Message::GetDiffFiles => {
                let request_id = envelope.request_id.clone().unwrap_or_else(RequestId::generate);
                tokio::spawn(
                    reply_with_diff(self.backend.clone(), transport, request_id).instrument(self.span.clone()),
                );
            }
            message if OperationDispatcher::handles(message) => {
                let dispatcher = self.dispatcher.read().clone();
                let owner_id = self.state.lock().owner_id.clone();
                let span = tracing::debug_span!(parent: &self.span, "operation", kind = envelope.kind());
                tokio::spawn(
                    async move {
                        if let Some(reply) = dispatcher.dispatch(owner_id.as_deref(), &envelope).await {
                            if let Err(e) = transport.send(reply) {
                                tracing::warn!(error = %e, "operation response not sent");
                            }
                        }
                    }
                    .instrument(span),
                );
            }
            other => tracing::debug!(kind = other.kind(), "ignoring unsolicited message"),
        }
    }
}

async fn within<T>(phase: &'static str, budget: Duration, work: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            phase,
            timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Copy registry deliveries for the executor onto its link
async fn forward(
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    transport: Arc<CorrelatedTransport>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = token.cancelled() => break,
            next = outbound.recv() => next,
        };
        let Some(envelope) = next else { break };
        if let Err(e) = transport.send(envelope) {
            tracing::debug!(error = %e, "forwarding stopped");
            break;
        }
    }
}

async fn reply_with_diff(
    backend: Arc<dyn EnvironmentBackend>,
    transport: Arc<CorrelatedTransport>,
    request_id: RequestId,
) {
    let body = match backend.get_diff_files().await {
        Ok(diff) => DiffFilesResponse::from(diff),
        Err(e) => {
            tracing::warn!(error = %e, "diff hook failed");
            DiffFilesResponse {
                success: false,
                error: Some(e.to_string()),
                ..DiffFilesResponse::default()
            }
        }
    };
    let reply = Envelope::new(Message::GetDiffFilesResponse(body))
        .with_id(request_id.clone().into())
        .with_request_id(request_id);
    if let Err(e) = transport.send(reply) {
        tracing::warn!(error = %e, "diff response not sent");
    }
}
