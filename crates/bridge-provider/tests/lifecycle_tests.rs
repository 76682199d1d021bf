//! Provider lifecycle against a scripted in-memory executor

use bridge_protocol::{
    AgentCompleted, AgentStart, ConnectionId, ConnectionRole, CreateFileRequest, DiffFile,
    DiffFiles, Envelope, Message, WriteToFileRequest,
};
use bridge_provider::{
    InitVars, PhaseTimeouts, Provider, ProviderError, ProviderPhase, ReconnectConfig,
};
use bridge_registry::ConnectionRegistry;
use bridge_test_utils::{test_config, BackendCall, Harness, RecordingBackend};
use bridge_transport::TransportError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const OWNER: &str = "user-1";

fn vars() -> InitVars {
    InitVars::new("env-1").with_owner(OWNER)
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn phase_is(provider: &Provider, phase: ProviderPhase) -> impl FnMut() -> bool + '_ {
    move || provider.phase() == phase
}

#[tokio::test]
async fn drop_before_registration_retries_to_the_bound_then_fails() -> anyhow::Result<()> {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj"));
    let mut h = Harness::new(backend.clone(), test_config());
    let mut observer = h.observe(OWNER);

    let executor = &mut h.executor;
    let (started, ()) = tokio::join!(h.provider.on_provider_start(vars()), async {
        // Initial attempt plus three retries; each link hangs up on `register`.
        for _ in 0..4 {
            let mut remote = executor.accept().await;
            let register = remote.recv().await;
            assert!(matches!(register.map(|e| e.message), Some(Message::Register(_))));
            remote.close();
        }
    });

    let err = started.unwrap_err();
    assert!(
        matches!(err, ProviderError::ReconnectExhausted { attempts: 3, .. }),
        "{err}"
    );
    assert_eq!(h.provider.phase(), ProviderPhase::Failed);
    assert_eq!(h.provider.state().reconnect_attempts, 3);
    assert_eq!(h.connector.attempts(), 4);
    assert_eq!(backend.count(&BackendCall::EnsureAgentServer), 4);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.connector.attempts(), 4, "no attempts after giving up");

    let notice = observer.try_recv()?;
    let Message::ProviderFailed(failed) = notice.message else {
        panic!("expected providerFailed, got {}", notice.kind());
    };
    assert_eq!(failed.environment_name, "env-1");

    h.provider.close().await?;
    assert_eq!(h.provider.phase(), ProviderPhase::Closed);
    Ok(())
}

#[tokio::test]
async fn setup_failure_never_connects() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj").failing_setup("no such image"));
    let h = Harness::new(backend.clone(), test_config());
    let mut observer = h.observe(OWNER);

    let err = h.provider.on_provider_start(vars()).await.unwrap_err();

    assert!(matches!(err, ProviderError::Setup(_)));
    assert_eq!(h.provider.phase(), ProviderPhase::Failed);
    assert_eq!(h.connector.attempts(), 0);
    assert_eq!(backend.calls(), vec![BackendCall::Setup("env-1".into())]);
    assert_eq!(observer.try_recv().unwrap().kind(), "providerFailed");
}

#[tokio::test]
async fn refused_connections_exhaust_retries() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj"));
    let config = test_config().with_reconnect(ReconnectConfig::fixed(2, 5));
    let h = Harness::new(backend, config);
    h.connector.refuse_all(true);

    let err = h.provider.on_provider_start(vars()).await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(h.connector.attempts(), 3);
    assert_eq!(h.provider.phase(), ProviderPhase::Failed);
}

#[tokio::test]
async fn close_is_idempotent_and_survives_teardown_failure() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj").failing_teardown("busy"));
    let mut h = Harness::new(backend.clone(), test_config());

    let (started, _link) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();
    assert_eq!(h.executor_entries("conn-1"), 1);

    h.provider.close().await.unwrap();
    h.provider.close().await.unwrap();

    assert_eq!(h.provider.phase(), ProviderPhase::Closed);
    assert_eq!(backend.count(&BackendCall::Teardown), 1);
    assert_eq!(h.executor_entries("conn-1"), 0);
}

#[tokio::test]
async fn providers_sharing_a_registry_keep_separate_entries() {
    let registry = ConnectionRegistry::init(16);
    let mut a = Harness::with_registry(
        Arc::new(RecordingBackend::new("/tmp/a")),
        test_config(),
        registry.clone(),
    );
    let mut b = Harness::with_registry(
        Arc::new(RecordingBackend::new("/tmp/b")),
        test_config(),
        registry.clone(),
    );

    // Both executors hand out the same id.
    let (started_a, _link_a) = tokio::join!(
        a.provider.on_provider_start(InitVars::new("env-a")),
        a.executor.accept_and_register("1")
    );
    started_a.unwrap();
    let (started_b, _link_b) = tokio::join!(
        b.provider.on_provider_start(InitVars::new("env-b")),
        b.executor.accept_and_register("1")
    );
    started_b.unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(a.executor_entries("1"), 2);

    a.provider.close().await.unwrap();

    assert_eq!(b.provider.phase(), ProviderPhase::Connected);
    let remaining = registry.find_by_role(ConnectionRole::Executor);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].metadata.environment_name.as_deref(), Some("env-b"));

    b.provider.close().await.unwrap();
    assert_eq!(registry.len(), 0);
}

#[tokio::test]
async fn slow_teardown_is_bounded() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj").slow_teardown(Duration::from_secs(30)));
    let config = test_config().with_timeouts(PhaseTimeouts {
        setup_ms: 1_000,
        connection_ms: 1_000,
        cleanup_ms: 50,
    });
    let mut h = Harness::new(backend, config);

    let (started, _link) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    tokio::time::timeout(Duration::from_secs(5), h.provider.close())
        .await
        .expect("close must not wait for the backend")
        .unwrap();
    assert_eq!(h.provider.phase(), ProviderPhase::Closed);
}

#[tokio::test]
async fn close_rejects_waiting_callers() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj"));
    let mut h = Harness::new(backend, test_config());

    let (started, mut link) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    let provider = &h.provider;
    let waiting = provider.send_and_wait(
        Envelope::new(Message::GetDiffFiles),
        &["neverSent"],
        None,
    );
    let closing = async {
        // The request reaching the executor means it is pending.
        let seen = link.recv().await.unwrap();
        assert_eq!(seen.kind(), "getDiffFiles");
        provider.close().await
    };
    let (waited, closed) = tokio::join!(waiting, closing);

    closed.unwrap();
    assert!(
        matches!(waited, Err(ProviderError::Transport(TransportError::Connection(_)))),
        "{waited:?}"
    );
    assert!(matches!(
        h.provider.send(Envelope::new(Message::GetDiffFiles)),
        Err(ProviderError::Connection(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn missed_heartbeats_trigger_reconnect() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj"));
    let mut h = Harness::new(backend, test_config());

    let (started, silent) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    // `silent` never acks; two misses close the link and a new one is opened.
    let _link = h.executor.accept_and_register("conn-2").await;
    wait_until("second registration", || {
        h.provider.state().connection_id == Some(ConnectionId::from("conn-2"))
    })
    .await;

    assert_eq!(h.provider.phase(), ProviderPhase::Connected);
    assert_eq!(h.provider.state().reconnect_attempts, 0);
    assert_eq!(h.executor_entries("conn-1"), 0);
    assert_eq!(h.executor_entries("conn-2"), 1);
    drop(silent);

    h.provider.close().await.unwrap();
}

#[tokio::test]
async fn peer_drop_reconnects_and_exhaustion_notifies() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj"));
    let config = test_config().with_reconnect(ReconnectConfig::fixed(1, 5));
    let mut h = Harness::new(backend, config);
    let mut observer = h.observe(OWNER);

    let (started, mut first) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    first.remote.close();
    let mut second = h.executor.accept_and_register("conn-2").await;
    wait_until("reconnected", phase_is(&h.provider, ProviderPhase::Connected)).await;
    wait_until("second registration", || {
        h.provider.state().connection_id == Some(ConnectionId::from("conn-2"))
    })
    .await;

    h.connector.refuse_all(true);
    second.remote.close();
    wait_until("failure", phase_is(&h.provider, ProviderPhase::Failed)).await;

    assert_eq!(h.connector.attempts(), 3);
    let notice = observer.recv().await.unwrap();
    assert_eq!(notice.kind(), "providerFailed");
    assert!(h.provider.state().last_error.unwrap().contains("gave up"));

    h.provider.close().await.unwrap();
    assert_eq!(h.provider.phase(), ProviderPhase::Closed);
}

#[tokio::test]
async fn agent_sessions_toggle_active() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj"));
    let mut h = Harness::new(backend, test_config());

    let (started, mut link) = tokio::join!(
        h.provider.on_provider_start(InitVars::new("env-1")),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();
    assert_eq!(link.register.environment_name, "env-1");
    assert_eq!(link.register.provider_kind, "recording");

    h.provider
        .handle_agent_start(AgentStart {
            agent_id: "agent-1".into(),
            owner_id: OWNER.into(),
            task: Some("fix the build".into()),
            payload: None,
        })
        .unwrap();
    assert_eq!(h.provider.phase(), ProviderPhase::Active);
    assert_eq!(h.provider.state().owner_id.as_deref(), Some(OWNER));
    assert_eq!(link.recv().await.unwrap().kind(), "agentStart");

    link.send(&Envelope::new(Message::AgentCompleted(AgentCompleted {
        agent_id: "agent-1".into(),
        success: true,
        message: None,
    })));
    wait_until("session end", phase_is(&h.provider, ProviderPhase::Connected)).await;

    h.provider.close().await.unwrap();
}

#[tokio::test]
async fn file_operations_round_trip_with_notifications() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let backend = Arc::new(RecordingBackend::new(root.clone()));
    let mut h = Harness::new(backend, test_config());
    let mut observer = h.observe(OWNER);

    let (started, mut link) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    let file_path = root.join("a.txt").to_string_lossy().into_owned();
    let reply = link
        .request(
            "op-1",
            Message::CreateFile(CreateFileRequest {
                file_name: "a.txt".into(),
                file_path: file_path.clone(),
                source: "hi".into(),
            }),
        )
        .await;
    assert_eq!(reply.kind(), "createFileResponse");
    let (_, body) = reply.message.as_operation_response().unwrap();
    assert!(body.success);
    assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "hi");

    let reply = link
        .request(
            "op-2",
            Message::WriteToFile(WriteToFileRequest {
                rel_path: "src/lib.rs".into(),
                new_content: "pub fn f() {}".into(),
            }),
        )
        .await;
    assert!(reply.message.as_operation_response().unwrap().1.success);
    assert!(root.join("src/lib.rs").exists());

    let mut actions = Vec::new();
    while let Ok(envelope) = observer.try_recv() {
        if let Message::FsNotify(note) = envelope.message {
            actions.push(note.action.to_string());
        }
    }
    assert_eq!(
        actions,
        vec!["createFileRequest", "createFileResult", "writeToFileRequest", "writeToFileResult"]
    );

    h.provider.close().await.unwrap();
}

#[tokio::test]
async fn diff_requests_use_the_backend_hook() {
    let diff = DiffFiles {
        files: vec![DiffFile {
            path: "src/main.rs".into(),
            status: "modified".into(),
            diff: None,
        }],
        has_changes: true,
    };
    let backend = Arc::new(RecordingBackend::new("/tmp/proj").with_diff(diff.clone()));
    let mut h = Harness::new(backend.clone(), test_config());

    let (started, mut link) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    let reply = link.request("diff-1", Message::GetDiffFiles).await;
    let Message::GetDiffFilesResponse(body) = reply.message else {
        panic!("expected getDiffFilesResponse");
    };
    assert!(body.success);
    assert_eq!(body.files, diff.files);
    assert_eq!(backend.count(&BackendCall::GetDiffFiles), 1);

    h.provider.close().await.unwrap();
}

#[tokio::test]
async fn failing_diff_hook_becomes_error_response() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj").failing_diff("git not found"));
    let mut h = Harness::new(backend, test_config());

    let (started, mut link) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    let reply = link.request("diff-1", Message::GetDiffFiles).await;
    let Message::GetDiffFilesResponse(body) = reply.message else {
        panic!("expected getDiffFilesResponse");
    };
    assert!(!body.success);
    assert_eq!(body.error.as_deref(), Some("git not found"));

    h.provider.close().await.unwrap();
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let backend = Arc::new(RecordingBackend::new("/tmp/proj"));
    let mut h = Harness::new(backend, test_config());

    let (started, _link) = tokio::join!(
        h.provider.on_provider_start(vars()),
        h.executor.accept_and_register("conn-1")
    );
    started.unwrap();

    let err = h.provider.on_provider_start(vars()).await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::InvalidTransition {
            from: ProviderPhase::Connected,
            to: ProviderPhase::SettingUp
        }
    ));

    h.provider.close().await.unwrap();
}
