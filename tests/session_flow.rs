mod common;

use std::sync::Arc;
use std::time::Duration;
use breachline::backend::ExploitBackend;
use breachline::catalog::{ServiceKey, StaticCatalogSource};
use breachline::errors::BreachlineError;
use breachline::events::ConsoleEvent;
use breachline::batch::BatchSettings;
use breachline::session::{ExploitSession, LogClass, LogEntry, LogSnapshot, SessionState};
use breachline::wizard::{ExploitWizard, WizardStep};
use common::*;
use tokio::sync::mpsc;

fn abc123_script() -> Script {
    Script {
        session_id: Some("abc123".to_string()),
        responses: vec![
            LogSnapshot::new(info_lines(1)),
            LogSnapshot::new(info_lines(2)),
        ],
        ..Default::default()
    }
}

fn session_for(backend: &Arc<ScriptedBackend>, port: u16) -> ExploitSession {
    let backend: Arc<dyn ExploitBackend> = backend.clone();
    ExploitSession::new(service("10.0.0.5", port), backend, session_settings())
}

async fn wizard_at_execute(backend: Arc<ScriptedBackend>, ports: &[u16]) -> ExploitWizard {
    let catalog: Vec<(&str, u16)> = ports.iter().map(|p| ("10.0.0.5", *p)).collect();
    let source = Arc::new(StaticCatalogSource::new(catalog_json(&catalog)));
    let mut settings = BatchSettings::default();
    settings.session = session_settings();
    let wizard = ExploitWizard::new(source, backend, settings);
    wizard.enter_review().await.unwrap();
    assert_eq!(wizard.navigate(WizardStep::Select).await, WizardStep::Select);
    wizard.select_all().await.unwrap();
    assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Execute);
    wizard
}

#[tokio::test(start_paused = true)]
async fn test_second_poll_appends_only_new_entry() {
    let backend = Arc::new(ScriptedBackend::new().script(ServiceKey::new("10.0.0.5", 21), abc123_script()));
    let session = session_for(&backend, 21);

    let id = session.launch().await.unwrap();
    assert_eq!(id.as_str(), "abc123");

    settle(0).await;
    assert_eq!(buffer_texts(&session).await, vec!["L1"]);
    assert_eq!(session.cursor_position().await, 1);

    settle(1).await;
    assert_eq!(buffer_texts(&session).await, vec!["L1", "L2"]);
    assert_eq!(session.cursor_position().await, 2);

    // Identical responses afterwards change nothing
    settle(3).await;
    assert_eq!(buffer_texts(&session).await, vec!["L1", "L2"]);
    assert_eq!(session.cursor_position().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shorter_response_never_duplicates_or_rewinds() {
    let key = ServiceKey::new("10.0.0.5", 21);
    let backend = Arc::new(ScriptedBackend::new().script(key, Script {
        responses: vec![
            LogSnapshot::new(info_lines(3)),
            LogSnapshot::new(info_lines(2)),
            LogSnapshot::new(info_lines(4)),
        ],
        ..Default::default()
    }));
    let session = session_for(&backend, 21);
    session.launch().await.unwrap();

    let mut last_cursor = 0;
    for _ in 0..4 {
        settle(1).await;
        let cursor = session.cursor_position().await;
        assert!(cursor >= last_cursor, "cursor moved backwards: {} -> {}", last_cursor, cursor);
        last_cursor = cursor;
    }
    assert_eq!(buffer_texts(&session).await, vec!["L1", "L2", "L3", "L4"]);
}

#[tokio::test(start_paused = true)]
async fn test_whoami_is_echoed_before_dispatch() {
    let backend = Arc::new(ScriptedBackend::new().script(ServiceKey::new("10.0.0.5", 21), abc123_script()));
    let session = session_for(&backend, 21);
    session.launch().await.unwrap();
    settle(0).await;

    session.send_command("whoami").await.unwrap();

    let buffer = session.log_buffer().await;
    let last = buffer.last().unwrap();
    assert_eq!(last.text, "> whoami");
    assert!(last.is_echo());
    assert_eq!(session.command_history().await, vec!["whoami".to_string()]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.commands(), vec![("abc123".to_string(), "whoami".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_command_rejected_unless_running() {
    let backend = Arc::new(ScriptedBackend::new());
    let session = session_for(&backend, 21);
    let err = session.send_command("id").await.unwrap_err();
    assert!(matches!(err, BreachlineError::CommandRejected(_)));
    assert!(session.log_buffer().await.is_empty());
    assert!(backend.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completion_signal_finishes_session_and_stops_polling() {
    let backend = Arc::new(ScriptedBackend::new().script(ServiceKey::new("10.0.0.5", 21), Script::completing(2)));
    let session = session_for(&backend, 21);
    session.launch().await.unwrap();

    let state = tokio::time::timeout(Duration::from_secs(10), session.wait_terminal()).await.unwrap();
    assert_eq!(state, SessionState::Completed);
    let flags = session.flags().await;
    assert!(flags.root_access);
    assert!(!flags.shell_opened);

    let polls = backend.log_calls_for("sess-21");
    settle(10).await;
    assert_eq!(backend.log_calls_for("sess-21"), polls);
    assert!(!session.is_polling().await);
}

#[tokio::test(start_paused = true)]
async fn test_no_calls_for_stopped_session() {
    let backend = Arc::new(ScriptedBackend::new().script(
        ServiceKey::new("10.0.0.5", 21),
        Script::endless(&["waiting for callback"]),
    ));
    let session = session_for(&backend, 21);
    session.launch().await.unwrap();
    settle(2).await;

    session.stop().await.unwrap();
    assert_eq!(session.state().await, SessionState::Stopped);
    let calls = backend.calls_for("sess-21");

    settle(20).await;
    assert_eq!(backend.calls_for("sess-21"), calls);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_launch_stops_orphan() {
    let backend = Arc::new(ScriptedBackend::new().script(ServiceKey::new("10.0.0.5", 21), Script {
        start_delay: Duration::from_secs(1),
        ..Script::endless(&["never shown"])
    }));
    let session = session_for(&backend, 21);

    let launching = session.clone();
    let launch = tokio::spawn(async move { launching.launch().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state().await, SessionState::Launching);

    session.stop().await.unwrap();
    assert_eq!(session.state().await, SessionState::Stopped);

    let result = launch.await.unwrap();
    assert!(matches!(result, Err(BreachlineError::InvalidTransition(_))));

    settle(4).await;
    assert!(backend.calls().contains(&Call::Stop(breachline::session::SessionId::new("sess-21"))));
    assert_eq!(backend.log_calls_for("sess-21"), 0);
    assert!(session.log_buffer().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_switching_focus_isolates_sessions() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .script(ServiceKey::new("10.0.0.5", 21), Script {
                logs_delay: Duration::from_secs(1),
                ..Script::endless(&["A1"])
            })
            .script(ServiceKey::new("10.0.0.5", 22), Script::endless(&["B1"])),
    );
    let wizard = wizard_at_execute(backend.clone(), &[21, 22]).await;

    let a = wizard.focus(&ServiceKey::new("10.0.0.5", 21)).await.unwrap();
    wizard.launch().await.unwrap();
    // A's first poll is now in flight
    tokio::time::sleep(Duration::from_millis(100)).await;

    let b = wizard.focus(&ServiceKey::new("10.0.0.5", 22)).await.unwrap();
    assert_eq!(a.state().await, SessionState::Ready);
    assert!(a.session_id().await.is_none());
    let a_calls = backend.calls_for("sess-21");

    wizard.launch().await.unwrap();
    settle(6).await;

    assert_eq!(buffer_texts(&b).await, vec!["B1"]);
    assert!(a.log_buffer().await.is_empty());
    assert_eq!(backend.calls_for("sess-21"), a_calls);
    assert_eq!(wizard.focused().await.unwrap().key(), ServiceKey::new("10.0.0.5", 22));
}

#[tokio::test(start_paused = true)]
async fn test_leaving_execute_tears_down_session() {
    let backend = Arc::new(ScriptedBackend::new().script(
        ServiceKey::new("10.0.0.5", 21),
        Script::endless(&["running"]),
    ));
    let wizard = wizard_at_execute(backend.clone(), &[21]).await;
    let session = wizard.focus(&ServiceKey::new("10.0.0.5", 21)).await.unwrap();
    wizard.launch().await.unwrap();
    settle(1).await;

    assert_eq!(wizard.navigate(WizardStep::Select).await, WizardStep::Select);
    assert_eq!(session.state().await, SessionState::Ready);
    assert!(session.log_buffer().await.is_empty());
    assert!(wizard.focused().await.is_none());

    let calls = backend.calls_for("sess-21");
    settle(10).await;
    assert_eq!(backend.calls_for("sess-21"), calls);
}

#[tokio::test]
async fn test_step_gating() {
    let source = Arc::new(StaticCatalogSource::empty());
    let backend: Arc<dyn ExploitBackend> = Arc::new(ScriptedBackend::new());
    let wizard = ExploitWizard::new(source.clone(), backend, BatchSettings::default());

    let err = wizard.enter_review().await.unwrap_err();
    assert!(matches!(err, BreachlineError::CatalogUnavailable(_)));
    assert_eq!(wizard.navigate(WizardStep::Select).await, WizardStep::Review);
    assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Review);

    source.replace(catalog_json(&[("10.0.0.5", 21), ("10.0.0.6", 80)])).await;
    assert_eq!(wizard.reload_catalog().await.unwrap(), 2);
    // Catalog alone is not enough for step 3
    assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Review);
    assert_eq!(wizard.navigate(WizardStep::Select).await, WizardStep::Select);
    assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Select);

    wizard.select(&ServiceKey::new("10.0.0.6", 80)).await.unwrap();
    assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Execute);
    assert!(matches!(
        wizard.select(&ServiceKey::new("10.0.0.5", 21)).await,
        Err(BreachlineError::InvalidTransition(_))
    ));

    // Re-entering review starts over
    assert_eq!(wizard.navigate(WizardStep::Review).await, WizardStep::Review);
    assert!(wizard.selection().await.is_empty());
    assert_eq!(wizard.catalog().await.map(|c| c.len()), Some(2));
}

#[tokio::test]
async fn test_malformed_catalog_is_distinguished_from_missing() {
    let source = Arc::new(StaticCatalogSource::new(serde_json::json!("not a catalog")));
    let backend: Arc<dyn ExploitBackend> = Arc::new(ScriptedBackend::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let wizard = ExploitWizard::new(source, backend, BatchSettings::default()).with_event_channel(tx);

    let err = wizard.enter_review().await.unwrap_err();
    assert!(matches!(err, BreachlineError::CatalogMalformed(_)));

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if let ConsoleEvent::CatalogFailed { unavailable, .. } = event {
            assert!(!unavailable);
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test(start_paused = true)]
async fn test_error_entry_fails_session() {
    let backend = Arc::new(ScriptedBackend::new().script(ServiceKey::new("10.0.0.5", 21), Script {
        responses: vec![LogSnapshot::new(vec![
            LogEntry::new(0, LogClass::Info, "Sending payload"),
            LogEntry::new(1, LogClass::Error, "[-] Exploit failed: connection reset"),
        ])],
        ..Default::default()
    }));
    let session = session_for(&backend, 21);
    session.launch().await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), session.wait_terminal()).await.unwrap();
    assert_eq!(state, SessionState::Failed);
    assert_eq!(session.log_buffer().await.len(), 2);
}
