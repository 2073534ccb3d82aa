use std::sync::Arc;
use crate::errors::BreachlineError;
use crate::events::ConsoleEvent;
use super::log::LogLine;
use super::manager::ExploitSession;
use super::state::SessionState;
use tracing::{debug, warn};

impl ExploitSession {
    /// Send an interactive command into the running session.
    ///
    /// The trimmed text is echoed into the buffer as `> text` and recorded in
    /// the history before dispatch. Dispatch is fire-and-forget; the backend's
    /// answer arrives through the log stream. Empty input and sessions that are
    /// not `Running` are rejected without any network call.
    pub async fn send_command(&self, text: &str) -> Result<(), BreachlineError> {
        let command = text.trim();
        if command.is_empty() {
            debug!("Ignoring empty command");
            return Err(BreachlineError::CommandRejected("command is empty".into()));
        }

        let (session_id, line) = {
            let mut inner = self.shared.inner.write().await;
            if inner.state != SessionState::Running {
                return Err(BreachlineError::CommandRejected(format!(
                    "session is {}, commands need a running session",
                    inner.state
                )));
            }
            let session_id = inner.session_id.clone()
                .ok_or_else(|| BreachlineError::CommandRejected("no active session".into()))?;
            let line = LogLine::echo(command);
            inner.buffer.push(line.clone());
            inner.history.push(command.to_string());
            (session_id, line)
        };

        self.shared.emit(ConsoleEvent::LogAppended { service: self.key(), line });

        let backend = Arc::clone(&self.shared.backend);
        let command = command.to_string();
        tokio::spawn(async move {
            if let Err(e) = backend.send_command(&session_id, &command).await {
                warn!(session_id = %session_id, command = %command, error = %e, "Command dispatch failed");
            }
        });
        Ok(())
    }

    /// Whether the command input should be enabled.
    pub async fn accepts_commands(&self) -> bool {
        self.state().await == SessionState::Running
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::backend::ExploitBackend;
    use crate::catalog::{Service, Severity};
    use crate::session::{LineSource, LogClass, LogSnapshot, SessionId, SessionSettings};
    use super::*;

    #[derive(Default)]
    struct RecordingBackend {
        commands: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ExploitBackend for RecordingBackend {
        async fn start(&self, _service: &Service) -> Result<SessionId, BreachlineError> {
            Ok(SessionId::new("abc123"))
        }

        async fn stop(&self, _session_id: &SessionId) -> Result<(), BreachlineError> {
            Ok(())
        }

        async fn get_logs(&self, _session_id: &SessionId) -> Result<LogSnapshot, BreachlineError> {
            Ok(LogSnapshot::default())
        }

        async fn send_command(&self, session_id: &SessionId, command: &str) -> Result<(), BreachlineError> {
            self.commands.lock().unwrap().push((session_id.to_string(), command.to_string()));
            Ok(())
        }

        fn backend_name(&self) -> &str { "recording" }
    }

    fn session(backend: Arc<RecordingBackend>) -> ExploitSession {
        let service = Service {
            address: "192.168.1.20".to_string(),
            port: 22,
            service_name: "ssh".to_string(),
            version: None,
            known_vulnerabilities: vec![],
            severity: Severity::Medium,
            cvss_score: None,
            description: None,
        };
        ExploitSession::new(service, backend, SessionSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_echoed_and_dispatched() {
        let backend = Arc::new(RecordingBackend::default());
        let session = session(backend.clone());
        session.launch().await.unwrap();

        session.send_command("  whoami ").await.unwrap();
        let buffer = session.log_buffer().await;
        let last = buffer.last().unwrap();
        assert_eq!(last.text, "> whoami");
        assert_eq!(last.class, LogClass::Info);
        assert_eq!(last.source, LineSource::Echo);
        assert_eq!(session.command_history().await, vec!["whoami"]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = backend.commands.lock().unwrap().clone();
        assert_eq!(sent, vec![("abc123".to_string(), "whoami".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_command_rejected_without_network() {
        let backend = Arc::new(RecordingBackend::default());
        let session = session(backend.clone());
        session.launch().await.unwrap();

        let err = session.send_command("   ").await.unwrap_err();
        assert!(matches!(err, BreachlineError::CommandRejected(_)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(backend.commands.lock().unwrap().is_empty());
        assert!(session.log_buffer().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_rejected_unless_running() {
        let backend = Arc::new(RecordingBackend::default());
        let session = session(backend.clone());
        assert!(!session.accepts_commands().await);

        let err = session.send_command("id").await.unwrap_err();
        assert!(matches!(err, BreachlineError::CommandRejected(_)));
        assert!(session.command_history().await.is_empty());
    }
}
