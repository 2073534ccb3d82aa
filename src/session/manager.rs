use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use crate::backend::ExploitBackend;
use crate::catalog::{Service, ServiceKey};
use crate::config::BreachlineConfig;
use crate::config::types::{DEFAULT_MAX_POLL_FAILURES, DEFAULT_POLL_INTERVAL_MS};
use crate::errors::BreachlineError;
use crate::events::ConsoleEvent;
use super::log::{LogCursor, LogLine, LogSnapshot, RemoteStatus};
use super::poller::{self, PollerHandle, PollVerdict};
use super::signals::{outcome_flags, terminal_signal};
use super::state::{SessionFlags, SessionId, SessionState};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    /// Failed polls in a row before a `PollDegraded` event is raised
    pub max_consecutive_failures: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_consecutive_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &BreachlineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_consecutive_failures: config.max_poll_failures(),
        }
    }
}

/// Point-in-time copy of a session for the presentation layer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub service: ServiceKey,
    pub session_id: Option<SessionId>,
    pub state: SessionState,
    pub log_buffer: Vec<LogLine>,
    pub command_history: Vec<String>,
    pub flags: SessionFlags,
    pub cursor: usize,
    pub last_error: Option<String>,
}

pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    pub(crate) session_id: Option<SessionId>,
    pub(crate) cursor: LogCursor,
    pub(crate) buffer: Vec<LogLine>,
    pub(crate) history: Vec<String>,
    pub(crate) flags: SessionFlags,
    pub(crate) last_error: Option<String>,
    /// Bumped on every launch, local stop and teardown; stale async results compare against it
    pub(crate) generation: u64,
    poller: Option<PollerHandle>,
    consecutive_failures: u32,
    degraded_reported: bool,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Ready,
            session_id: None,
            cursor: LogCursor::default(),
            buffer: Vec::new(),
            history: Vec::new(),
            flags: SessionFlags::default(),
            last_error: None,
            generation: 0,
            poller: None,
            consecutive_failures: 0,
            degraded_reported: false,
        }
    }

    /// Forget everything tied to the previous attempt. Dropping the poller handle cancels it.
    fn clear(&mut self) {
        self.poller = None;
        self.generation += 1;
        self.session_id = None;
        self.cursor.reset();
        self.buffer.clear();
        self.history.clear();
        self.flags = SessionFlags::default();
        self.last_error = None;
        self.consecutive_failures = 0;
        self.degraded_reported = false;
    }

    /// True while results for `(session_id, generation)` may still be applied.
    fn is_current(&self, session_id: &SessionId, generation: u64) -> bool {
        self.generation == generation
            && self.state == SessionState::Running
            && self.session_id.as_ref() == Some(session_id)
    }
}

pub(crate) struct SessionShared {
    pub(crate) service: Service,
    pub(crate) backend: Arc<dyn ExploitBackend>,
    settings: SessionSettings,
    pub(crate) inner: RwLock<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    event_tx: Option<mpsc::UnboundedSender<ConsoleEvent>>,
}

impl SessionShared {
    pub(crate) fn emit(&self, event: ConsoleEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn publish_state(&self, state: SessionState, session_id: Option<SessionId>, error: Option<String>) {
        self.state_tx.send_replace(state);
        self.emit(ConsoleEvent::SessionStateChanged {
            service: self.service.key(),
            session_id,
            state,
            error,
        });
    }

    /// Fold one cumulative log response into the session.
    ///
    /// Only the tail past the cursor is appended. Responses addressed to a
    /// superseded session id or generation are dropped untouched.
    pub(crate) async fn apply_snapshot(
        &self,
        session_id: &SessionId,
        generation: u64,
        snapshot: LogSnapshot,
    ) -> PollVerdict {
        let mut inner = self.inner.write().await;
        if !inner.is_current(session_id, generation) {
            debug!(session_id = %session_id, "Discarding log response for superseded session");
            return PollVerdict::Finished;
        }

        inner.consecutive_failures = 0;
        inner.degraded_reported = false;

        let mut terminal = snapshot.status.filter(|s| *s != RemoteStatus::Running);
        let mut appended = Vec::new();
        let delta = inner.cursor.advance(&snapshot.entries);
        for (sequence_index, entry) in delta.indexed() {
            inner.flags.merge(outcome_flags(entry));
            if terminal.is_none() {
                terminal = terminal_signal(entry);
            }
            appended.push(LogLine::from_backend(sequence_index, entry));
        }
        inner.buffer.extend(appended.iter().cloned());

        let next = terminal.map(|status| match status {
            RemoteStatus::Failed => SessionState::Failed,
            _ => SessionState::Completed,
        });
        if let Some(state) = next {
            inner.state = state;
            inner.poller = None;
        }
        let flags = inner.flags;
        drop(inner);

        let key = self.service.key();
        for line in appended {
            self.emit(ConsoleEvent::LogAppended { service: key.clone(), line });
        }

        match next {
            Some(state) => {
                info!(
                    service = %key,
                    session_id = %session_id,
                    state = %state,
                    root_access = flags.root_access,
                    shell_opened = flags.shell_opened,
                    "Exploitation session finished"
                );
                self.publish_state(state, Some(session_id.clone()), None);
                PollVerdict::Finished
            }
            None => PollVerdict::Continue,
        }
    }

    /// Count a failed poll. Polling carries on; the cursor is untouched.
    pub(crate) async fn record_poll_failure(
        &self,
        session_id: &SessionId,
        generation: u64,
        error: &BreachlineError,
    ) -> PollVerdict {
        let mut inner = self.inner.write().await;
        if !inner.is_current(session_id, generation) {
            return PollVerdict::Finished;
        }
        inner.consecutive_failures += 1;
        let failures = inner.consecutive_failures;
        debug!(session_id = %session_id, failures, error = %error, "Log poll failed, retrying next tick");

        if failures >= self.settings.max_consecutive_failures && !inner.degraded_reported {
            inner.degraded_reported = true;
            drop(inner);
            warn!(session_id = %session_id, failures, "Log polling degraded");
            self.emit(ConsoleEvent::PollDegraded {
                service: self.service.key(),
                session_id: session_id.clone(),
                consecutive_failures: failures,
                error: error.to_string(),
            });
        }
        PollVerdict::Continue
    }
}

/// One exploitation attempt against a single service.
///
/// Cloning yields another handle to the same session. When the last handle
/// is dropped the log poller is cancelled.
#[derive(Clone)]
pub struct ExploitSession {
    pub(crate) shared: Arc<SessionShared>,
}

impl std::fmt::Debug for ExploitSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExploitSession")
            .field("service", &self.shared.service)
            .finish_non_exhaustive()
    }
}

impl ExploitSession {
    pub fn new(service: Service, backend: Arc<dyn ExploitBackend>, settings: SessionSettings) -> Self {
        Self::build(service, backend, settings, None)
    }

    /// Create a session that streams its transitions and log lines to `tx`.
    pub fn with_event_channel(
        service: Service,
        backend: Arc<dyn ExploitBackend>,
        settings: SessionSettings,
        tx: mpsc::UnboundedSender<ConsoleEvent>,
    ) -> Self {
        Self::build(service, backend, settings, Some(tx))
    }

    fn build(
        service: Service,
        backend: Arc<dyn ExploitBackend>,
        settings: SessionSettings,
        event_tx: Option<mpsc::UnboundedSender<ConsoleEvent>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Ready);
        Self {
            shared: Arc::new(SessionShared {
                service,
                backend,
                settings,
                inner: RwLock::new(SessionInner::new()),
                state_tx,
                event_tx,
            }),
        }
    }

    pub fn service(&self) -> &Service {
        &self.shared.service
    }

    pub fn key(&self) -> ServiceKey {
        self.shared.service.key()
    }

    /// Start an attempt on the backend.
    ///
    /// Allowed from `Ready` and from any terminal state; a terminal session
    /// is reset first. On failure the session returns to `Ready` with the
    /// error recorded so the operator can retry.
    pub async fn launch(&self) -> Result<SessionId, BreachlineError> {
        let generation = {
            let mut inner = self.shared.inner.write().await;
            if matches!(inner.state, SessionState::Launching | SessionState::Running) {
                return Err(BreachlineError::InvalidTransition(format!(
                    "cannot launch while session is {}",
                    inner.state
                )));
            }
            inner.clear();
            inner.state = SessionState::Launching;
            inner.generation
        };
        self.shared.publish_state(SessionState::Launching, None, None);
        info!(service = %self.key(), backend = self.shared.backend.backend_name(), "Launching exploitation session");

        let result = self.shared.backend.start(&self.shared.service).await;

        let mut inner = self.shared.inner.write().await;
        if inner.generation != generation || inner.state != SessionState::Launching {
            drop(inner);
            if let Ok(orphan) = result {
                debug!(session_id = %orphan, "Launch superseded, stopping orphaned backend session");
                let backend = Arc::clone(&self.shared.backend);
                tokio::spawn(async move {
                    if let Err(e) = backend.stop(&orphan).await {
                        debug!(session_id = %orphan, error = %e, "Best-effort stop of orphaned session failed");
                    }
                });
            }
            return Err(BreachlineError::InvalidTransition("launch was superseded".into()));
        }

        match result {
            Ok(session_id) => {
                inner.session_id = Some(session_id.clone());
                inner.cursor.reset();
                inner.state = SessionState::Running;
                inner.poller = Some(poller::spawn(
                    Arc::downgrade(&self.shared),
                    Arc::clone(&self.shared.backend),
                    session_id.clone(),
                    generation,
                    self.shared.settings.poll_interval,
                ));
                drop(inner);
                info!(service = %self.key(), session_id = %session_id, "Exploitation session running");
                self.shared.publish_state(SessionState::Running, Some(session_id.clone()), None);
                Ok(session_id)
            }
            Err(e) => {
                let message = match e {
                    BreachlineError::LaunchFailed(msg) => msg,
                    other => other.to_string(),
                };
                inner.state = SessionState::Ready;
                inner.last_error = Some(message.clone());
                drop(inner);
                warn!(service = %self.key(), error = %message, "Launch failed");
                self.shared.publish_state(SessionState::Ready, None, Some(message.clone()));
                Err(BreachlineError::LaunchFailed(message))
            }
        }
    }

    /// Cancel the attempt.
    ///
    /// A `Launching` session is stopped locally; its start result is discarded
    /// when it arrives. A `Running` session is stopped on the backend first and
    /// stays `Running` if that call fails.
    pub async fn stop(&self) -> Result<(), BreachlineError> {
        let (session_id, generation) = {
            let mut inner = self.shared.inner.write().await;
            let current = inner.state;
            match current {
                SessionState::Launching => {
                    inner.generation += 1;
                    inner.state = SessionState::Stopped;
                    drop(inner);
                    info!(service = %self.key(), "Launch cancelled before the backend answered");
                    self.shared.publish_state(SessionState::Stopped, None, None);
                    return Ok(());
                }
                SessionState::Running => {
                    let id = inner.session_id.clone()
                        .ok_or_else(|| BreachlineError::Internal("running session has no id".into()))?;
                    (id, inner.generation)
                }
                other => {
                    return Err(BreachlineError::InvalidTransition(format!(
                        "cannot stop a session that is {}",
                        other
                    )));
                }
            }
        };

        if let Err(e) = self.shared.backend.stop(&session_id).await {
            let message = match e {
                BreachlineError::StopFailed(msg) => msg,
                other => other.to_string(),
            };
            self.shared.inner.write().await.last_error = Some(message.clone());
            warn!(session_id = %session_id, error = %message, "Stop failed, session left running");
            return Err(BreachlineError::StopFailed(message));
        }

        let mut inner = self.shared.inner.write().await;
        if !inner.is_current(&session_id, generation) {
            // Finished or torn down while the stop was in flight; keep that outcome
            return Ok(());
        }
        inner.state = SessionState::Stopped;
        inner.poller = None;
        drop(inner);
        info!(session_id = %session_id, "Exploitation session stopped");
        self.shared.publish_state(SessionState::Stopped, Some(session_id), None);
        Ok(())
    }

    /// Discard the attempt entirely: cancel polling, forget the session id,
    /// clear buffer and history and return to `Ready`. No backend call is made.
    pub async fn teardown(&self) {
        let mut inner = self.shared.inner.write().await;
        if inner.state == SessionState::Ready && inner.session_id.is_none() && inner.buffer.is_empty() {
            return;
        }
        let previous = inner.session_id.take();
        inner.clear();
        inner.state = SessionState::Ready;
        drop(inner);
        debug!(service = %self.key(), session_id = ?previous.as_ref().map(|s| s.as_str()), "Session torn down");
        self.shared.publish_state(SessionState::Ready, None, None);
    }

    /// Resolve once the session reaches a terminal state.
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.shared.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Watch channel carrying the lifecycle state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.read().await.state
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.shared.inner.read().await.session_id.clone()
    }

    pub async fn log_buffer(&self) -> Vec<LogLine> {
        self.shared.inner.read().await.buffer.clone()
    }

    pub async fn command_history(&self) -> Vec<String> {
        self.shared.inner.read().await.history.clone()
    }

    pub async fn flags(&self) -> SessionFlags {
        self.shared.inner.read().await.flags
    }

    pub async fn cursor_position(&self) -> usize {
        self.shared.inner.read().await.cursor.position()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.shared.inner.read().await.last_error.clone()
    }

    pub async fn is_polling(&self) -> bool {
        self.shared.inner.read().await.poller.as_ref().is_some_and(|p| !p.is_cancelled())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.read().await;
        SessionSnapshot {
            service: self.key(),
            session_id: inner.session_id.clone(),
            state: inner.state,
            log_buffer: inner.buffer.clone(),
            command_history: inner.history.clone(),
            flags: inner.flags,
            cursor: inner.cursor.position(),
            last_error: inner.last_error.clone(),
        }
    }
}
