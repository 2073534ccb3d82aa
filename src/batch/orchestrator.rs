use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use crate::backend::ExploitBackend;
use crate::catalog::{Service, ServiceKey};
use crate::config::BreachlineConfig;
use crate::config::types::{BatchModeKind, DEFAULT_MAX_THREADS};
use crate::errors::BreachlineError;
use crate::events::ConsoleEvent;
use crate::session::{ExploitSession, SessionFlags, SessionId, SessionSettings, SessionState};
use super::outcome::{UnitOutcome, UnitStatus};
use super::stats::AggregateStats;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// One unit at a time; the next starts once the previous is terminal, after `stagger`
    Sequential { stagger: Duration },
    /// Up to `max_threads` units in flight
    Parallel { max_threads: usize },
}

impl Default for BatchMode {
    fn default() -> Self {
        Self::Sequential { stagger: Duration::ZERO }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSettings {
    pub mode: BatchMode,
    /// A unit still running after this long is stopped and counted as failed
    pub unit_timeout: Option<Duration>,
    pub session: SessionSettings,
}

impl BatchSettings {
    pub fn from_config(config: &BreachlineConfig) -> Self {
        let batch = config.batch.clone().unwrap_or_default();
        let mode = match batch.mode.unwrap_or_default() {
            BatchModeKind::Sequential => BatchMode::Sequential {
                stagger: Duration::from_millis(batch.stagger_ms.unwrap_or(0)),
            },
            BatchModeKind::Parallel => BatchMode::Parallel {
                max_threads: batch.max_threads.unwrap_or(DEFAULT_MAX_THREADS).max(1),
            },
        };
        Self {
            mode,
            unit_timeout: batch.unit_timeout_secs.map(Duration::from_secs),
            session: SessionSettings::from_config(config),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Outcomes in selection order
    pub outcomes: Vec<(ServiceKey, UnitOutcome)>,
    pub stats: AggregateStats,
    pub cancelled: bool,
}

enum UnitEnd {
    Terminal(SessionState),
    Cancelled,
    TimedOut,
}

/// Drives exploitation across a fixed, ordered set of services.
///
/// Each unit is an independent `ExploitSession`. The orchestrator records
/// each unit's terminal transition exactly once and republishes the derived
/// counters after every change.
#[derive(Clone)]
pub struct BatchOrchestrator {
    services: Arc<Vec<Service>>,
    backend: Arc<dyn ExploitBackend>,
    settings: BatchSettings,
    outcomes: Arc<RwLock<Vec<(ServiceKey, UnitOutcome)>>>,
    cancel_token: CancellationToken,
    event_tx: Option<mpsc::UnboundedSender<ConsoleEvent>>,
    started: Arc<AtomicBool>,
}

impl BatchOrchestrator {
    /// Build a batch over `services`. Duplicate identities keep their first occurrence.
    pub fn new(services: Vec<Service>, backend: Arc<dyn ExploitBackend>, settings: BatchSettings) -> Self {
        let mut unique: Vec<Service> = Vec::with_capacity(services.len());
        for service in services {
            if !unique.iter().any(|s| s.key() == service.key()) {
                unique.push(service);
            }
        }
        let outcomes = unique.iter().map(|s| (s.key(), UnitOutcome::pending())).collect();

        Self {
            services: Arc::new(unique),
            backend,
            settings,
            outcomes: Arc::new(RwLock::new(outcomes)),
            cancel_token: CancellationToken::new(),
            event_tx: None,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an external cancel token so `cancel()` from elsewhere stops the batch.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Attach an event channel for streaming unit outcomes and counters.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<ConsoleEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ConsoleEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn mode(&self) -> BatchMode {
        self.settings.mode
    }

    /// Whether `other` is a handle to this same batch.
    pub fn is_same_run(&self, other: &BatchOrchestrator) -> bool {
        Arc::ptr_eq(&self.started, &other.started)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Stop admitting units and stop every unit in flight. Units never started stay pending.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub async fn outcomes(&self) -> Vec<(ServiceKey, UnitOutcome)> {
        self.outcomes.read().await.clone()
    }

    pub async fn stats(&self) -> AggregateStats {
        let outcomes = self.outcomes.read().await;
        AggregateStats::from_outcomes(outcomes.iter().map(|(_, o)| o))
    }

    /// Run every unit to a terminal state (or until cancelled). A batch runs once.
    pub async fn run(&self) -> Result<BatchReport, BreachlineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BreachlineError::InvalidTransition("batch has already been run".into()));
        }
        info!(
            units = self.services.len(),
            mode = ?self.settings.mode,
            backend = self.backend.backend_name(),
            "Starting batch"
        );
        self.emit(ConsoleEvent::StatsUpdated { stats: self.stats().await });

        match self.settings.mode {
            BatchMode::Sequential { stagger } => self.run_sequential(stagger).await,
            BatchMode::Parallel { max_threads } => self.run_parallel(max_threads).await?,
        }

        let stats = self.stats().await;
        let cancelled = self.is_cancelled();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            root_access = stats.root_access,
            shells_opened = stats.shells_opened,
            cancelled,
            "Batch finished"
        );
        self.emit(ConsoleEvent::BatchFinished { stats, cancelled });

        Ok(BatchReport {
            outcomes: self.outcomes().await,
            stats,
            cancelled,
        })
    }

    async fn run_sequential(&self, stagger: Duration) {
        for (index, service) in self.services.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            if index > 0 && !stagger.is_zero() {
                tokio::select! {
                    _ = self.cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(stagger) => {}
                }
            }
            self.clone().run_unit(index, service.clone(), None).await;
        }
    }

    /// Permits are taken in list order, one per admitted unit, and released
    /// when that unit's task ends, so a freed slot admits exactly the next unit.
    async fn run_parallel(&self, max_threads: usize) -> Result<(), BreachlineError> {
        let semaphore = Arc::new(Semaphore::new(max_threads.max(1)));
        let mut join_set = JoinSet::new();

        for (index, service) in self.services.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|e| BreachlineError::Internal(format!("batch semaphore closed: {}", e)))?,
            };
            join_set.spawn(self.clone().run_unit(index, service.clone(), Some(permit)));
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Batch unit task panicked");
            }
        }
        Ok(())
    }

    async fn run_unit(self, index: usize, service: Service, _permit: Option<OwnedSemaphorePermit>) {
        let key = service.key();
        if self.is_cancelled() {
            return;
        }

        let session = ExploitSession::new(service, Arc::clone(&self.backend), self.settings.session.clone());
        self.mark_running(index, None).await;

        // One deadline covers launch and run
        let deadline = unit_deadline(self.settings.unit_timeout);
        tokio::pin!(deadline);

        // Detached launch; an unanswered start is stopped locally while Launching
        let mut launching = tokio::spawn({
            let session = session.clone();
            async move { session.launch().await }
        });
        let launched = tokio::select! {
            joined = &mut launching => Ok(joined),
            _ = self.cancel_token.cancelled() => Err(UnitEnd::Cancelled),
            _ = &mut deadline => Err(UnitEnd::TimedOut),
        };

        let session_id = match launched {
            Ok(Ok(Ok(id))) => id,
            Ok(Ok(Err(e))) => {
                warn!(service = %key, error = %e, "Batch unit failed to launch");
                self.finish(index, UnitStatus::Failed, None, SessionFlags::default(), Some(e.to_string())).await;
                return;
            }
            Ok(Err(e)) => {
                warn!(service = %key, error = %e, "Batch unit launch task failed");
                self.finish(index, UnitStatus::Failed, None, SessionFlags::default(), Some(e.to_string())).await;
                return;
            }
            Err(end) => {
                debug!(service = %key, "Batch unit interrupted while launching");
                let (status, error) = self.wind_down_unit(&session, end).await;
                self.finish(index, status, None, SessionFlags::default(), error).await;
                return;
            }
        };
        self.mark_running(index, Some(session_id.clone())).await;
        debug!(service = %key, session_id = %session_id, "Batch unit running");

        let end = tokio::select! {
            state = session.wait_terminal() => UnitEnd::Terminal(state),
            _ = self.cancel_token.cancelled() => UnitEnd::Cancelled,
            _ = &mut deadline => UnitEnd::TimedOut,
        };

        let (status, error) = self.wind_down_unit(&session, end).await;
        let flags = session.flags().await;
        self.finish(index, status, Some(session_id), flags, error).await;
    }

    /// Unit status for how the unit ended, stopping the session when it was interrupted.
    /// A failed stop is kept in the error so the report does not claim the attempt ended cleanly.
    async fn wind_down_unit(&self, session: &ExploitSession, end: UnitEnd) -> (UnitStatus, Option<String>) {
        match end {
            UnitEnd::Terminal(state) => (UnitStatus::from_terminal(state).unwrap_or(UnitStatus::Failed), None),
            UnitEnd::Cancelled => {
                let stop_error = stop_session(session).await;
                (UnitStatus::Stopped, stop_error)
            }
            UnitEnd::TimedOut => {
                let limit = self.settings.unit_timeout.unwrap_or_default();
                let timed_out = format!("timed out after {}s", limit.as_secs());
                let error = match stop_session(session).await {
                    Some(stop_error) => format!("{}; {}", timed_out, stop_error),
                    None => timed_out,
                };
                (UnitStatus::Failed, Some(error))
            }
        }
    }

    async fn mark_running(&self, index: usize, session_id: Option<SessionId>) {
        let update = {
            let mut outcomes = self.outcomes.write().await;
            let Some((key, outcome)) = outcomes.get_mut(index) else { return };
            if outcome.status.is_terminal() {
                return;
            }
            outcome.status = UnitStatus::Running;
            if session_id.is_some() {
                outcome.session_id = session_id;
            }
            (key.clone(), outcome.clone())
        };
        self.publish(update).await;
    }

    /// Record a unit's terminal outcome. Only the first terminal transition counts.
    async fn finish(
        &self,
        index: usize,
        status: UnitStatus,
        session_id: Option<SessionId>,
        flags: SessionFlags,
        error: Option<String>,
    ) -> bool {
        let update = {
            let mut outcomes = self.outcomes.write().await;
            let Some((key, outcome)) = outcomes.get_mut(index) else { return false };
            if outcome.status.is_terminal() {
                debug!(service = %key, "Ignoring repeated terminal outcome");
                return false;
            }
            outcome.status = status;
            if session_id.is_some() {
                outcome.session_id = session_id;
            }
            outcome.flags = flags;
            outcome.error = error;
            (key.clone(), outcome.clone())
        };
        info!(service = %update.0, status = %status, "Batch unit finished");
        self.publish(update).await;
        true
    }

    async fn publish(&self, (service, outcome): (ServiceKey, UnitOutcome)) {
        self.emit(ConsoleEvent::UnitOutcome { service, outcome });
        self.emit(ConsoleEvent::StatsUpdated { stats: self.stats().await });
    }
}

async fn unit_deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Stop an interrupted unit, returning the failure for its outcome.
async fn stop_session(session: &ExploitSession) -> Option<String> {
    match session.stop().await {
        Ok(()) => None,
        Err(e) => {
            warn!(service = %session.key(), error = %e, "Stop during batch wind-down failed");
            let detail = match e {
                BreachlineError::StopFailed(msg) => msg,
                other => other.to_string(),
            };
            Some(format!("stop failed: {}", detail))
        }
    }
}
