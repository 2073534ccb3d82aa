use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use crate::backend::ExploitBackend;
use crate::batch::{AggregateStats, BatchMode, BatchOrchestrator, BatchReport, BatchSettings};
use crate::catalog::{self, CatalogSource, Service, ServiceKey};
use crate::errors::BreachlineError;
use crate::events::ConsoleEvent;
use crate::session::{ExploitSession, LogLine, SessionId, SessionSettings, SessionState};
use super::step::WizardStep;
use tracing::{debug, info, warn};

/// What the presentation layer renders.
#[derive(Debug, Clone)]
pub struct WizardSnapshot {
    pub step: WizardStep,
    pub catalog_loaded: bool,
    pub catalog_error: Option<String>,
    pub services: Vec<Service>,
    pub selected: Vec<ServiceKey>,
    pub focused: Option<ServiceKey>,
    pub session_state: Option<SessionState>,
    pub log_buffer: Vec<LogLine>,
    pub stats: AggregateStats,
}

struct WizardState {
    step: WizardStep,
    /// `None` until a load succeeds
    catalog: Option<Vec<Service>>,
    catalog_error: Option<String>,
    selection: BTreeSet<ServiceKey>,
    session: Option<ExploitSession>,
    batch: Option<BatchOrchestrator>,
}

impl WizardState {
    fn new() -> Self {
        Self {
            step: WizardStep::Review,
            catalog: None,
            catalog_error: None,
            selection: BTreeSet::new(),
            session: None,
            batch: None,
        }
    }

    fn has_catalog(&self) -> bool {
        self.catalog.is_some()
    }

    fn find(&self, key: &ServiceKey) -> Option<&Service> {
        self.catalog.as_ref()?.iter().find(|s| s.key() == *key)
    }

    /// Selected services in catalog order.
    fn selected_services(&self) -> Vec<Service> {
        self.catalog.iter()
            .flatten()
            .filter(|s| self.selection.contains(&s.key()))
            .cloned()
            .collect()
    }

    /// Detach the focused session and running batch so they can be wound down outside the lock.
    fn detach_work(&mut self) -> (Option<ExploitSession>, Option<BatchOrchestrator>) {
        (self.session.take(), self.batch.take())
    }
}

/// Three-step workflow: review the catalog, select services, execute and monitor.
///
/// Forward moves are gated (a loaded catalog for step 2, a non-empty
/// selection for step 3); backward moves always succeed. Leaving step 3
/// tears down the focused session and cancels any batch, and entering step 1
/// additionally drops the selection and reloads the catalog.
pub struct ExploitWizard {
    source: Arc<dyn CatalogSource>,
    backend: Arc<dyn ExploitBackend>,
    session_settings: SessionSettings,
    batch_settings: BatchSettings,
    state: RwLock<WizardState>,
    event_tx: Option<mpsc::UnboundedSender<ConsoleEvent>>,
}

impl ExploitWizard {
    pub fn new(source: Arc<dyn CatalogSource>, backend: Arc<dyn ExploitBackend>, batch_settings: BatchSettings) -> Self {
        Self {
            source,
            backend,
            session_settings: batch_settings.session.clone(),
            batch_settings,
            state: RwLock::new(WizardState::new()),
            event_tx: None,
        }
    }

    /// Attach an event channel; sessions and batches created later share it.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<ConsoleEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ConsoleEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    pub async fn step(&self) -> WizardStep {
        self.state.read().await.step
    }

    /// Move to `target`. A blocked forward move leaves the step unchanged.
    pub async fn navigate(&self, target: WizardStep) -> WizardStep {
        if target == WizardStep::Review {
            if let Err(e) = self.enter_review().await {
                debug!(error = %e, "Catalog reload on review entry failed");
            }
            return WizardStep::Review;
        }

        let (current, detached) = {
            let mut state = self.state.write().await;
            let current = state.step;
            if target == current {
                return current;
            }
            if target > current {
                if !state.has_catalog() {
                    debug!(from = %current, to = %target, "Blocked: catalog not loaded");
                    return current;
                }
                if target == WizardStep::Execute && state.selection.is_empty() {
                    debug!(from = %current, to = %target, "Blocked: no services selected");
                    return current;
                }
            }
            let detached = if current == WizardStep::Execute {
                state.detach_work()
            } else {
                (None, None)
            };
            state.step = target;
            (current, detached)
        };

        wind_down(detached).await;
        info!(from = %current, to = %target, "Wizard step changed");
        self.emit(ConsoleEvent::StepChanged { step: target });
        target
    }

    /// (Re-)enter step 1: discard the session, batch and selection, then reload the catalog.
    pub async fn enter_review(&self) -> Result<usize, BreachlineError> {
        let (previous, detached) = {
            let mut state = self.state.write().await;
            let previous = state.step;
            let detached = state.detach_work();
            state.selection.clear();
            state.catalog = None;
            state.catalog_error = None;
            state.step = WizardStep::Review;
            (previous, detached)
        };
        wind_down(detached).await;
        if previous != WizardStep::Review {
            info!(from = %previous, "Returned to catalog review");
        }
        self.emit(ConsoleEvent::StepChanged { step: WizardStep::Review });
        self.emit(ConsoleEvent::SelectionChanged { selected: 0 });
        self.reload_catalog().await
    }

    /// Fetch and normalize the catalog again, keeping selected keys that still exist.
    ///
    /// A failed reload records the error and leaves the previous catalog in place.
    pub async fn reload_catalog(&self) -> Result<usize, BreachlineError> {
        let loaded = match self.source.fetch().await {
            Ok(raw) => catalog::load(&raw),
            Err(e) => Err(e),
        };

        match loaded {
            Ok(services) => {
                let count = services.len();
                let (before, after) = {
                    let mut state = self.state.write().await;
                    let before = state.selection.len();
                    state.selection = catalog::merge_selection(&state.selection, &services);
                    state.catalog = Some(services);
                    state.catalog_error = None;
                    (before, state.selection.len())
                };
                info!(services = count, source = %self.source.source_name(), "Catalog loaded");
                self.emit(ConsoleEvent::CatalogLoaded { services: count, source: self.source.source_name() });
                if before != after {
                    self.emit(ConsoleEvent::SelectionChanged { selected: after });
                }
                Ok(count)
            }
            Err(e) => {
                let unavailable = matches!(e, BreachlineError::CatalogUnavailable(_));
                warn!(source = %self.source.source_name(), error = %e, "Catalog load failed");
                self.state.write().await.catalog_error = Some(e.to_string());
                self.emit(ConsoleEvent::CatalogFailed { unavailable, error: e.to_string() });
                Err(e)
            }
        }
    }

    pub async fn catalog(&self) -> Option<Vec<Service>> {
        self.state.read().await.catalog.clone()
    }

    pub async fn selection(&self) -> Vec<ServiceKey> {
        self.state.read().await.selection.iter().cloned().collect()
    }

    pub async fn selected_services(&self) -> Vec<Service> {
        self.state.read().await.selected_services()
    }

    /// Add a service to the selection. Only valid in step 2.
    pub async fn select(&self, key: &ServiceKey) -> Result<bool, BreachlineError> {
        let selected = {
            let mut state = self.state.write().await;
            require_step(&state, WizardStep::Select, "select services")?;
            if state.find(key).is_none() {
                return Err(BreachlineError::InvalidTransition(format!("{} is not in the catalog", key)));
            }
            if !state.selection.insert(key.clone()) {
                return Ok(false);
            }
            state.selection.len()
        };
        self.emit(ConsoleEvent::SelectionChanged { selected });
        Ok(true)
    }

    pub async fn deselect(&self, key: &ServiceKey) -> Result<bool, BreachlineError> {
        let selected = {
            let mut state = self.state.write().await;
            require_step(&state, WizardStep::Select, "change the selection")?;
            if !state.selection.remove(key) {
                return Ok(false);
            }
            state.selection.len()
        };
        self.emit(ConsoleEvent::SelectionChanged { selected });
        Ok(true)
    }

    pub async fn select_all(&self) -> Result<usize, BreachlineError> {
        let selected = {
            let mut state = self.state.write().await;
            require_step(&state, WizardStep::Select, "select services")?;
            let keys: Vec<ServiceKey> = state.catalog.iter().flatten().map(Service::key).collect();
            state.selection.extend(keys);
            state.selection.len()
        };
        self.emit(ConsoleEvent::SelectionChanged { selected });
        Ok(selected)
    }

    pub async fn clear_selection(&self) -> Result<(), BreachlineError> {
        {
            let mut state = self.state.write().await;
            require_step(&state, WizardStep::Select, "change the selection")?;
            state.selection.clear();
        }
        self.emit(ConsoleEvent::SelectionChanged { selected: 0 });
        Ok(())
    }

    /// Make `key` the monitored service in step 3.
    ///
    /// Focusing a different service tears down the previous session completely.
    pub async fn focus(&self, key: &ServiceKey) -> Result<ExploitSession, BreachlineError> {
        let (session, previous) = {
            let mut state = self.state.write().await;
            require_step(&state, WizardStep::Execute, "focus a service")?;
            if !state.selection.contains(key) {
                return Err(BreachlineError::InvalidTransition(format!("{} is not selected", key)));
            }
            if let Some(existing) = state.session.as_ref().filter(|s| s.key() == *key) {
                return Ok(existing.clone());
            }
            let service = state.find(key).cloned()
                .ok_or_else(|| BreachlineError::Internal(format!("selected {} missing from catalog", key)))?;
            let session = match self.event_tx.clone() {
                Some(tx) => ExploitSession::with_event_channel(
                    service,
                    Arc::clone(&self.backend),
                    self.session_settings.clone(),
                    tx,
                ),
                None => ExploitSession::new(service, Arc::clone(&self.backend), self.session_settings.clone()),
            };
            let previous = state.session.replace(session.clone());
            (session, previous)
        };

        if let Some(previous) = previous {
            debug!(from = %previous.key(), to = %key, "Switching focused service");
            previous.teardown().await;
        }
        Ok(session)
    }

    pub async fn focused(&self) -> Option<ExploitSession> {
        self.state.read().await.session.clone()
    }

    async fn focused_session(&self) -> Result<ExploitSession, BreachlineError> {
        let state = self.state.read().await;
        require_step(&state, WizardStep::Execute, "control a session")?;
        state.session.clone()
            .ok_or_else(|| BreachlineError::InvalidTransition("no service is focused".into()))
    }

    pub async fn launch(&self) -> Result<SessionId, BreachlineError> {
        self.focused_session().await?.launch().await
    }

    pub async fn stop(&self) -> Result<(), BreachlineError> {
        self.focused_session().await?.stop().await
    }

    pub async fn send_command(&self, text: &str) -> Result<(), BreachlineError> {
        let session = self.state.read().await.session.clone()
            .ok_or_else(|| BreachlineError::CommandRejected("no session is focused".into()))?;
        session.send_command(text).await
    }

    /// Run every selected service as a batch. `mode` overrides the configured one.
    pub async fn run_batch(&self, mode: Option<BatchMode>) -> Result<BatchReport, BreachlineError> {
        let batch = {
            let mut state = self.state.write().await;
            require_step(&state, WizardStep::Execute, "run a batch")?;
            if state.batch.as_ref().is_some_and(|b| !b.is_cancelled()) {
                return Err(BreachlineError::InvalidTransition("a batch is already running".into()));
            }
            let mut settings = self.batch_settings.clone();
            if let Some(mode) = mode {
                settings.mode = mode;
            }
            let mut batch = BatchOrchestrator::new(state.selected_services(), Arc::clone(&self.backend), settings);
            if let Some(tx) = self.event_tx.clone() {
                batch = batch.with_event_channel(tx);
            }
            state.batch = Some(batch.clone());
            batch
        };

        let result = batch.run().await;

        let mut state = self.state.write().await;
        if state.batch.as_ref().is_some_and(|b| b.is_same_run(&batch)) {
            state.batch = None;
        }
        drop(state);
        result
    }

    /// Cancel the running batch, if any.
    pub async fn cancel_batch(&self) -> bool {
        match self.state.read().await.batch.as_ref() {
            Some(batch) => {
                batch.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self) -> WizardSnapshot {
        let (mut snapshot, session, batch) = {
            let state = self.state.read().await;
            let snapshot = WizardSnapshot {
                step: state.step,
                catalog_loaded: state.has_catalog(),
                catalog_error: state.catalog_error.clone(),
                services: state.catalog.clone().unwrap_or_default(),
                selected: state.selection.iter().cloned().collect(),
                focused: state.session.as_ref().map(ExploitSession::key),
                session_state: None,
                log_buffer: Vec::new(),
                stats: AggregateStats::default(),
            };
            (snapshot, state.session.clone(), state.batch.clone())
        };

        if let Some(session) = session {
            let view = session.snapshot().await;
            snapshot.session_state = Some(view.state);
            snapshot.log_buffer = view.log_buffer;
        }
        if let Some(batch) = batch {
            snapshot.stats = batch.stats().await;
        }
        snapshot
    }

    /// Tear everything down when the front-end goes away. No polling survives this call.
    pub async fn unmount(&self) {
        let detached = self.state.write().await.detach_work();
        wind_down(detached).await;
        debug!("Wizard unmounted");
    }
}

fn require_step(state: &WizardState, step: WizardStep, action: &str) -> Result<(), BreachlineError> {
    if state.step != step {
        return Err(BreachlineError::InvalidTransition(format!(
            "cannot {} in step {}, requires step {}",
            action,
            state.step.number(),
            step.number()
        )));
    }
    Ok(())
}

async fn wind_down((session, batch): (Option<ExploitSession>, Option<BatchOrchestrator>)) {
    if let Some(batch) = batch {
        batch.cancel();
    }
    if let Some(session) = session {
        session.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::backend::{SimulatedBackend, SimulationSettings};
    use crate::catalog::StaticCatalogSource;

    fn catalog() -> serde_json::Value {
        json!([
            {"ip": "10.0.0.1", "port": 21, "service": "ftp", "version": "v2.3.4"},
            {"ip": "10.0.0.2:80", "service": "http"},
        ])
    }

    fn wizard(source: Arc<StaticCatalogSource>) -> ExploitWizard {
        let backend = Arc::new(SimulatedBackend::new(SimulationSettings {
            seed: Some(3),
            success_rate: 1.0,
            ..Default::default()
        }));
        ExploitWizard::new(source, backend, BatchSettings::default())
    }

    #[tokio::test]
    async fn test_forward_blocked_without_catalog() {
        let wizard = wizard(Arc::new(StaticCatalogSource::empty()));
        assert!(matches!(wizard.enter_review().await, Err(BreachlineError::CatalogUnavailable(_))));
        assert_eq!(wizard.navigate(WizardStep::Select).await, WizardStep::Review);
        assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Review);
    }

    #[tokio::test]
    async fn test_execute_requires_selection() {
        let wizard = wizard(Arc::new(StaticCatalogSource::new(catalog())));
        wizard.enter_review().await.unwrap();
        assert_eq!(wizard.navigate(WizardStep::Select).await, WizardStep::Select);
        assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Select);

        wizard.select(&ServiceKey::new("10.0.0.2", 80)).await.unwrap();
        assert_eq!(wizard.navigate(WizardStep::Execute).await, WizardStep::Execute);
    }

    #[tokio::test]
    async fn test_select_unknown_service_rejected() {
        let wizard = wizard(Arc::new(StaticCatalogSource::new(catalog())));
        wizard.enter_review().await.unwrap();
        wizard.navigate(WizardStep::Select).await;
        let err = wizard.select(&ServiceKey::new("10.9.9.9", 1)).await.unwrap_err();
        assert!(matches!(err, BreachlineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_reload_keeps_surviving_selection() {
        let source = Arc::new(StaticCatalogSource::new(catalog()));
        let wizard = wizard(source.clone());
        wizard.enter_review().await.unwrap();
        wizard.navigate(WizardStep::Select).await;
        wizard.select_all().await.unwrap();

        source.replace(json!([{"ip": "10.0.0.1", "port": 21}])).await;
        assert_eq!(wizard.reload_catalog().await.unwrap(), 1);
        assert_eq!(wizard.selection().await, vec![ServiceKey::new("10.0.0.1", 21)]);
    }

    #[tokio::test]
    async fn test_review_entry_discards_selection() {
        let wizard = wizard(Arc::new(StaticCatalogSource::new(catalog())));
        wizard.enter_review().await.unwrap();
        wizard.navigate(WizardStep::Select).await;
        wizard.select_all().await.unwrap();

        assert_eq!(wizard.navigate(WizardStep::Review).await, WizardStep::Review);
        assert!(wizard.selection().await.is_empty());
        assert!(wizard.snapshot().await.catalog_loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_execute_tears_down_session() {
        let wizard = wizard(Arc::new(StaticCatalogSource::new(catalog())));
        wizard.enter_review().await.unwrap();
        wizard.navigate(WizardStep::Select).await;
        let key = ServiceKey::new("10.0.0.1", 21);
        wizard.select(&key).await.unwrap();
        wizard.navigate(WizardStep::Execute).await;

        let session = wizard.focus(&key).await.unwrap();
        wizard.launch().await.unwrap();
        assert!(session.is_polling().await);

        assert_eq!(wizard.navigate(WizardStep::Select).await, WizardStep::Select);
        assert!(!session.is_polling().await);
        assert_eq!(session.state().await, SessionState::Ready);
        assert!(wizard.focused().await.is_none());
        assert_eq!(wizard.selection().await, vec![key]);
    }

    #[tokio::test]
    async fn test_focus_outside_execute_rejected() {
        let wizard = wizard(Arc::new(StaticCatalogSource::new(catalog())));
        wizard.enter_review().await.unwrap();
        let err = wizard.focus(&ServiceKey::new("10.0.0.1", 21)).await.unwrap_err();
        assert!(matches!(err, BreachlineError::InvalidTransition(_)));
    }
}
