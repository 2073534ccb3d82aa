use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use crate::catalog::Service;
use crate::errors::BreachlineError;
use crate::session::{LogClass, LogEntry, LogSnapshot, RemoteStatus, SessionId};
use super::provider::ExploitBackend;
use tracing::debug;

/// Sessions kept before the oldest finished ones are evicted
const DEFAULT_SESSION_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// Fixed seed for reproducible outcomes; entropy-seeded when absent
    pub seed: Option<u64>,
    pub success_rate: f64,
    pub step_delay: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: None,
            success_rate: 0.7,
            step_delay: Duration::from_millis(800),
        }
    }
}

struct TimedLine {
    at: Duration,
    class: LogClass,
    text: String,
}

struct SimSession {
    started: Instant,
    started_wall: DateTime<Utc>,
    lines: Vec<TimedLine>,
    /// Offset of the last scripted line; the outcome becomes visible then
    finish_at: Duration,
    outcome: RemoteStatus,
    root: bool,
    stopped_at: Option<Duration>,
}

impl SimSession {
    fn is_finished(&self) -> bool {
        self.stopped_at.is_some() || self.cutoff() >= self.finish_at
    }

    fn cutoff(&self) -> Duration {
        self.stopped_at.unwrap_or_else(|| self.started.elapsed())
    }

    /// Commands are accepted until stopped; a failed attempt stops accepting once it finishes.
    fn accepts_commands(&self) -> bool {
        if self.stopped_at.is_some() {
            return false;
        }
        self.outcome == RemoteStatus::Completed || self.cutoff() < self.finish_at
    }

    /// Insert after every line already visible so earlier responses stay a prefix.
    fn push_now(&mut self, class: LogClass, text: String) {
        let at = self.cutoff();
        let pos = self.lines.partition_point(|l| l.at <= at);
        self.lines.insert(pos, TimedLine { at, class, text });
    }
}

/// Offline backend with client-side timers and randomized outcomes.
///
/// Each session replays a short script whose lines become visible as time
/// passes, so the cumulative-log contract holds exactly as for a real backend.
/// A stopped session is forgotten once its final log has been read, and the
/// map never holds more than `session_limit` sessions.
pub struct SimulatedBackend {
    settings: SimulationSettings,
    rng: Mutex<StdRng>,
    sessions: DashMap<SessionId, SimSession>,
    session_limit: usize,
}

impl SimulatedBackend {
    pub fn new(settings: SimulationSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            rng: Mutex::new(rng),
            sessions: DashMap::new(),
            session_limit: DEFAULT_SESSION_LIMIT,
        }
    }

    pub fn with_session_limit(mut self, limit: usize) -> Self {
        self.session_limit = limit.max(1);
        self
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Make room for one more session: finished sessions go first, then the oldest.
    fn evict_for_new_session(&self) {
        if self.sessions.len() < self.session_limit {
            return;
        }
        self.sessions.retain(|_, session| !session.is_finished());
        while self.sessions.len() >= self.session_limit {
            let oldest = self.sessions.iter()
                .min_by_key(|entry| entry.value().started)
                .map(|entry| entry.key().clone());
            let Some(id) = oldest else { break };
            debug!(session_id = %id, "Evicting simulated session");
            self.sessions.remove(&id);
        }
    }

    fn build_script(&self, service: &Service) -> Result<(Vec<TimedLine>, RemoteStatus, bool), BreachlineError> {
        let mut rng = self.rng.lock()
            .map_err(|_| BreachlineError::Internal("simulation rng poisoned".into()))?;
        let succeed = rng.gen_bool(self.settings.success_rate.clamp(0.0, 1.0));
        let root = succeed && rng.gen_bool(0.5);
        let shell = succeed && rng.gen_bool(0.8);
        let local_port: u16 = rng.gen_range(40000..60000);
        drop(rng);

        let key = service.key();
        let vector = service.known_vulnerabilities.first()
            .cloned()
            .unwrap_or_else(|| "known weaknesses".to_string());

        let mut script: Vec<(LogClass, String)> = vec![
            (LogClass::Info, format!("Initializing exploit module for {} on {}", service.label(), key)),
            (LogClass::Info, format!("Checking {} for {}", key, vector)),
            (LogClass::Exploit, format!("Sending payload ({})", vector)),
        ];
        if succeed {
            if shell {
                script.push((
                    LogClass::Exploit,
                    format!("Command shell session 1 opened (127.0.0.1:4444 -> {}:{})", service.address, local_port),
                ));
            }
            if root {
                script.push((LogClass::Success, "uid=0(root) gid=0(root) groups=0(root)".to_string()));
            } else {
                script.push((LogClass::Info, "uid=1000(svc) gid=1000(svc) groups=1000(svc)".to_string()));
            }
            script.push((LogClass::Success, format!("[+] Exploit completed against {}", key)));
        } else {
            script.push((
                LogClass::Error,
                format!("[-] Exploitation failed: {} does not appear vulnerable", key),
            ));
        }

        let lines = script.into_iter()
            .enumerate()
            .map(|(i, (class, text))| TimedLine {
                at: self.settings.step_delay * i as u32,
                class,
                text,
            })
            .collect();
        let outcome = if succeed { RemoteStatus::Completed } else { RemoteStatus::Failed };
        Ok((lines, outcome, root))
    }
}

#[async_trait]
impl ExploitBackend for SimulatedBackend {
    async fn start(&self, service: &Service) -> Result<SessionId, BreachlineError> {
        let (lines, outcome, root) = self.build_script(service)?;
        let finish_at = lines.last().map(|l| l.at).unwrap_or_default();
        self.evict_for_new_session();
        let id = SessionId::new(format!("sim-{}", uuid::Uuid::new_v4().simple()));
        debug!(session_id = %id, service = %service.key(), outcome = ?outcome, "Simulated session started");
        self.sessions.insert(id.clone(), SimSession {
            started: Instant::now(),
            started_wall: Utc::now(),
            lines,
            finish_at,
            outcome,
            root,
            stopped_at: None,
        });
        Ok(id)
    }

    async fn stop(&self, session_id: &SessionId) -> Result<(), BreachlineError> {
        let mut session = self.sessions.get_mut(session_id)
            .ok_or_else(|| BreachlineError::StopFailed(format!("unknown session {}", session_id)))?;
        if session.stopped_at.is_none() {
            session.push_now(LogClass::Warning, "Session closed by operator".to_string());
            session.stopped_at = Some(session.started.elapsed());
        }
        Ok(())
    }

    async fn get_logs(&self, session_id: &SessionId) -> Result<LogSnapshot, BreachlineError> {
        let (snapshot, stopped) = {
            let session = self.sessions.get(session_id)
                .ok_or_else(|| BreachlineError::PollTransient(format!("unknown session {}", session_id)))?;
            let cutoff = session.cutoff();
            let entries: Vec<LogEntry> = session.lines.iter()
                .take_while(|l| l.at <= cutoff)
                .enumerate()
                .map(|(i, l)| LogEntry {
                    sequence_index: i as u64,
                    class: l.class,
                    timestamp: session.started_wall + chrono::Duration::milliseconds(l.at.as_millis() as i64),
                    text: l.text.clone(),
                })
                .collect();

            let status = if session.stopped_at.is_some() {
                None
            } else if cutoff >= session.finish_at {
                Some(session.outcome)
            } else {
                Some(RemoteStatus::Running)
            };
            (LogSnapshot { entries, status }, session.stopped_at.is_some())
        };

        if stopped {
            debug!(session_id = %session_id, "Final log read for stopped simulated session");
            self.sessions.remove(session_id);
        }
        Ok(snapshot)
    }

    async fn send_command(&self, session_id: &SessionId, command: &str) -> Result<(), BreachlineError> {
        let mut session = self.sessions.get_mut(session_id)
            .ok_or_else(|| BreachlineError::Network(format!("unknown session {}", session_id)))?;
        if !session.accepts_commands() {
            return Err(BreachlineError::Network("session is not accepting commands".into()));
        }
        let reply = scripted_reply(command, session.root);
        session.push_now(LogClass::Info, reply);
        Ok(())
    }

    fn backend_name(&self) -> &str { "simulated" }
}

fn scripted_reply(command: &str, root: bool) -> String {
    let user = if root { "root" } else { "svc" };
    match command.split_whitespace().next().unwrap_or("") {
        "whoami" => user.to_string(),
        "id" if root => "uid=0(root) gid=0(root) groups=0(root)".to_string(),
        "id" => "uid=1000(svc) gid=1000(svc) groups=1000(svc)".to_string(),
        "pwd" if root => "/root".to_string(),
        "pwd" => "/home/svc".to_string(),
        "hostname" => "target".to_string(),
        "uname" => "Linux target 5.15.0-91-generic x86_64 GNU/Linux".to_string(),
        other => format!("sh: 1: {}: not found", other),
    }
}
