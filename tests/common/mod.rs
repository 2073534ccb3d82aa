#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use breachline::backend::ExploitBackend;
use breachline::catalog::{Service, ServiceKey, Severity};
use breachline::errors::BreachlineError;
use breachline::session::{LogClass, LogEntry, LogSnapshot, RemoteStatus, SessionId, SessionSettings};

/// Scripted behaviour for one service.
#[derive(Clone, Default)]
pub struct Script {
    /// Id handed out by `start`; defaults to `sess-<port>`
    pub session_id: Option<String>,
    /// Responses served in order; the last one repeats
    pub responses: Vec<LogSnapshot>,
    pub start_delay: Duration,
    pub logs_delay: Duration,
    pub fail_start: bool,
    /// `stop` answers with `StopFailed` and the session keeps running
    pub fail_stop: bool,
}

impl Script {
    /// Completes after `lines` info lines, one new line per poll.
    pub fn completing(lines: usize) -> Self {
        let mut responses: Vec<LogSnapshot> = (1..=lines)
            .map(|n| LogSnapshot::new(info_lines(n)))
            .collect();
        let mut done = info_lines(lines);
        done.push(LogEntry::new(lines as u64, LogClass::Success, "[+] Exploit completed, root shell obtained: uid=0(root)"));
        responses.push(LogSnapshot::new(done).with_status(RemoteStatus::Completed));
        Self { responses, ..Default::default() }
    }

    pub fn failing() -> Self {
        let entries = vec![LogEntry::new(0, LogClass::Error, "[-] Exploitation failed: target patched")];
        Self {
            responses: vec![LogSnapshot::new(entries).with_status(RemoteStatus::Failed)],
            ..Default::default()
        }
    }

    /// Never reaches a terminal state on its own.
    pub fn endless(lines: &[&str]) -> Self {
        let entries = lines.iter()
            .enumerate()
            .map(|(i, t)| LogEntry::new(i as u64, LogClass::Info, *t))
            .collect();
        Self { responses: vec![LogSnapshot::new(entries)], ..Default::default() }
    }
}

pub fn info_lines(n: usize) -> Vec<LogEntry> {
    (0..n).map(|i| LogEntry::new(i as u64, LogClass::Info, format!("L{}", i + 1))).collect()
}

#[derive(Default)]
struct ScriptState {
    queues: HashMap<SessionId, VecDeque<LogSnapshot>>,
}

/// Backend driven entirely by per-service scripts. Every call is recorded.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<ServiceKey, Script>>,
    state: Mutex<ScriptState>,
    calls: Mutex<Vec<Call>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(ServiceKey),
    Stop(SessionId),
    Logs(SessionId),
    Command(SessionId, String),
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, key: ServiceKey, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(key, script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn log_calls_for(&self, id: &str) -> usize {
        self.calls().iter()
            .filter(|c| matches!(c, Call::Logs(s) if s.as_str() == id))
            .count()
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls().iter()
            .filter(|c| match c {
                Call::Logs(s) | Call::Stop(s) | Call::Command(s, _) => s.as_str() == id,
                Call::Start(_) => false,
            })
            .count()
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.calls().into_iter()
            .filter_map(|c| match c {
                Call::Command(id, text) => Some((id.to_string(), text)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn script_for_session(&self, id: &SessionId) -> Option<Script> {
        let scripts = self.scripts.lock().unwrap();
        scripts.iter()
            .find(|(key, script)| session_id_for(key, script) == *id)
            .map(|(_, script)| script.clone())
    }
}

fn session_id_for(key: &ServiceKey, script: &Script) -> SessionId {
    SessionId::new(script.session_id.clone().unwrap_or_else(|| format!("sess-{}", key.port)))
}

#[async_trait]
impl ExploitBackend for ScriptedBackend {
    async fn start(&self, service: &Service) -> Result<SessionId, BreachlineError> {
        let key = service.key();
        self.record(Call::Start(key.clone()));
        let script = self.scripts.lock().unwrap().get(&key).cloned().unwrap_or_default();
        if !script.start_delay.is_zero() {
            tokio::time::sleep(script.start_delay).await;
        }
        if script.fail_start {
            return Err(BreachlineError::LaunchFailed(format!("{} refused the exploit", key)));
        }
        let id = session_id_for(&key, &script);
        self.state.lock().unwrap().queues.insert(id.clone(), script.responses.into());
        Ok(id)
    }

    async fn stop(&self, session_id: &SessionId) -> Result<(), BreachlineError> {
        self.record(Call::Stop(session_id.clone()));
        if self.script_for_session(session_id).is_some_and(|s| s.fail_stop) {
            return Err(BreachlineError::StopFailed("backend lost track of the session".into()));
        }
        Ok(())
    }

    async fn get_logs(&self, session_id: &SessionId) -> Result<LogSnapshot, BreachlineError> {
        self.record(Call::Logs(session_id.clone()));
        let delay = self.script_for_session(session_id).map(|s| s.logs_delay).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        let queue = state.queues.get_mut(session_id)
            .ok_or_else(|| BreachlineError::PollTransient(format!("unknown session {}", session_id)))?;
        let snapshot = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(snapshot)
    }

    async fn send_command(&self, session_id: &SessionId, command: &str) -> Result<(), BreachlineError> {
        self.record(Call::Command(session_id.clone(), command.to_string()));
        Ok(())
    }

    fn backend_name(&self) -> &str { "scripted" }
}

pub fn service(address: &str, port: u16) -> Service {
    Service {
        address: address.to_string(),
        port,
        service_name: "ftp".to_string(),
        version: Some("2.3.4".to_string()),
        known_vulnerabilities: vec!["CVE-2011-2523".to_string()],
        severity: Severity::Critical,
        cvss_score: Some(9.8),
        description: None,
    }
}

pub const POLL: Duration = Duration::from_millis(500);

pub fn session_settings() -> SessionSettings {
    SessionSettings {
        poll_interval: POLL,
        max_consecutive_failures: 3,
    }
}

/// Catalog payload in the scanner's hand-off shape.
pub fn catalog_json(services: &[(&str, u16)]) -> serde_json::Value {
    let records: Vec<serde_json::Value> = services.iter()
        .map(|(address, port)| serde_json::json!({
            "ip": address,
            "port": port,
            "service": "ftp",
            "version": "vsftpd 2.3.4",
            "cves": ["CVE-2011-2523"],
            "severity": "critical",
            "cvss": 9.8,
        }))
        .collect();
    serde_json::json!({ "services": records })
}

/// Let timers fire and spawned tasks run for `polls` poll intervals.
pub async fn settle(polls: u32) {
    tokio::time::sleep(POLL * polls + Duration::from_millis(10)).await;
}

pub async fn buffer_texts(session: &breachline::session::ExploitSession) -> Vec<String> {
    session.log_buffer().await.into_iter().map(|l| l.text).collect()
}
