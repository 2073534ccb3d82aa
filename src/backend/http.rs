use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::catalog::Service;
use crate::errors::BreachlineError;
use crate::session::{LogClass, LogEntry, LogSnapshot, RemoteStatus, SessionId};
use super::provider::ExploitBackend;
use tracing::debug;

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct StartResponse {
    #[serde(alias = "sessionId")]
    session_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogsResponse {
    Wrapped {
        logs: Vec<WireLogEntry>,
        #[serde(default)]
        status: Option<String>,
    },
    Bare(Vec<WireLogEntry>),
}

#[derive(Deserialize)]
struct WireLogEntry {
    #[serde(rename = "type", alias = "class", default)]
    class: Option<String>,
    #[serde(alias = "text")]
    message: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BreachlineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BreachlineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn session_url(&self, session_id: &SessionId, action: &str) -> String {
        format!("{}/api/exploit/{}/{}", self.base_url, session_id, action)
    }
}

#[async_trait]
impl ExploitBackend for HttpBackend {
    async fn start(&self, service: &Service) -> Result<SessionId, BreachlineError> {
        let body = json!({
            "address": service.address,
            "port": service.port,
            "service": service.service_name,
            "version": service.version,
            "cves": service.known_vulnerabilities,
        });

        let resp = self.client
            .post(format!("{}/api/exploit/start", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BreachlineError::LaunchFailed(format!("start request failed: {}", e)))?;

        let resp = check_status(resp).await.map_err(BreachlineError::LaunchFailed)?;
        let data: StartResponse = resp.json().await
            .map_err(|e| BreachlineError::LaunchFailed(format!("invalid start response: {}", e)))?;

        if data.session_id.trim().is_empty() {
            return Err(BreachlineError::LaunchFailed("backend returned an empty session id".into()));
        }
        debug!(service = %service.key(), session_id = %data.session_id, "Backend session started");
        Ok(SessionId::new(data.session_id))
    }

    async fn stop(&self, session_id: &SessionId) -> Result<(), BreachlineError> {
        let resp = self.client
            .post(self.session_url(session_id, "stop"))
            .send()
            .await
            .map_err(|e| BreachlineError::StopFailed(format!("stop request failed: {}", e)))?;
        check_status(resp).await.map_err(BreachlineError::StopFailed)?;
        Ok(())
    }

    async fn get_logs(&self, session_id: &SessionId) -> Result<LogSnapshot, BreachlineError> {
        let resp = self.client
            .get(self.session_url(session_id, "logs"))
            .send()
            .await
            .map_err(|e| BreachlineError::PollTransient(format!("log request failed: {}", e)))?;
        let resp = check_status(resp).await.map_err(BreachlineError::PollTransient)?;

        let data: LogsResponse = resp.json().await
            .map_err(|e| BreachlineError::PollTransient(format!("invalid log response: {}", e)))?;

        let (wire, status) = match data {
            LogsResponse::Wrapped { logs, status } => (logs, status),
            LogsResponse::Bare(logs) => (logs, None),
        };

        let entries = wire.into_iter()
            .enumerate()
            .map(|(i, w)| LogEntry {
                sequence_index: i as u64,
                class: w.class.as_deref().map(parse_class).unwrap_or(LogClass::Info),
                timestamp: w.timestamp.unwrap_or_else(Utc::now),
                text: w.message,
            })
            .collect();

        Ok(LogSnapshot {
            entries,
            status: status.as_deref().and_then(parse_status),
        })
    }

    async fn send_command(&self, session_id: &SessionId, command: &str) -> Result<(), BreachlineError> {
        let resp = self.client
            .post(self.session_url(session_id, "command"))
            .json(&json!({ "command": command }))
            .send()
            .await
            .map_err(|e| BreachlineError::Network(format!("command request failed: {}", e)))?;
        check_status(resp).await.map_err(BreachlineError::Network)?;
        Ok(())
    }

    fn backend_name(&self) -> &str { "http" }
}

/// Pass 2xx responses through; turn anything else into a message that
/// includes the backend's `error` field when it sent one.
async fn check_status(resp: Response) -> Result<Response, String> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp.json::<Value>().await.ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string));
    Err(match detail {
        Some(msg) => format!("backend returned {}: {}", status, msg),
        None => format!("backend returned {}", status),
    })
}

fn parse_class(raw: &str) -> LogClass {
    match raw.trim().to_ascii_lowercase().as_str() {
        "success" | "ok" => LogClass::Success,
        "warning" | "warn" => LogClass::Warning,
        "error" | "err" => LogClass::Error,
        "exploit" => LogClass::Exploit,
        _ => LogClass::Info,
    }
}

fn parse_status(raw: &str) -> Option<RemoteStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "running" => Some(RemoteStatus::Running),
        "completed" | "complete" | "success" => Some(RemoteStatus::Completed),
        "failed" | "error" => Some(RemoteStatus::Failed),
        _ => None,
    }
}
