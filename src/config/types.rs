use std::time::Duration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 10;
pub const DEFAULT_MAX_THREADS: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BreachlineConfig {
    pub backend: Option<BackendConfig>,
    pub catalog: Option<CatalogConfig>,
    pub polling: Option<PollingConfig>,
    pub batch: Option<BatchConfig>,
    pub simulation: Option<SimulationConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
    #[default]
    Simulated,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CatalogConfig {
    pub path: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PollingConfig {
    pub interval_ms: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BatchConfig {
    pub mode: Option<BatchModeKind>,
    pub max_threads: Option<usize>,
    pub stagger_ms: Option<u64>,
    pub unit_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchModeKind {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SimulationConfig {
    pub seed: Option<u64>,
    pub success_rate: Option<f64>,
    pub step_delay_ms: Option<u64>,
}

impl BreachlineConfig {
    pub fn poll_interval(&self) -> Duration {
        let ms = self.polling.as_ref()
            .and_then(|p| p.interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    pub fn max_poll_failures(&self) -> u32 {
        self.polling.as_ref()
            .and_then(|p| p.max_consecutive_failures)
            .unwrap_or(DEFAULT_MAX_POLL_FAILURES)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.as_ref().map(|b| b.kind).unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = self.backend.as_ref()
            .and_then(|b| b.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }
}
