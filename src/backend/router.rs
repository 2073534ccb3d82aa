use std::sync::Arc;
use std::time::Duration;
use crate::config::{BackendKind, BreachlineConfig};
use crate::errors::BreachlineError;
use super::provider::ExploitBackend;
use super::http::HttpBackend;
use super::simulated::{SimulatedBackend, SimulationSettings};

pub fn create_backend(config: &BreachlineConfig) -> Result<Arc<dyn ExploitBackend>, BreachlineError> {
    match config.backend_kind() {
        BackendKind::Http => {
            let base_url = config.backend.as_ref()
                .and_then(|b| b.base_url.as_deref())
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| BreachlineError::Config(
                    "HTTP backend selected but no base URL configured".into()
                ))?;
            Ok(Arc::new(HttpBackend::new(base_url, config.request_timeout())?))
        }
        BackendKind::Simulated => {
            let mut settings = SimulationSettings::default();
            if let Some(sim) = &config.simulation {
                settings.seed = sim.seed;
                if let Some(rate) = sim.success_rate {
                    settings.success_rate = rate;
                }
                if let Some(ms) = sim.step_delay_ms {
                    settings.step_delay = Duration::from_millis(ms);
                }
            }
            Ok(Arc::new(SimulatedBackend::new(settings)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, SimulationConfig};

    #[test]
    fn test_default_is_simulated() {
        let backend = create_backend(&BreachlineConfig::default()).unwrap();
        assert_eq!(backend.backend_name(), "simulated");
    }

    #[test]
    fn test_http_requires_base_url() {
        let config = BreachlineConfig {
            backend: Some(BackendConfig { kind: BackendKind::Http, base_url: None, request_timeout_secs: None }),
            ..Default::default()
        };
        assert!(matches!(create_backend(&config), Err(BreachlineError::Config(_))));
    }

    #[test]
    fn test_http_backend_selected() {
        let config = BreachlineConfig {
            backend: Some(BackendConfig {
                kind: BackendKind::Http,
                base_url: Some("http://localhost:9000".into()),
                request_timeout_secs: Some(5),
            }),
            simulation: Some(SimulationConfig::default()),
            ..Default::default()
        };
        assert_eq!(create_backend(&config).unwrap().backend_name(), "http");
    }
}
