use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::backend::{create_backend, ExploitBackend};
use crate::batch::BatchSettings;
use crate::catalog::{CatalogSource, FileCatalogSource, HttpCatalogSource, ServiceKey};
use crate::config::{parse_config, BackendConfig, BackendKind, BreachlineConfig, CatalogConfig, PollingConfig, SimulationConfig};
use crate::errors::BreachlineError;
use crate::wizard::{ExploitWizard, WizardStep};
use super::commands::{BackendArg, RuntimeArgs};
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "breachline.yaml";
const DEFAULT_CATALOG_PATH: &str = "catalog.json";

/// Load the config file (explicit, or `./breachline.yaml` when present) and
/// apply command-line overrides on top of it.
pub async fn load_config(args: &RuntimeArgs) -> Result<BreachlineConfig, BreachlineError> {
    let mut config = match &args.config {
        Some(path) => parse_config(Path::new(path)).await?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            debug!(path = DEFAULT_CONFIG_PATH, "Using default config file");
            parse_config(Path::new(DEFAULT_CONFIG_PATH)).await?
        }
        None => BreachlineConfig::default(),
    };
    apply_overrides(&mut config, args)?;
    Ok(config)
}

fn apply_overrides(config: &mut BreachlineConfig, args: &RuntimeArgs) -> Result<(), BreachlineError> {
    if args.backend.is_some() || args.base_url.is_some() {
        let backend = config.backend.get_or_insert_with(BackendConfig::default);
        if let Some(kind) = args.backend {
            backend.kind = match kind {
                BackendArg::Http => BackendKind::Http,
                BackendArg::Simulated => BackendKind::Simulated,
            };
        }
        if let Some(url) = &args.base_url {
            backend.base_url = Some(url.clone());
            // A base URL on the command line implies the HTTP backend
            if args.backend.is_none() {
                backend.kind = BackendKind::Http;
            }
        }
    }

    if args.catalog.is_some() || args.catalog_url.is_some() {
        config.catalog = Some(CatalogConfig {
            path: args.catalog.clone(),
            url: args.catalog_url.clone(),
        });
    }

    if let Some(ms) = args.poll_interval_ms {
        if ms == 0 {
            return Err(BreachlineError::Config("--poll-interval-ms must be greater than zero".into()));
        }
        config.polling.get_or_insert_with(PollingConfig::default).interval_ms = Some(ms);
    }

    if args.seed.is_some() || args.success_rate.is_some() {
        let sim = config.simulation.get_or_insert_with(SimulationConfig::default);
        if let Some(seed) = args.seed {
            sim.seed = Some(seed);
        }
        if let Some(rate) = args.success_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(BreachlineError::Config(format!("--success-rate must be within 0.0..=1.0, got {}", rate)));
            }
            sim.success_rate = Some(rate);
        }
    }
    Ok(())
}

/// Catalog path wins over URL; with neither configured, `./catalog.json` is used.
pub fn catalog_source(config: &BreachlineConfig) -> Result<Arc<dyn CatalogSource>, BreachlineError> {
    let catalog = config.catalog.clone().unwrap_or_default();
    match (catalog.path, catalog.url) {
        (Some(path), _) => Ok(Arc::new(FileCatalogSource::new(PathBuf::from(path)))),
        (None, Some(url)) => Ok(Arc::new(HttpCatalogSource::new(&url, config.request_timeout())?)),
        (None, None) => Ok(Arc::new(FileCatalogSource::new(DEFAULT_CATALOG_PATH))),
    }
}

/// Loaded config, backend and catalog source for one command.
pub struct Runtime {
    pub config: BreachlineConfig,
    pub backend: Arc<dyn ExploitBackend>,
    pub source: Arc<dyn CatalogSource>,
}

impl Runtime {
    pub async fn from_args(args: &RuntimeArgs) -> Result<Self, BreachlineError> {
        let config = load_config(args).await?;
        let backend = create_backend(&config)?;
        let source = catalog_source(&config)?;
        info!(backend = backend.backend_name(), catalog = %source.source_name(), "Runtime ready");
        Ok(Self { config, backend, source })
    }

    pub fn wizard(&self, settings: BatchSettings) -> ExploitWizard {
        ExploitWizard::new(Arc::clone(&self.source), Arc::clone(&self.backend), settings)
    }
}

pub fn parse_targets(raw: &[String]) -> Result<Vec<ServiceKey>, BreachlineError> {
    raw.iter()
        .map(|t| t.parse::<ServiceKey>().map_err(BreachlineError::Config))
        .collect()
}

/// Walk the wizard to step 3 with `targets` selected (`None` selects everything).
pub async fn prepare_execution(
    wizard: &ExploitWizard,
    targets: Option<&[ServiceKey]>,
) -> Result<(), BreachlineError> {
    wizard.enter_review().await?;
    if wizard.navigate(WizardStep::Select).await != WizardStep::Select {
        return Err(BreachlineError::CatalogUnavailable("catalog could not be loaded".into()));
    }
    match targets {
        Some(keys) => {
            for key in keys {
                wizard.select(key).await?;
            }
        }
        None => {
            wizard.select_all().await?;
        }
    }
    if wizard.navigate(WizardStep::Execute).await != WizardStep::Execute {
        return Err(BreachlineError::InvalidTransition("no services selected".into()));
    }
    Ok(())
}
