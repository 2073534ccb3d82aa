use std::path::Path;
use crate::errors::BreachlineError;
use super::types::{BackendKind, BatchModeKind, BreachlineConfig};
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

pub async fn parse_config(path: &Path) -> Result<BreachlineConfig, BreachlineError> {
    if !path.exists() {
        return Err(BreachlineError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(BreachlineError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&content)?;

    // An empty file parses to Null; treat it as an empty config
    if yaml.is_null() {
        return Ok(BreachlineConfig::default());
    }

    validate_schema(&yaml)?;

    let config: BreachlineConfig = serde_yaml::from_value(yaml)?;

    validate_conflicts(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), BreachlineError> {
    let json_str = serde_json::to_string(yaml)
        .map_err(|e| BreachlineError::Config(format!("Config conversion error: {}", e)))?;
    let json_value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| BreachlineError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| BreachlineError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        // Advisory only; typed parsing and conflict checks are authoritative
        for e in errors {
            warn!(validation_error = %format!("{} at {}", e, e.instance_path), "Config schema warning");
        }
    }

    Ok(())
}

/// Detect semantic conflicts in the parsed configuration.
fn validate_conflicts(config: &BreachlineConfig) -> Result<(), BreachlineError> {
    if let Some(backend) = &config.backend {
        if backend.kind == BackendKind::Http {
            let has_url = backend.base_url.as_ref().map_or(false, |u| !u.trim().is_empty());
            if !has_url {
                return Err(BreachlineError::Config(
                    "backend.kind is 'http' but backend.base_url is not set".into(),
                ));
            }
        }
    }

    if let Some(polling) = &config.polling {
        if polling.interval_ms == Some(0) {
            return Err(BreachlineError::Config("polling.interval_ms must be greater than zero".into()));
        }
    }

    if let Some(batch) = &config.batch {
        if batch.max_threads == Some(0) {
            return Err(BreachlineError::Config("batch.max_threads must be at least 1".into()));
        }
        if batch.mode == Some(BatchModeKind::Sequential) && batch.max_threads.is_some_and(|n| n > 1) {
            warn!("batch.max_threads is ignored in sequential mode");
        }
    }

    if let Some(sim) = &config.simulation {
        if let Some(rate) = sim.success_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(BreachlineError::Config(format!(
                    "simulation.success_rate must be within 0.0..=1.0, got {}",
                    rate
                )));
            }
        }
    }

    if let Some(catalog) = &config.catalog {
        if catalog.path.is_some() && catalog.url.is_some() {
            warn!("Both catalog.path and catalog.url configured; catalog.path takes precedence");
        }
    }

    Ok(())
}
