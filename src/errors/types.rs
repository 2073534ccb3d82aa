use thiserror::Error;

#[derive(Debug, Error)]
pub enum BreachlineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Catalog malformed: {0}")]
    CatalogMalformed(String),

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Log poll failed: {0}")]
    PollTransient(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
