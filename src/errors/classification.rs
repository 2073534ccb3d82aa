use super::types::BreachlineError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
    /// Whether the presentation layer should show this error to the operator.
    pub user_visible: bool,
}

impl BreachlineError {
    /// Classify this error to determine its type, whether it can be retried,
    /// and whether it should surface as an inline error.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Recoverable: refresh or redirect to the scan flow
            BreachlineError::CatalogUnavailable(_) => ErrorClassification {
                error_type: "CatalogUnavailable",
                retryable: true,
                user_visible: true,
            },
            BreachlineError::CatalogMalformed(_) => ErrorClassification {
                error_type: "CatalogMalformed",
                retryable: true,
                user_visible: true,
            },
            BreachlineError::LaunchFailed(_) => ErrorClassification {
                error_type: "LaunchFailed",
                retryable: true,
                user_visible: true,
            },
            BreachlineError::StopFailed(_) => ErrorClassification {
                error_type: "StopFailed",
                retryable: true,
                user_visible: true,
            },

            // Silent: retried on the next tick or simply disabled in the UI
            BreachlineError::PollTransient(_) => ErrorClassification {
                error_type: "PollTransientFailure",
                retryable: true,
                user_visible: false,
            },
            BreachlineError::CommandRejected(_) => ErrorClassification {
                error_type: "CommandRejectedLocally",
                retryable: false,
                user_visible: false,
            },
            BreachlineError::InvalidTransition(_) => ErrorClassification {
                error_type: "InvalidTransition",
                retryable: false,
                user_visible: false,
            },

            BreachlineError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
                user_visible: true,
            },
            BreachlineError::Network(_) => ErrorClassification {
                error_type: "NetworkError",
                retryable: true,
                user_visible: true,
            },
            BreachlineError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: true,
                user_visible: true,
            },
            BreachlineError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
                user_visible: true,
            },
            BreachlineError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
                user_visible: true,
            },
            BreachlineError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: true,
                user_visible: true,
            },
        }
    }
}
