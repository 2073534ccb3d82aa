use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use crate::errors::BreachlineError;

/// Where the catalog produced by a prior scan is handed off from.
///
/// Implementations return the raw payload; normalization is `catalog::load`'s
/// job. "Nothing recorded" must surface as `CatalogUnavailable` and
/// "recorded but unreadable" as `CatalogMalformed`.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<Value, BreachlineError>;

    /// Source description for logging
    fn source_name(&self) -> String;
}

/// JSON file written by the scan flow.
pub struct FileCatalogSource {
    path: PathBuf,
}

impl FileCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileCatalogSource {
    async fn fetch(&self) -> Result<Value, BreachlineError> {
        if !self.path.exists() {
            return Err(BreachlineError::CatalogUnavailable(format!(
                "no catalog at {}; run a scan first",
                self.path.display()
            )));
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Err(BreachlineError::CatalogUnavailable(format!(
                "catalog file {} is empty",
                self.path.display()
            )));
        }
        serde_json::from_str(&content).map_err(|e| BreachlineError::CatalogMalformed(format!(
            "{} is not valid JSON: {}",
            self.path.display(),
            e
        )))
    }

    fn source_name(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Catalog served over HTTP by the scanning service.
pub struct HttpCatalogSource {
    client: Client,
    url: String,
}

impl HttpCatalogSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, BreachlineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BreachlineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url: url.to_string() })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch(&self) -> Result<Value, BreachlineError> {
        let resp = self.client.get(&self.url).send().await
            .map_err(|e| BreachlineError::CatalogUnavailable(format!("catalog request failed: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BreachlineError::CatalogUnavailable("catalog service has no catalog".into()));
        }
        if !status.is_success() {
            return Err(BreachlineError::CatalogUnavailable(format!("catalog service returned {}", status)));
        }

        debug!(url = %self.url, "Fetched catalog");
        resp.json::<Value>().await
            .map_err(|e| BreachlineError::CatalogMalformed(format!("catalog response is not JSON: {}", e)))
    }

    fn source_name(&self) -> String {
        self.url.clone()
    }
}

/// In-memory catalog. `Value::Null` behaves like "nothing recorded".
pub struct StaticCatalogSource {
    payload: RwLock<Value>,
}

impl StaticCatalogSource {
    pub fn new(payload: Value) -> Self {
        Self { payload: RwLock::new(payload) }
    }

    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Swap the payload, e.g. after a fresh scan.
    pub async fn replace(&self, payload: Value) {
        *self.payload.write().await = payload;
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn fetch(&self) -> Result<Value, BreachlineError> {
        Ok(self.payload.read().await.clone())
    }

    fn source_name(&self) -> String {
        "static".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let source = FileCatalogSource::new("/nonexistent/catalog.json");
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, BreachlineError::CatalogUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FileCatalogSource::new(&path).fetch().await.unwrap_err();
        assert!(matches!(err, BreachlineError::CatalogMalformed(_)));
    }

    #[tokio::test]
    async fn test_valid_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"[{"ip":"10.0.0.1","port":21}]"#).unwrap();
        let value = FileCatalogSource::new(&path).fetch().await.unwrap();
        assert_eq!(value[0]["port"], 21);
    }

    #[tokio::test]
    async fn test_static_source_replace() {
        let source = StaticCatalogSource::empty();
        assert!(source.fetch().await.unwrap().is_null());
        source.replace(serde_json::json!([])).await;
        assert!(source.fetch().await.unwrap().is_array());
    }
}
