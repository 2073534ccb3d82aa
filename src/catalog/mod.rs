pub mod loader;
pub mod source;

pub use loader::{load, merge_selection};
pub use source::{CatalogSource, FileCatalogSource, HttpCatalogSource, StaticCatalogSource};

use std::fmt;
use serde::{Deserialize, Serialize};

/// Identity of a discovered service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub address: String,
    pub port: u16,
}

impl ServiceKey {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self { address: address.into(), port }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl std::str::FromStr for ServiceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = s.rsplit_once(':')
            .ok_or_else(|| format!("expected address:port, got '{}'", s))?;
        let port = port.parse::<u16>()
            .map_err(|_| format!("invalid port in '{}'", s))?;
        if address.is_empty() {
            return Err(format!("missing address in '{}'", s));
        }
        Ok(Self::new(address, port))
    }
}

/// Severity tier of a catalogued service, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Lower values indicate higher severity.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Lenient parse used by the catalog loader.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "crit" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" | "med" | "moderate" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" | "informational" | "none" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical catalog record. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub address: String,
    pub port: u16,
    pub service_name: String,
    pub version: Option<String>,
    pub known_vulnerabilities: Vec<String>,
    pub severity: Severity,
    pub cvss_score: Option<f64>,
    pub description: Option<String>,
}

impl Service {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.address.clone(), self.port)
    }

    /// `name version` for display, falling back to the bare name.
    pub fn label(&self) -> String {
        match &self.version {
            Some(v) => format!("{} {}", self.service_name, v),
            None => self.service_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key_display_and_parse() {
        let key = ServiceKey::new("10.0.0.5", 445);
        assert_eq!(key.to_string(), "10.0.0.5:445");
        assert_eq!("10.0.0.5:445".parse::<ServiceKey>().unwrap(), key);
    }

    #[test]
    fn test_service_key_parse_rejects_garbage() {
        assert!("10.0.0.5".parse::<ServiceKey>().is_err());
        assert!("10.0.0.5:http".parse::<ServiceKey>().is_err());
        assert!(":80".parse::<ServiceKey>().is_err());
    }

    #[test]
    fn test_severity_rank_ordering() {
        assert!(Severity::Critical.rank() < Severity::High.rank());
        assert!(Severity::Low.rank() < Severity::Info.rank());
    }

    #[test]
    fn test_severity_default_is_medium() {
        assert_eq!(Severity::default(), Severity::Medium);
    }

    #[test]
    fn test_severity_parse_loose() {
        assert_eq!(Severity::parse_loose(" HIGH "), Some(Severity::High));
        assert_eq!(Severity::parse_loose("moderate"), Some(Severity::Medium));
        assert_eq!(Severity::parse_loose("bogus"), None);
    }
}
