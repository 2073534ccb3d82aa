use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use crate::errors::BreachlineError;
use super::{Service, ServiceKey, Severity};

static CVE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^CVE-\d{4}-\d{4,}$").expect("static regex")
});

const ADDRESS_KEYS: &[&str] = &["address", "ip", "host", "target"];
const PORT_KEYS: &[&str] = &["port"];
const NAME_KEYS: &[&str] = &["service_name", "serviceName", "service", "name"];
const VERSION_KEYS: &[&str] = &["version", "service_version"];
const VULN_KEYS: &[&str] = &["known_vulnerabilities", "knownVulnerabilities", "vulnerabilities", "cves"];
const SEVERITY_KEYS: &[&str] = &["severity", "severity_tier", "severityTier", "risk"];
const CVSS_KEYS: &[&str] = &["cvss_score", "cvssScore", "cvss"];
const DESCRIPTION_KEYS: &[&str] = &["description", "summary"];
const LIST_KEYS: &[&str] = &["services", "targets", "vulnerable_services"];

/// Normalize a raw catalog payload into canonical, deduplicated services
/// sorted by (address, port).
///
/// `Null` means nothing was handed off and maps to `CatalogUnavailable`;
/// anything present but unusable maps to `CatalogMalformed`.
pub fn load(raw: &Value) -> Result<Vec<Service>, BreachlineError> {
    let records = match raw {
        Value::Null => {
            return Err(BreachlineError::CatalogUnavailable("no catalog has been recorded".into()));
        }
        Value::Array(items) => items,
        Value::Object(obj) => LIST_KEYS.iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
            .ok_or_else(|| BreachlineError::CatalogMalformed(
                "catalog object has no services/targets array".into()
            ))?,
        other => {
            return Err(BreachlineError::CatalogMalformed(format!(
                "catalog must be a list of services, got {}",
                json_kind(other)
            )));
        }
    };

    let mut by_key: BTreeMap<ServiceKey, Service> = BTreeMap::new();
    let mut skipped = 0usize;

    for (idx, record) in records.iter().enumerate() {
        let Some(obj) = record.as_object() else {
            warn!(index = idx, "Skipping catalog record that is not an object");
            skipped += 1;
            continue;
        };
        match normalize_record(obj) {
            Some(service) => {
                let key = service.key();
                match by_key.get_mut(&key) {
                    Some(existing) => {
                        debug!(service = %key, "Merging duplicate catalog record");
                        for cve in service.known_vulnerabilities {
                            if !existing.known_vulnerabilities.contains(&cve) {
                                existing.known_vulnerabilities.push(cve);
                            }
                        }
                    }
                    None => {
                        by_key.insert(key, service);
                    }
                }
            }
            None => {
                warn!(index = idx, "Skipping catalog record without usable address/port");
                skipped += 1;
            }
        }
    }

    if by_key.is_empty() && skipped > 0 {
        return Err(BreachlineError::CatalogMalformed(format!(
            "none of the {} catalog records had a usable address and port",
            skipped
        )));
    }

    Ok(by_key.into_values().collect())
}

/// Keep only the selected keys that still exist in `catalog`.
pub fn merge_selection(selection: &BTreeSet<ServiceKey>, catalog: &[Service]) -> BTreeSet<ServiceKey> {
    catalog.iter()
        .map(Service::key)
        .filter(|k| selection.contains(k))
        .collect()
}

fn normalize_record(obj: &Map<String, Value>) -> Option<Service> {
    let raw_address = first_string(obj, ADDRESS_KEYS)?;
    let (address, embedded_port) = split_address(&raw_address);
    if address.is_empty() {
        return None;
    }

    let port = first_value(obj, PORT_KEYS)
        .and_then(parse_port)
        .or(embedded_port)?;

    let service_name = first_string(obj, NAME_KEYS)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let version = first_string(obj, VERSION_KEYS).and_then(|v| normalize_version(&v));

    let known_vulnerabilities = first_value(obj, VULN_KEYS)
        .map(collect_cves)
        .unwrap_or_default();

    let severity = first_string(obj, SEVERITY_KEYS)
        .and_then(|s| Severity::parse_loose(&s))
        .unwrap_or_default();

    let cvss_score = first_value(obj, CVSS_KEYS).and_then(parse_cvss);

    let description = first_string(obj, DESCRIPTION_KEYS).filter(|s| !s.is_empty());

    Some(Service {
        address,
        port,
        service_name,
        version,
        known_vulnerabilities,
        severity,
        cvss_score,
        description,
    })
}

fn first_value<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_value(obj, keys).and_then(|v| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Split `"ip:port"` / `"[v6]:port"` into its parts. Bare IPv6 is left intact.
fn split_address(raw: &str) -> (String, Option<u16>) {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse::<u16>().ok());
            return (host.to_string(), port);
        }
    }
    if raw.matches(':').count() == 1 {
        if let Some((host, port)) = raw.split_once(':') {
            if let Ok(p) = port.trim().parse::<u16>() {
                return (host.to_string(), Some(p));
            }
        }
    }
    (raw.to_string(), None)
}

fn parse_port(value: &Value) -> Option<u16> {
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        // Tolerate "80", "80/tcp"
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u16>().ok()
        }
        _ => None,
    };
    port.filter(|p| *p != 0)
}

fn normalize_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = match trimmed.strip_prefix(['v', 'V']) {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        Some(rest) if rest.eq_ignore_ascii_case("unknown") => return None,
        _ => trimmed,
    };
    match stripped.to_ascii_lowercase().as_str() {
        "" | "unknown" | "n/a" | "-" => None,
        _ => Some(stripped.to_string()),
    }
}

fn collect_cves(value: &Value) -> Vec<String> {
    let candidates: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => o.get("id").or_else(|| o.get("cve"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }).collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let mut out: Vec<String> = Vec::new();
    for c in candidates {
        let c = c.trim();
        if CVE_ID.is_match(c) {
            let id = c.to_ascii_uppercase();
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    out
}

fn parse_cvss(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if score.is_nan() {
        return None;
    }
    Some(score.clamp(0.0, 10.0))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
