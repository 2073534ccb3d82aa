use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "backend": {
                "type": "object",
                "properties": {
                    "kind": { "type": "string", "enum": ["http", "simulated"] },
                    "base_url": { "type": "string", "format": "uri" },
                    "request_timeout_secs": { "type": "integer", "minimum": 1 }
                }
            },
            "catalog": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "url": { "type": "string", "format": "uri" }
                }
            },
            "polling": {
                "type": "object",
                "properties": {
                    "interval_ms": { "type": "integer", "minimum": 50 },
                    "max_consecutive_failures": { "type": "integer", "minimum": 1 }
                }
            },
            "batch": {
                "type": "object",
                "properties": {
                    "mode": { "type": "string", "enum": ["sequential", "parallel"] },
                    "max_threads": { "type": "integer", "minimum": 1 },
                    "stagger_ms": { "type": "integer", "minimum": 0 },
                    "unit_timeout_secs": { "type": "integer", "minimum": 1 }
                }
            },
            "simulation": {
                "type": "object",
                "properties": {
                    "seed": { "type": "integer", "minimum": 0 },
                    "success_rate": { "type": "number", "minimum": 0, "maximum": 1 },
                    "step_delay_ms": { "type": "integer", "minimum": 0 }
                }
            }
        }
    })
});
