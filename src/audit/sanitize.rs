//! Metadata sanitization for the audit stream.
//!
//! The rule is concept-based: any key whose lowercase form contains one of
//! the configured substrings is redacted, recursively through nested objects
//! and arrays. Keys ending in the allowlist suffix carry secret *version
//! identifiers*, which are not secrets, and pass through.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::AuditSettings;

/// The literal substituted for every sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Configured redaction rule set. Substrings and the allowlist suffix are
/// held lowercase; key matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    sensitive_substrings: Vec<String>,
    allowlist_suffix: String,
}

impl RedactionPolicy {
    pub fn new(sensitive_substrings: Vec<String>, allowlist_suffix: String) -> Self {
        Self {
            sensitive_substrings: sensitive_substrings
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            allowlist_suffix: allowlist_suffix.to_lowercase(),
        }
    }

    pub fn from_settings(settings: &AuditSettings) -> Self {
        Self::new(
            settings.sensitive_key_substrings.clone(),
            settings.version_id_allowlist_suffix.clone(),
        )
    }

    /// Whether a metadata key must have its value redacted.
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        if !self.allowlist_suffix.is_empty() && key.ends_with(&self.allowlist_suffix) {
            return false;
        }
        self.sensitive_substrings.iter().any(|s| key.contains(s.as_str()))
    }

    /// Sanitize a metadata map, walking nested objects and arrays.
    pub fn sanitize_map(&self, map: Map<String, Value>) -> Map<String, Value> {
        map.into_iter()
            .map(|(key, value)| {
                if self.is_sensitive_key(&key) {
                    (key, Value::String(REDACTED.to_string()))
                } else {
                    (key, self.sanitize_value(value))
                }
            })
            .collect()
    }

    fn sanitize_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.sanitize_map(map)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| self.sanitize_value(item)).collect())
            }
            other => other,
        }
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::from_settings(&AuditSettings::default())
    }
}

/// Encode a value for audit metadata, degrading to `[REDACTED]` when it
/// cannot be serialized rather than failing the producing operation.
pub fn metadata_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(REDACTED.to_string()))
}
