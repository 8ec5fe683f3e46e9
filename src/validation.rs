//! Presence checks and log-safe parameter rendering.
//!
//! Only presence is checked here; type and shape validation belong to the
//! business handlers.

use serde_json::{Map, Value};

// =============================================================================
// Constants
// =============================================================================

/// Replacement for sensitive values in logs.
pub const REDACTED: &str = "[REDACTED]";

/// Parameter name fragments whose values are never logged.
pub const DEFAULT_SENSITIVE_FIELDS: [&str; 5] =
    ["password", "token", "secret", "api_key", "authorization"];

// =============================================================================
// Required fields
// =============================================================================

/// Whether a payload value counts as provided.
///
/// Falsy values are missing: absent, `null`, `false`, zero, blank strings,
/// and empty arrays or objects.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
    }
}

/// Every required field missing from `payload`, in declared order.
pub fn missing_fields<S: AsRef<str>>(payload: &Map<String, Value>, required: &[S]) -> Vec<String> {
    required
        .iter()
        .map(|field| field.as_ref())
        .filter(|field| !is_present(payload.get(*field)))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Sanitization
// =============================================================================

/// Matches parameter names whose values must not reach the logs.
///
/// Matching is case-insensitive on substrings, so `new_password` and
/// `X-Auth-Token` are both caught.
#[derive(Debug, Clone)]
pub struct SensitiveFields {
    fragments: Vec<String>,
}

impl SensitiveFields {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fragments: fragments
                .into_iter()
                .map(|f| f.as_ref().trim().to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.fragments.iter().any(|f| key.contains(f.as_str()))
    }

    /// Copy of `params` with sensitive values replaced, recursing into
    /// nested objects and arrays.
    pub fn sanitize(&self, params: &Map<String, Value>) -> Map<String, Value> {
        params
            .iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    self.sanitize_value(value)
                };
                (key.clone(), value)
            })
            .collect()
    }

    fn sanitize_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.sanitize(map)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect())
            }
            other => other.clone(),
        }
    }
}

impl Default for SensitiveFields {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS)
    }
}
