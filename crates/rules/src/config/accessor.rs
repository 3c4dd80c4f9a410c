//! Typed reads over a free-form parameter map.

use std::str::FromStr;
use std::time::Duration;

use autostart_core::parse_duration;
use serde_json::Value;

use crate::error::ConfigError;

/// Parameters of one trigger/action/condition/template block.
pub type Params = serde_json::Map<String, Value>;

/// Render a parameter value as text. `null` renders as `None`; sequences are
/// joined with `", "`.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Parse an enum name: upper-cased, hyphens become underscores.
pub fn parse_enum<T: FromStr>(raw: &str) -> Option<T> {
    let normalized = raw.trim().to_uppercase().replace('-', "_");
    T::from_str(&normalized).ok()
}

/// Parse the boolean literal sets `true/yes/1/on` and `false/no/0/off`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Read-only view over [`Params`] labelled with the owning component's type
/// name, so validation errors point at the right block.
#[derive(Debug, Clone, Copy)]
pub struct ConfigAccessor<'a> {
    params: &'a Params,
    component: &'a str,
}

impl<'a> ConfigAccessor<'a> {
    pub fn new(params: &'a Params, component: &'a str) -> Self {
        Self { params, component }
    }

    pub fn component(&self) -> &str {
        self.component
    }

    pub fn params(&self) -> &'a Params {
        self.params
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.params.get(key)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    // ── Strings ─────────────────────────────────────────────────────

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.params.get(key).and_then(render_value)
    }

    /// Non-blank string or `default`.
    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn require_string(&self, key: &str) -> Result<String, ConfigError> {
        self.get_string(key)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::required(self.component, key))
    }

    // ── Numbers and flags ───────────────────────────────────────────

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.params.get(key) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(default),
            Some(other) => render_value(other)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default),
            None => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.params.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(other) => render_value(other)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default),
            None => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(other) => render_value(other)
                .and_then(|s| parse_bool(&s))
                .unwrap_or(default),
            None => default,
        }
    }

    // ── Collections ─────────────────────────────────────────────────

    /// A sequence of scalars, or a single scalar as a one-element list.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.params.get(key) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().filter_map(render_value).collect(),
            Some(other) => render_value(other).into_iter().collect(),
        }
    }

    /// Map entries of a sequence; non-map items are dropped.
    pub fn get_map_list(&self, key: &str) -> Vec<Params> {
        match self.params.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn get_map(&self, key: &str) -> Params {
        self.params
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    // ── Durations and enums ─────────────────────────────────────────

    pub fn get_duration(&self, key: &str, default: Duration) -> Duration {
        self.get_string(key)
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| parse_duration(&s).ok())
            .unwrap_or(default)
    }

    pub fn require_duration(&self, key: &str) -> Result<Duration, ConfigError> {
        let raw = self.require_string(key)?;
        parse_duration(&raw).map_err(|_| {
            ConfigError::invalid(self.component, key, &raw, "a duration such as '500ms', '1s' or '2m'")
        })
    }

    pub fn get_enum<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get_string(key)
            .and_then(|s| parse_enum(&s))
            .unwrap_or(default)
    }
}
