//! Deserialized form of the YAML rule configuration.

use std::path::Path;
use std::time::Duration;

use autostart_core::{parse_duration_or, ServerConfig};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use super::accessor::{parse_bool, ConfigAccessor, Params};
use crate::error::{ConfigError, Result, RuleError};

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Named section where each entry is converted on its own; entries that
/// do not convert are logged and dropped so their siblings still load.
fn lenient_entries<'de, D, T>(deserializer: D) -> std::result::Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw = Option::<IndexMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    let mut entries = IndexMap::with_capacity(raw.len());
    for (name, value) in raw {
        let value = match value {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        match serde_json::from_value::<T>(value) {
            Ok(entry) => {
                entries.insert(name, entry);
            }
            Err(e) => warn!(entry = %name, error = %e, "skipping malformed config entry"),
        }
    }
    Ok(entries)
}

// ── Top level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub version: u32,
    #[serde(deserialize_with = "nullable")]
    pub settings: Settings,
    #[serde(deserialize_with = "nullable")]
    pub defaults: Defaults,
    #[serde(deserialize_with = "lenient_entries")]
    pub servers: IndexMap<String, ServerConfig>,
    #[serde(deserialize_with = "lenient_entries")]
    pub rules: IndexMap<String, RuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            settings: Settings::default(),
            defaults: Defaults::default(),
            servers: IndexMap::new(),
            rules: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub shutdown_timeout: String,
    pub empty_server_check_interval: String,
    pub status_refresh_interval: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shutdown_timeout: "30s".into(),
            empty_server_check_interval: "5m".into(),
            status_refresh_interval: "10s".into(),
        }
    }
}

impl Settings {
    pub fn shutdown_timeout(&self) -> Duration {
        parse_duration_or(Some(&self.shutdown_timeout), Duration::from_secs(30))
    }

    pub fn empty_server_check_interval(&self) -> Duration {
        parse_duration_or(Some(&self.empty_server_check_interval), Duration::from_secs(300))
    }

    pub fn status_refresh_interval(&self) -> Duration {
        parse_duration_or(Some(&self.status_refresh_interval), Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub server: Option<ServerConfig>,
}

// ── Component blocks ────────────────────────────────────────────────

/// Anything the registries can build from: a type name plus parameters.
pub trait TypedConfig {
    fn type_name(&self) -> &str;
    fn params(&self) -> &Params;

    fn accessor(&self) -> ConfigAccessor<'_> {
        ConfigAccessor::new(self.params(), self.type_name())
    }
}

/// A `{type: {params}}` block (or the flat `{type: name, ...params}` form).
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentConfig {
    pub type_name: String,
    pub params: Params,
}

pub type TriggerConfig = ComponentConfig;
pub type TemplateConfig = ComponentConfig;
pub type ConditionCheck = ComponentConfig;

impl ComponentConfig {
    pub fn new(type_name: impl Into<String>, params: Params) -> Self {
        Self {
            type_name: type_name.into(),
            params,
        }
    }

    pub fn from_value(value: &Value) -> std::result::Result<Self, ConfigError> {
        let map = value
            .as_object()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ConfigError::Malformed(format!("expected a single-key map, got {value}")))?;

        if let Some(Value::String(type_name)) = map.get("type") {
            let mut params = map.clone();
            params.remove("type");
            return Ok(Self::new(type_name.clone(), params));
        }

        let (type_name, inner) = map
            .iter()
            .next()
            .ok_or_else(|| ConfigError::Malformed("empty map".into()))?;
        let params = inner.as_object().cloned().unwrap_or_default();
        Ok(Self::new(type_name.clone(), params))
    }
}

impl TypedConfig for ComponentConfig {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn params(&self) -> &Params {
        &self.params
    }
}

/// An action block. `wait_for_completion` (default true) is read from the
/// parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionConfig {
    pub type_name: String,
    pub params: Params,
    pub wait_for_completion: bool,
}

impl ActionConfig {
    pub fn new(type_name: impl Into<String>, params: Params) -> Self {
        let wait_for_completion = match params.get("wait_for_completion") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => parse_bool(s).unwrap_or(true),
            _ => true,
        };
        Self {
            type_name: type_name.into(),
            params,
            wait_for_completion,
        }
    }

    pub fn from_value(value: &Value) -> std::result::Result<Self, ConfigError> {
        let component = ComponentConfig::from_value(value)?;
        Ok(Self::new(component.type_name, component.params))
    }

    /// Parse a list of action blocks, dropping malformed entries.
    pub fn parse_list(items: &[Value], owner: &str) -> Vec<ActionConfig> {
        items
            .iter()
            .filter_map(|item| match ActionConfig::from_value(item) {
                Ok(action) => Some(action),
                Err(e) => {
                    warn!(owner, error = %e, "skipping malformed action");
                    None
                }
            })
            .collect()
    }
}

impl TypedConfig for ActionConfig {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn params(&self) -> &Params {
        &self.params
    }
}

/// `conditions: {mode, checks}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionConfig {
    /// `all` (default) or `any`; anything other than `any` means all.
    pub mode: Option<String>,
    pub checks: Vec<ConditionCheck>,
}

impl ConditionConfig {
    pub fn is_any(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("any"))
    }

    /// Build from any map holding `mode` and `checks` (also used by the
    /// `if`/`while` actions).
    pub fn from_params(params: &Params, owner: &str) -> Self {
        let mode = params.get("mode").and_then(Value::as_str).map(str::to_string);
        let checks = params
            .get("checks")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match ComponentConfig::from_value(item) {
                        Ok(check) => Some(check),
                        Err(e) => {
                            warn!(owner, error = %e, "skipping malformed condition check");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { mode, checks }
    }
}

// ── Rules ───────────────────────────────────────────────────────────

/// One named rule: either triggers, conditions and actions, or a template.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct RuleConfig {
    pub enabled: bool,
    pub template: Option<TemplateConfig>,
    pub triggers: Vec<TriggerConfig>,
    pub conditions: Option<ConditionConfig>,
    pub actions: Vec<ActionConfig>,
}

impl RuleConfig {
    pub fn is_template_rule(&self) -> bool {
        self.template.is_some()
    }
}

impl TryFrom<Value> for RuleConfig {
    type Error = ConfigError;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err(ConfigError::Malformed("rule must be a map".into()));
        };

        let enabled = match map.get("enabled") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => ConfigAccessor::new(&map, "rule").get_bool("enabled", true),
        };

        if let Some(name) = map.get("template").and_then(Value::as_str).map(str::to_string) {
            if !name.trim().is_empty() {
                if ["triggers", "action", "actions", "conditions"]
                    .iter()
                    .any(|k| map.contains_key(*k))
                {
                    warn!(template = %name, "template rules ignore triggers, actions and conditions");
                }
                map.remove("template");
                map.remove("enabled");
                return Ok(Self {
                    enabled,
                    template: Some(ComponentConfig::new(name, map)),
                    ..Default::default()
                });
            }
        }

        let triggers = map
            .get("triggers")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match ComponentConfig::from_value(item) {
                        Ok(t) => Some(t),
                        Err(e) => {
                            warn!(error = %e, "skipping malformed trigger");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let conditions = map
            .get("conditions")
            .and_then(Value::as_object)
            .map(|c| ConditionConfig::from_params(c, "conditions"));

        let actions = map
            .get("action")
            .or_else(|| map.get("actions"))
            .and_then(Value::as_array)
            .map(|items| ActionConfig::parse_list(items, "rule"))
            .unwrap_or_default();

        Ok(Self {
            enabled,
            template: None,
            triggers,
            conditions,
            actions,
        })
    }
}
