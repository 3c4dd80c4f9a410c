//! Resource control backends.
//!
//! A [`ServerControl`] knows how to start, stop and restart one managed
//! server. Optional capabilities (ping, state query, console commands) are
//! advertised through the `supports_*` methods; callers must check them before
//! relying on the matching operation.

mod command;
mod shell;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::state::ServerState;

pub use command::{run_command, CommandSpec, DEFAULT_COMMAND_TIMEOUT};
pub use shell::ShellControl;

/// Control surface for a single managed server.
///
/// Operations resolve to `Ok(true)` on success and `Ok(false)` when the
/// backend ran but reported failure.
#[async_trait]
pub trait ServerControl: Send + Sync {
    async fn start(&self) -> Result<bool>;

    async fn stop(&self) -> Result<bool>;

    async fn restart(&self) -> Result<bool>;

    /// Backend identifier as written in config (e.g. "shell").
    fn control_type(&self) -> &str;

    fn supports_ping(&self) -> bool {
        false
    }

    async fn ping(&self) -> Result<bool> {
        Ok(false)
    }

    fn supports_state(&self) -> bool {
        false
    }

    async fn state(&self) -> Result<ServerState> {
        Ok(ServerState::Unknown)
    }

    fn supports_command_sending(&self) -> bool {
        false
    }

    async fn send_command(&self, _command: &str) -> Result<bool> {
        Ok(false)
    }
}

/// `control_api` section of a server definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlApiConfig {
    #[serde(rename = "type", default)]
    pub control_type: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub restart_command: Option<String>,
    #[serde(default)]
    pub send_command_command: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub command_timeout: Option<String>,
    /// Scalar values are stringified; nulls are dropped.
    #[serde(default)]
    pub environment: HashMap<String, serde_json::Value>,
}

impl ControlApiConfig {
    /// Fill unset fields from `defaults`. Environment maps are merged with
    /// this config's entries taking precedence.
    pub fn merged_with(&self, defaults: &ControlApiConfig) -> ControlApiConfig {
        let pick = |own: &Option<String>, fallback: &Option<String>| own.clone().or_else(|| fallback.clone());
        let mut environment = defaults.environment.clone();
        environment.extend(self.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        ControlApiConfig {
            control_type: pick(&self.control_type, &defaults.control_type),
            start_command: pick(&self.start_command, &defaults.start_command),
            stop_command: pick(&self.stop_command, &defaults.stop_command),
            restart_command: pick(&self.restart_command, &defaults.restart_command),
            send_command_command: pick(&self.send_command_command, &defaults.send_command_command),
            working_directory: pick(&self.working_directory, &defaults.working_directory),
            command_timeout: pick(&self.command_timeout, &defaults.command_timeout),
            environment,
        }
    }

    /// Environment variables as strings.
    pub fn environment_strings(&self) -> HashMap<String, String> {
        self.environment
            .iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some((k.clone(), s.clone())),
                other => Some((k.clone(), other.to_string())),
            })
            .collect()
    }
}

/// Build the control backend described by `config` for `server`.
///
/// Only the `shell` backend is built in; other types are rejected.
pub fn create_control(server: &str, config: &ControlApiConfig) -> Result<Arc<dyn ServerControl>> {
    let kind = config
        .control_type
        .as_deref()
        .unwrap_or("shell")
        .to_ascii_lowercase();
    match kind.as_str() {
        "shell" => Ok(Arc::new(ShellControl::from_config(server, config))),
        other => Err(CoreError::UnsupportedControl(other.to_string())),
    }
}
