use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Process-level settings read from the environment.
///
/// Rule definitions live in the YAML file at [`Config::config_file`]; this
/// struct only locates that file and tunes the daemon around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Directory for persisted state (startup time samples).
    pub data_dir: PathBuf,
    /// Path of the YAML rule configuration.
    pub config_file: PathBuf,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Reload rules automatically when the config file changes.
    pub watch_config: bool,
    /// Overrides `settings.shutdown_timeout` from the YAML file.
    pub shutdown_timeout: Option<Duration>,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `AUTOSTART_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("AUTOSTART_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let data_dir = PathBuf::from(profiled_env_or(p, "AUTOSTART_DATA_DIR", "data"));
        let config_file = profiled_env_opt(p, "AUTOSTART_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.yml"));
        let shutdown_timeout = profiled_env_opt(p, "AUTOSTART_SHUTDOWN_TIMEOUT").and_then(|v| {
            parse_duration(&v)
                .map_err(|e| tracing::warn!(error = %e, "ignoring AUTOSTART_SHUTDOWN_TIMEOUT"))
                .ok()
        });

        Self {
            profile: p.to_string(),
            data_dir,
            config_file,
            log_filter: profiled_env_or(p, "AUTOSTART_LOG", "info"),
            watch_config: profiled_env_bool(p, "AUTOSTART_WATCH", true),
            shutdown_timeout,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  data_dir:     {}", self.data_dir.display());
        tracing::info!("  config_file:  {}", self.config_file.display());
        tracing::info!("  log_filter:   {}", self.log_filter);
        tracing::info!("  watch:        {}", self.watch_config);
        if let Some(timeout) = self.shutdown_timeout {
            tracing::info!("  shutdown:     {:?} (override)", timeout);
        }
    }
}
