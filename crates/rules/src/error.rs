//! Error types for the rule engine.

use std::path::PathBuf;

/// Invalid or missing parameter in a trigger/action/condition/template block.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{type_name}: missing required parameter '{key}'")]
    Required { type_name: String, key: String },

    #[error("{type_name}: invalid value '{value}' for '{key}', expected {expected}")]
    Invalid {
        type_name: String,
        key: String,
        value: String,
        expected: String,
    },

    #[error("{0}")]
    Malformed(String),
}

impl ConfigError {
    pub fn required(type_name: &str, key: &str) -> Self {
        Self::Required {
            type_name: type_name.to_string(),
            key: key.to_string(),
        }
    }

    pub fn invalid(type_name: &str, key: &str, value: impl ToString, expected: &str) -> Self {
        Self::Invalid {
            type_name: type_name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Failure raised by a factory while building an instance.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    /// Parameter validation; surfaced to the caller labelled with the type.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Anything else; logged and turned into an absent result.
    #[error("{0}")]
    Failed(String),
}

/// Lookup or construction failure in a capability registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown {kind} type '{name}' (valid: {valid})")]
    UnknownType {
        kind: &'static str,
        name: String,
        valid: String,
    },

    #[error("{kind} type '{name}' has no creator")]
    NoCreator { kind: &'static str, name: String },

    #[error("{kind} context is not set")]
    ContextNotSet { kind: &'static str },

    #[error("failed to create {kind} '{type_name}': {source}")]
    Config {
        kind: &'static str,
        type_name: String,
        #[source]
        source: ConfigError,
    },
}

/// Runtime failure of a single action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Core(#[from] autostart_core::CoreError),

    #[error("{0}")]
    Failed(String),
}

/// Loader and engine errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, RuleError>;
