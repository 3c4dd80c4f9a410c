//! Config-driven automation rules for managed servers.
//!
//! This crate provides:
//! - YAML rule configuration with typed parameter access and hot reload
//! - Capability registries for triggers, conditions, actions and templates
//! - `${...}` variable resolution against firing and server state
//! - A concurrent rule executor with cooperative shutdown
//! - The [`Engine`] facade tying them to a host's event stream

pub mod action;
pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod host;
pub mod manager;
pub mod registry;
pub mod rule;
pub mod template;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigLoader, EngineConfig, RuleConfig};
pub use context::{ExecutionContext, VariableResolver};
pub use engine::Engine;
pub use error::{ActionError, ConfigError, CreateError, RegistryError, Result, RuleError};
pub use executor::{Firing, RuleExecutor};
pub use host::{ConnectionDecision, ConnectionRequest, EventBus, HostEvent, LoggingBridge, PlayerBridge};
pub use manager::{LoadSummary, ManualHandle, RuleManager};
pub use rule::Rule;
