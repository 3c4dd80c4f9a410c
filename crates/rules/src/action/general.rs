use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autostart_core::control::{run_command, CommandSpec, DEFAULT_COMMAND_TIMEOUT};
use tracing::{debug, error, info, trace, warn};

use super::{rule_name, Action};
use crate::config::{render_value, ActionConfig, TypedConfig};
use crate::context::ExecutionContext;
use crate::error::{ActionError, ConfigError, CreateError};
use crate::registry::ActionContext;

// ── log ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(ConfigError::invalid(
                LogAction::NAME,
                "level",
                other,
                "trace, debug, info, warn or error",
            )),
        }
    }
}

pub struct LogAction {
    message: String,
    level: String,
    bundle: Arc<ActionContext>,
}

impl LogAction {
    pub const NAME: &'static str = "log";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        let params = config.accessor();
        Ok(Arc::new(Self {
            message: params.require_string("message")?,
            level: params.string_or("level", "info"),
            bundle: Arc::clone(bundle),
        }))
    }

    /// The line as emitted: `(rule) message`.
    pub fn render(&self, ctx: &ExecutionContext) -> String {
        let message = self.bundle.resolver.resolve(&self.message, ctx);
        format!("({}) {message}", rule_name(ctx))
    }
}

#[async_trait]
impl Action for LogAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let line = self.render(ctx);
        match self.bundle.resolver.resolve_enum(&self.level, ctx, LogLevel::Info) {
            LogLevel::Trace => trace!(target: "autostart::rule", "{line}"),
            LogLevel::Debug => debug!(target: "autostart::rule", "{line}"),
            LogLevel::Info => info!(target: "autostart::rule", "{line}"),
            LogLevel::Warn => warn!(target: "autostart::rule", "{line}"),
            LogLevel::Error => error!(target: "autostart::rule", "{line}"),
        }
        Ok(())
    }
}

// ── sleep ───────────────────────────────────────────────────────────

pub struct SleepAction {
    duration: String,
    bundle: Arc<ActionContext>,
}

impl SleepAction {
    pub const NAME: &'static str = "sleep";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        Ok(Arc::new(Self {
            duration: config.accessor().require_string("duration")?,
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for SleepAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let raw = self.bundle.resolver.resolve(&self.duration, ctx);
        let duration = autostart_core::parse_duration(&raw)?;
        debug!(rule = %rule_name(ctx), duration_ms = duration.as_millis() as u64, "sleeping");
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

// ── exec ────────────────────────────────────────────────────────────

pub struct ExecAction {
    command: String,
    working_directory: Option<String>,
    timeout: Option<String>,
    environment: Vec<(String, String)>,
    bundle: Arc<ActionContext>,
}

impl ExecAction {
    pub const NAME: &'static str = "exec";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        let params = config.accessor();
        let environment = params
            .get_map("environment")
            .iter()
            .filter_map(|(k, v)| render_value(v).map(|v| (k.clone(), v)))
            .collect();
        Ok(Arc::new(Self {
            command: params.require_string("command")?,
            working_directory: params.get_string("working_directory"),
            timeout: params.get_string("timeout"),
            environment,
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for ExecAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let resolver = &self.bundle.resolver;
        let rule = rule_name(ctx);
        let owner = format!("rule '{rule}'");
        let command = resolver.resolve(&self.command, ctx);
        let working_directory = resolver.resolve_opt(self.working_directory.as_deref(), ctx);
        let timeout: Duration = self
            .timeout
            .as_deref()
            .map(|raw| resolver.resolve_duration(raw, ctx, DEFAULT_COMMAND_TIMEOUT))
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        let environment: HashMap<String, String> = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), resolver.resolve(v, ctx)))
            .collect();

        let mut spec = CommandSpec::new(&command, Self::NAME, &owner);
        spec.working_directory = working_directory.as_deref();
        spec.timeout = timeout;
        if !environment.is_empty() {
            spec.environment = Some(&environment);
        }

        if run_command(&spec).await? {
            Ok(())
        } else {
            Err(ActionError::Failed(format!("command exited with failure: {command}")))
        }
    }
}
