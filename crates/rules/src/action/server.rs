use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{rule_name, Action};
use crate::config::{ActionConfig, TypedConfig};
use crate::context::ExecutionContext;
use crate::error::{ActionError, CreateError};
use crate::registry::ActionContext;

/// Shared shape of the single-server lifecycle actions.
struct ServerTarget {
    server: String,
    bundle: Arc<ActionContext>,
}

impl ServerTarget {
    fn from_config(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Self, CreateError> {
        Ok(Self {
            server: config.accessor().require_string("server")?,
            bundle: Arc::clone(bundle),
        })
    }

    fn resolve(&self, ctx: &ExecutionContext) -> String {
        self.bundle.resolver.resolve(&self.server, ctx)
    }
}

// ── start ───────────────────────────────────────────────────────────

pub struct StartAction(ServerTarget);

impl StartAction {
    pub const NAME: &'static str = "start";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        Ok(Arc::new(Self(ServerTarget::from_config(config, bundle)?)))
    }
}

#[async_trait]
impl Action for StartAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let server = self.0.resolve(ctx);
        let bundle = &self.0.bundle;
        if bundle.servers.is_online(&server) {
            info!(rule = %rule_name(ctx), %server, "server already online");
            return Ok(());
        }
        if bundle.servers.start_server(&server, false).await? {
            bundle.startup.begin_startup(&server);
            info!(rule = %rule_name(ctx), %server, "server starting");
            Ok(())
        } else {
            Err(ActionError::Failed(format!("failed to start server '{server}'")))
        }
    }
}

// ── stop ────────────────────────────────────────────────────────────

pub struct StopAction(ServerTarget);

impl StopAction {
    pub const NAME: &'static str = "stop";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        Ok(Arc::new(Self(ServerTarget::from_config(config, bundle)?)))
    }
}

#[async_trait]
impl Action for StopAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let server = self.0.resolve(ctx);
        let bundle = &self.0.bundle;
        if !bundle.servers.stop_server(&server).await? {
            return Err(ActionError::Failed(format!("failed to stop server '{server}'")));
        }
        bundle.startup.clear_startup(&server);
        info!(rule = %rule_name(ctx), %server, "server stopped");
        Ok(())
    }
}

// ── restart ─────────────────────────────────────────────────────────

pub struct RestartAction(ServerTarget);

impl RestartAction {
    pub const NAME: &'static str = "restart";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        Ok(Arc::new(Self(ServerTarget::from_config(config, bundle)?)))
    }
}

#[async_trait]
impl Action for RestartAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let server = self.0.resolve(ctx);
        let bundle = &self.0.bundle;
        if !bundle.servers.restart_server(&server).await? {
            return Err(ActionError::Failed(format!("failed to restart server '{server}'")));
        }
        bundle.startup.begin_startup(&server);
        info!(rule = %rule_name(ctx), %server, "server restarting");
        Ok(())
    }
}

// ── send_command ────────────────────────────────────────────────────

pub struct SendCommandAction {
    target: ServerTarget,
    command: String,
}

impl SendCommandAction {
    pub const NAME: &'static str = "send_command";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        Ok(Arc::new(Self {
            target: ServerTarget::from_config(config, bundle)?,
            command: config.accessor().require_string("command")?,
        }))
    }
}

#[async_trait]
impl Action for SendCommandAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let server = self.target.resolve(ctx);
        let resolved = self.target.bundle.resolver.resolve(&self.command, ctx);
        let command = resolved.trim().trim_start_matches('/');
        if command.is_empty() {
            warn!(rule = %rule_name(ctx), %server, "send_command resolved to an empty command");
            return Ok(());
        }
        if self.target.bundle.servers.send_command(&server, command).await? {
            info!(rule = %rule_name(ctx), %server, command, "command sent");
            Ok(())
        } else {
            Err(ActionError::Failed(format!("server '{server}' did not accept command '{command}'")))
        }
    }
}
