//! Actions that act on a connecting or connected player.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{rule_name, Action};
use crate::config::{ActionConfig, TypedConfig};
use crate::context::ExecutionContext;
use crate::error::{ActionError, CreateError};
use crate::host::{ConnectionRequest, CONNECTION_ATTACHMENT};
use crate::registry::ActionContext;

const DEFAULT_PLAYER: &str = "${connection.player.name}";
const DEFAULT_SERVER: &str = "${connection.server.name}";

/// A resolved player name, or a failure when the placeholder stayed
/// unresolved (no connection in this firing).
fn resolve_player(raw: &str, bundle: &ActionContext, ctx: &ExecutionContext) -> Result<String, ActionError> {
    let player = bundle.resolver.resolve(raw, ctx);
    if player.trim().is_empty() || player.contains("${") {
        return Err(ActionError::Failed(format!("no player to target (resolved '{player}')")));
    }
    Ok(player)
}

// ── allow_connection ────────────────────────────────────────────────

pub struct AllowConnectionAction {
    server: String,
    bundle: Arc<ActionContext>,
}

impl AllowConnectionAction {
    pub const NAME: &'static str = "allow_connection";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        Ok(Arc::new(Self {
            server: config.accessor().string_or("server", DEFAULT_SERVER),
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for AllowConnectionAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let request = ctx
            .attachment::<ConnectionRequest>(CONNECTION_ATTACHMENT)
            .ok_or_else(|| ActionError::Failed("no pending connection in this firing".into()))?;
        let server = self.bundle.resolver.resolve(&self.server, ctx);
        request.allow(server.clone());
        ctx.release_event();
        info!(rule = %rule_name(ctx), player = request.player(), %server, "connection allowed");
        Ok(())
    }
}

// ── send_message ────────────────────────────────────────────────────

pub struct SendMessageAction {
    message: String,
    player: String,
    bundle: Arc<ActionContext>,
}

impl SendMessageAction {
    pub const NAME: &'static str = "send_message";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        let params = config.accessor();
        Ok(Arc::new(Self {
            message: params.require_string("message")?,
            player: params.string_or("player", DEFAULT_PLAYER),
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for SendMessageAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let player = resolve_player(&self.player, &self.bundle, ctx)?;
        let message = self.bundle.resolver.resolve(&self.message, ctx);
        if self.bundle.players.send_message(&player, &message).await {
            Ok(())
        } else {
            Err(ActionError::Failed(format!("could not message player '{player}'")))
        }
    }
}

// ── disconnect ──────────────────────────────────────────────────────

pub struct DisconnectAction {
    player: String,
    reason: Option<String>,
    bundle: Arc<ActionContext>,
}

impl DisconnectAction {
    pub const NAME: &'static str = "disconnect";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        let params = config.accessor();
        Ok(Arc::new(Self {
            player: params.string_or("player", DEFAULT_PLAYER),
            reason: params.get_string("reason"),
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for DisconnectAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let player = resolve_player(&self.player, &self.bundle, ctx)?;
        let reason = self
            .bundle
            .resolver
            .resolve_opt(self.reason.as_deref(), ctx)
            .unwrap_or_default();

        // A player still connecting is refused rather than kicked.
        if let Some(request) = ctx.attachment::<ConnectionRequest>(CONNECTION_ATTACHMENT) {
            if request.player() == player {
                request.deny();
                ctx.release_event();
            }
        }

        debug!(rule = %rule_name(ctx), %player, "disconnecting player");
        if self.bundle.players.disconnect(&player, &reason).await {
            Ok(())
        } else {
            Err(ActionError::Failed(format!("could not disconnect player '{player}'")))
        }
    }
}

// ── connect ─────────────────────────────────────────────────────────

pub struct ConnectAction {
    server: String,
    player: String,
    bundle: Arc<ActionContext>,
}

impl ConnectAction {
    pub const NAME: &'static str = "connect";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        let params = config.accessor();
        Ok(Arc::new(Self {
            server: params.require_string("server")?,
            player: params.string_or("player", DEFAULT_PLAYER),
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for ConnectAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let player = resolve_player(&self.player, &self.bundle, ctx)?;
        let server = self.bundle.resolver.resolve(&self.server, ctx);
        if self.bundle.players.connect(&player, &server).await {
            info!(rule = %rule_name(ctx), %player, %server, "player sent to server");
            Ok(())
        } else {
            Err(ActionError::Failed(format!("could not connect '{player}' to '{server}'")))
        }
    }
}
