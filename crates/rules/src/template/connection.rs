//! `start_on_connection`: start a server when a player tries to join it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{params, required_servers, run_in_order, Recipe, Template};
use crate::action::{Action, StartAction};
use crate::config::{ActionConfig, ConfigAccessor, TemplateConfig, TypedConfig};
use crate::context::ExecutionContext;
use crate::error::{ConfigError, CreateError};
use crate::host::{ConnectionRequest, CONNECTION_ATTACHMENT};
use crate::registry::{ActionContext, TemplateContext};
use crate::trigger::{ConnectionTrigger, ListMode, NameFilter};

const DEFAULT_DISCONNECT_MESSAGE: &str =
    "${connection.server.name} is currently ${${connection.server.name}.state}. Try again in a few seconds.";
const TIMED_OUT_MESSAGE: &str = "Server startup timed out. Please try again.";

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const HOLD_TIMEOUT: Duration = Duration::from_secs(30);
const WAITING_SERVER_TIMEOUT: Duration = Duration::from_secs(30);
const TARGET_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// What happens to the connecting player while the target starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Start the server; the connection proceeds untouched.
    #[default]
    None,
    /// Refuse the connection with `disconnect_message`.
    Disconnect,
    /// Hold the connection until the server is online (30s at most).
    Hold,
    /// Send the player to `waiting_server.server`, then on to the target.
    WaitingServer,
}

impl FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "none" => Ok(Self::None),
            "disconnect" => Ok(Self::Disconnect),
            "hold" => Ok(Self::Hold),
            "waiting_server" => Ok(Self::WaitingServer),
            other => Err(ConfigError::invalid(
                StartOnConnection::NAME,
                "mode",
                other,
                "none, disconnect, hold or waiting_server",
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct WaitingServer {
    server: String,
    start_on_connection: bool,
    message: Option<String>,
}

impl WaitingServer {
    fn from_config(config: &TemplateConfig) -> Result<Self, ConfigError> {
        let section = config.accessor().get_map("waiting_server");
        let access = ConfigAccessor::new(&section, config.type_name());
        let server = access
            .get_string("server")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::required(config.type_name(), "waiting_server.server"))?;

        let enabled = access.get_bool("start_waiting_server_on_connection", true);

        let message_section = access.get_map("message");
        let message_access = ConfigAccessor::new(&message_section, config.type_name());
        let message = if message_access.get_bool("enabled", false) {
            message_access.get_string("message").filter(|m| !m.trim().is_empty())
        } else {
            None
        };

        Ok(Self {
            server,
            start_on_connection: enabled,
            message,
        })
    }
}

/// Firing logic, shared by every firing of one template instance.
struct Handler {
    mode: ConnectionMode,
    disconnect_message: String,
    waiting: Option<WaitingServer>,
    start: Arc<dyn Action>,
    bundle: Arc<ActionContext>,
}

pub struct StartOnConnection;

impl StartOnConnection {
    pub const NAME: &'static str = "start_on_connection";

    pub fn create(config: &TemplateConfig, ctx: &Arc<TemplateContext>) -> Result<Arc<dyn Template>, CreateError> {
        let servers = required_servers(config)?;
        let access = config.accessor();
        let mode = match access.get_string("mode") {
            None => ConnectionMode::None,
            Some(raw) => raw.parse::<ConnectionMode>().unwrap_or_else(|e| {
                warn!(template = Self::NAME, error = %e, "unknown mode, using none");
                ConnectionMode::None
            }),
        };
        let waiting = match mode {
            ConnectionMode::WaitingServer => Some(WaitingServer::from_config(config)?),
            _ => None,
        };
        let disconnect_message = access
            .get_string("disconnect_message")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DISCONNECT_MESSAGE.to_string());

        let players = access.get_string_list("players");
        let trigger = Arc::new(ConnectionTrigger::new(
            &ctx.triggers,
            NameFilter::new(ListMode::Whitelist, servers),
            NameFilter::new(ListMode::Whitelist, players),
            mode != ConnectionMode::None,
        ));

        // The server to start is whichever one the firing's player targeted.
        let start = StartAction::create(
            &ActionConfig::new(
                StartAction::NAME,
                params(serde_json::json!({ "server": "${connection.server.name}" })),
            ),
            &ctx.actions,
        )?;
        let handler = Arc::new(Handler {
            mode,
            disconnect_message,
            waiting,
            start,
            bundle: Arc::clone(&ctx.actions),
        });

        Ok(Arc::new(Recipe::new(Self::NAME, trigger, &ctx.executor, move |run_ctx| {
            let handler = Arc::clone(&handler);
            async move { handler.handle(run_ctx).await }
        })))
    }
}

impl Handler {
    async fn handle(&self, ctx: Arc<ExecutionContext>) {
        let (Some(target), Some(request)) = (
            ctx.get_str("connection.server.name"),
            ctx.attachment::<ConnectionRequest>(CONNECTION_ATTACHMENT),
        ) else {
            warn!(template = StartOnConnection::NAME, "firing without a pending connection");
            return;
        };
        let rule = crate::action::rule_name(&ctx);
        let servers = &self.bundle.servers;

        if servers.is_online(&target) {
            debug!(rule = %rule, server = %target, "target already online");
            if self.mode != ConnectionMode::None {
                self.allow(&request, &target, &ctx);
            }
            return;
        }

        match self.mode {
            ConnectionMode::None => self.start_target(&ctx).await,
            ConnectionMode::Disconnect => {
                self.refuse(&request, &ctx).await;
                self.start_target(&ctx).await;
            }
            ConnectionMode::Hold => {
                self.start_target(&ctx).await;
                if self.wait_online(&target, HOLD_TIMEOUT).await {
                    self.allow(&request, &target, &ctx);
                } else {
                    warn!(rule = %rule, server = %target, "server not online in time, refusing held connection");
                    self.refuse(&request, &ctx).await;
                }
            }
            ConnectionMode::WaitingServer => self.via_waiting_server(&request, &target, &ctx).await,
        }
    }

    async fn via_waiting_server(&self, request: &ConnectionRequest, target: &str, ctx: &Arc<ExecutionContext>) {
        let Some(waiting) = &self.waiting else {
            return;
        };
        let rule = crate::action::rule_name(ctx);
        let player = request.player().to_string();

        if !self.ensure_waiting_online(waiting, ctx).await {
            warn!(rule = %rule, waiting_server = %waiting.server, "waiting server unavailable");
            self.refuse(request, ctx).await;
            return;
        }
        self.allow(request, &waiting.server, ctx);

        self.start_target(ctx).await;
        if let Some(message) = &waiting.message {
            let message = self.bundle.resolver.resolve(message, ctx);
            self.bundle.players.send_message(&player, &message).await;
        }

        if self.wait_online(target, TARGET_TIMEOUT).await {
            sleep(SETTLE_DELAY).await;
            info!(rule = %rule, %player, server = target, "target online, moving player");
            if !self.bundle.players.connect(&player, target).await {
                warn!(rule = %rule, %player, server = target, "could not move player to target");
            }
        } else {
            warn!(rule = %rule, %player, server = target, "timed out waiting for target");
            self.bundle.players.send_message(&player, TIMED_OUT_MESSAGE).await;
        }
    }

    async fn ensure_waiting_online(&self, waiting: &WaitingServer, ctx: &Arc<ExecutionContext>) -> bool {
        let servers = &self.bundle.servers;
        if servers.is_online(&waiting.server) {
            return true;
        }
        if !waiting.start_on_connection {
            return false;
        }
        match servers.start_server(&waiting.server, false).await {
            Ok(true) => {
                self.bundle.startup.begin_startup(&waiting.server);
            }
            Ok(false) => return false,
            Err(e) => {
                warn!(rule = %crate::action::rule_name(ctx), error = %e, "could not start waiting server");
                return false;
            }
        }
        self.wait_online(&waiting.server, WAITING_SERVER_TIMEOUT).await
    }

    async fn start_target(&self, ctx: &Arc<ExecutionContext>) {
        run_in_order(std::slice::from_ref(&self.start), ctx).await;
    }

    fn allow(&self, request: &ConnectionRequest, server: &str, ctx: &ExecutionContext) {
        request.allow(server);
        ctx.release_event();
        debug!(player = request.player(), server, "connection allowed");
    }

    async fn refuse(&self, request: &ConnectionRequest, ctx: &ExecutionContext) {
        let message = self.bundle.resolver.resolve(&self.disconnect_message, ctx);
        request.deny();
        ctx.release_event();
        self.bundle.players.disconnect(request.player(), &message).await;
    }

    /// Poll until `server` is online or `timeout` passes.
    async fn wait_online(&self, server: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.bundle.servers.is_online(server) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
