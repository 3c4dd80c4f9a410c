use std::sync::Arc;

use async_trait::async_trait;
use autostart_core::ServerManager;
use serde_json::Value;
use tracing::{debug, trace};

use super::{trigger_context, ExecutionCallback, NameFilter, Subscription, Trigger};
use crate::config::{TriggerConfig, TypedConfig};
use crate::error::CreateError;
use crate::host::{ConnectionRequest, EventListener, HostEvent, CONNECTION_ATTACHMENT};
use crate::registry::TriggerContext;

/// Fires when a player connects to a server that passes the filters.
///
/// With `deny_connection` the request is denied up front and the host is
/// held until the firing ends or an action releases it (after allowing
/// the connection, for example).
pub struct ConnectionTrigger {
    servers: Arc<ServerManager>,
    server_filter: NameFilter,
    player_filter: NameFilter,
    deny_connection: bool,
    subscription: Subscription,
}

impl ConnectionTrigger {
    pub const NAME: &'static str = "connection";

    pub fn create(config: &TriggerConfig, ctx: &Arc<TriggerContext>) -> Result<Arc<dyn Trigger>, CreateError> {
        Ok(Arc::new(Self::new(
            ctx,
            NameFilter::from_params(config.params(), "server_list", "servers"),
            NameFilter::from_params(config.params(), "player_list", "players"),
            config.accessor().get_bool("deny_connection", false),
        )))
    }

    pub fn new(ctx: &TriggerContext, server_filter: NameFilter, player_filter: NameFilter, deny_connection: bool) -> Self {
        Self {
            servers: Arc::clone(&ctx.servers),
            server_filter,
            player_filter,
            deny_connection,
            subscription: Subscription::new(Arc::clone(&ctx.events)),
        }
    }
}

impl Trigger for ConnectionTrigger {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn activate(&self, rule: &str, callback: ExecutionCallback) {
        self.subscription.subscribe(Arc::new(ConnectionListener {
            rule: rule.to_string(),
            callback,
            servers: Arc::clone(&self.servers),
            server_filter: self.server_filter.clone(),
            player_filter: self.player_filter.clone(),
            deny_connection: self.deny_connection,
        }));
        debug!(rule, deny_connection = self.deny_connection, "connection trigger active");
    }

    fn deactivate(&self) {
        self.subscription.cancel();
    }
}

struct ConnectionListener {
    rule: String,
    callback: ExecutionCallback,
    servers: Arc<ServerManager>,
    server_filter: NameFilter,
    player_filter: NameFilter,
    deny_connection: bool,
}

#[async_trait]
impl EventListener for ConnectionListener {
    async fn on_event(&self, event: &HostEvent) {
        let HostEvent::Connection(request) = event else {
            return;
        };
        if !self.server_filter.allows(request.server()) || !self.player_filter.allows(request.player()) {
            trace!(rule = %self.rule, player = request.player(), server = request.server(), "connection filtered out");
            return;
        }

        let ctx = trigger_context(ConnectionTrigger::NAME);
        let server = request.server();
        let players = self.servers.players(server);
        ctx.set("connection.player.name", request.player());
        ctx.set("connection.player.uuid", request.uuid());
        ctx.set("connection.server.name", server);
        ctx.set(
            "connection.server.status",
            if self.servers.is_online(server) { "online" } else { "offline" },
        );
        ctx.set("connection.server.player_count", players.len());
        ctx.set(
            "connection.server.players",
            Value::Array(players.into_iter().map(Value::String).collect()),
        );
        ctx.attach::<ConnectionRequest>(CONNECTION_ATTACHMENT, Arc::clone(request));

        if !self.deny_connection {
            let _ = (self.callback)(ctx);
            return;
        }

        request.deny();
        let release = ctx.release_signal();
        let firing = (self.callback)(ctx);
        tokio::select! {
            _ = firing.wait() => {
                debug!(rule = %self.rule, player = request.player(), "connection held until rule finished");
            }
            _ = release.released() => {
                debug!(rule = %self.rule, player = request.player(), "connection released early");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Params;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn name_filter_modes() {
        let p = params(json!({"server_list": {"servers": ["lobby", "Survival"]}}));
        let white = NameFilter::from_params(&p, "server_list", "servers");
        assert!(white.allows("lobby"));
        assert!(white.allows("survival"));
        assert!(!white.allows("creative"));

        let p = params(json!({"server_list": {"mode": "blacklist", "servers": ["lobby"]}}));
        let black = NameFilter::from_params(&p, "server_list", "servers");
        assert!(!black.allows("lobby"));
        assert!(black.allows("creative"));

        let p = params(json!({"server_list": {"mode": "disabled", "servers": ["lobby"]}}));
        assert!(NameFilter::from_params(&p, "server_list", "servers").allows("creative"));
    }

    #[test]
    fn empty_or_missing_filter_allows_all() {
        let p = params(json!({"player_list": {"mode": "whitelist", "players": []}}));
        assert!(NameFilter::from_params(&p, "player_list", "players").allows("anyone"));
        assert!(NameFilter::from_params(&params(json!({})), "player_list", "players").allows("anyone"));
    }
}
