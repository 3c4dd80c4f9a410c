use std::sync::Arc;

use autostart_core::ServerManager;
use tracing::{trace, warn};

use super::Condition;
use crate::config::{ConditionCheck, TypedConfig};
use crate::context::{ExecutionContext, VariableResolver};
use crate::error::{ConfigError, CreateError};
use crate::registry::ConditionContext;

// ── string_equals ───────────────────────────────────────────────────

pub struct StringEquals {
    value: String,
    equals: String,
    ignore_case: bool,
    resolver: Arc<VariableResolver>,
}

impl StringEquals {
    pub const NAME: &'static str = "string_equals";

    pub fn create(config: &ConditionCheck, ctx: &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError> {
        let params = config.accessor();
        let value = params
            .get_string("value")
            .ok_or_else(|| ConfigError::required(Self::NAME, "value"))?;
        let equals = params
            .get_string("equals")
            .ok_or_else(|| ConfigError::required(Self::NAME, "equals"))?;
        Ok(Arc::new(Self {
            value,
            equals,
            ignore_case: params.get_bool("ignore_case", false),
            resolver: Arc::clone(&ctx.resolver),
        }))
    }
}

impl Condition for StringEquals {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let value = self.resolver.resolve(&self.value, ctx);
        let equals = self.resolver.resolve(&self.equals, ctx);
        trace!(%value, %equals, ignore_case = self.ignore_case, "string_equals");
        if self.ignore_case {
            value.to_lowercase() == equals.to_lowercase()
        } else {
            value == equals
        }
    }
}

// ── number_compare ──────────────────────────────────────────────────

/// Bounds shared by `number_compare` and `player_count`. `equals` wins
/// when it resolves to a number; unparseable bounds are ignored.
struct Bounds {
    equals: Option<String>,
    min: Option<String>,
    max: Option<String>,
}

impl Bounds {
    fn from_config(config: &ConditionCheck) -> Self {
        let params = config.accessor();
        let non_blank = |key: &str| params.get_string(key).filter(|s| !s.trim().is_empty());
        Self {
            equals: non_blank("equals"),
            min: non_blank("min"),
            max: non_blank("max"),
        }
    }

    fn matches(&self, actual: f64, resolver: &VariableResolver, ctx: &ExecutionContext) -> bool {
        let bound = |raw: &Option<String>| {
            raw.as_deref()
                .map(|r| resolver.resolve_double(r, ctx, f64::NAN))
                .filter(|v| !v.is_nan())
        };
        if let Some(equals) = bound(&self.equals) {
            return actual == equals;
        }
        if bound(&self.min).is_some_and(|min| actual < min) {
            return false;
        }
        if bound(&self.max).is_some_and(|max| actual > max) {
            return false;
        }
        true
    }
}

pub struct NumberCompare {
    value: String,
    bounds: Bounds,
    resolver: Arc<VariableResolver>,
}

impl NumberCompare {
    pub const NAME: &'static str = "number_compare";

    pub fn create(config: &ConditionCheck, ctx: &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError> {
        let value = config
            .accessor()
            .get_string("value")
            .ok_or_else(|| ConfigError::required(Self::NAME, "value"))?;
        Ok(Arc::new(Self {
            value,
            bounds: Bounds::from_config(config),
            resolver: Arc::clone(&ctx.resolver),
        }))
    }
}

impl Condition for NumberCompare {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let actual = self.resolver.resolve_double(&self.value, ctx, f64::NAN);
        if actual.is_nan() {
            warn!(value = %self.value, "number_compare value is not a number");
            return false;
        }
        self.bounds.matches(actual, &self.resolver, ctx)
    }
}

// ── server_status ───────────────────────────────────────────────────

pub struct ServerStatus {
    server: String,
    status: String,
    servers: Arc<ServerManager>,
    resolver: Arc<VariableResolver>,
}

impl ServerStatus {
    pub const NAME: &'static str = "server_status";

    pub fn create(config: &ConditionCheck, ctx: &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError> {
        let params = config.accessor();
        Ok(Arc::new(Self {
            server: params.require_string("server")?,
            status: params.string_or("status", "online"),
            servers: Arc::clone(&ctx.servers),
            resolver: Arc::clone(&ctx.resolver),
        }))
    }
}

impl Condition for ServerStatus {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let server = self.resolver.resolve(&self.server, ctx);
        let expected = self.resolver.resolve(&self.status, ctx);
        let actual = if self.servers.is_online(&server) { "online" } else { "offline" };
        trace!(%server, actual, %expected, "server_status");
        actual.eq_ignore_ascii_case(expected.trim())
    }
}

// ── player_count ────────────────────────────────────────────────────

pub struct PlayerCount {
    server: String,
    bounds: Bounds,
    servers: Arc<ServerManager>,
    resolver: Arc<VariableResolver>,
}

impl PlayerCount {
    pub const NAME: &'static str = "player_count";

    pub fn create(config: &ConditionCheck, ctx: &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError> {
        Ok(Arc::new(Self {
            server: config.accessor().require_string("server")?,
            bounds: Bounds::from_config(config),
            servers: Arc::clone(&ctx.servers),
            resolver: Arc::clone(&ctx.resolver),
        }))
    }
}

impl Condition for PlayerCount {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let server = self.resolver.resolve(&self.server, ctx);
        let count = self.servers.player_count(&server);
        self.bounds.matches(count as f64, &self.resolver, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autostart_core::{ManagedServer, ServerConfig, ServerState};
    use serde_json::json;

    fn bundle() -> Arc<ConditionContext> {
        let servers = Arc::new(ServerManager::new());
        let lobby = servers.insert(ManagedServer::new("lobby", ServerConfig::default(), None));
        lobby.set_state(ServerState::Online);
        lobby.set_players(vec!["a".into(), "b".into(), "c".into()]);
        servers.insert(ManagedServer::new("survival", ServerConfig::default(), None));
        let resolver = Arc::new(VariableResolver::new(Arc::clone(&servers), None));
        Arc::new(ConditionContext { servers, resolver })
    }

    fn check(
        create: fn(&ConditionCheck, &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError>,
        params: serde_json::Value,
    ) -> Arc<dyn Condition> {
        let config = ConditionCheck::new("test", params.as_object().cloned().unwrap());
        create(&config, &bundle()).unwrap()
    }

    #[test]
    fn string_equals_resolves_both_sides() {
        let ctx = ExecutionContext::new();
        ctx.set("who", "Alice");
        assert!(check(StringEquals::create, json!({"value": "${who}", "equals": "Alice"})).evaluate(&ctx));
        assert!(!check(StringEquals::create, json!({"value": "${who}", "equals": "alice"})).evaluate(&ctx));
        assert!(check(
            StringEquals::create,
            json!({"value": "${who}", "equals": "alice", "ignore_case": true})
        )
        .evaluate(&ctx));
    }

    #[test]
    fn string_equals_requires_both_sides() {
        let config = ConditionCheck::new("string_equals", json!({"value": "x"}).as_object().cloned().unwrap());
        assert!(matches!(
            StringEquals::create(&config, &bundle()),
            Err(CreateError::Config(_))
        ));
    }

    #[test]
    fn number_compare_bounds() {
        let ctx = ExecutionContext::new();
        ctx.set("n", 5);
        assert!(check(NumberCompare::create, json!({"value": "${n}", "min": 1, "max": 5})).evaluate(&ctx));
        assert!(!check(NumberCompare::create, json!({"value": "${n}", "max": 4})).evaluate(&ctx));
        assert!(check(NumberCompare::create, json!({"value": "${n}", "equals": "5", "max": 1})).evaluate(&ctx));
        assert!(check(NumberCompare::create, json!({"value": "${n}", "equals": "many", "min": 2})).evaluate(&ctx));
        assert!(!check(NumberCompare::create, json!({"value": "five"})).evaluate(&ctx));
    }

    #[test]
    fn server_status_defaults_to_online() {
        let ctx = ExecutionContext::new();
        assert!(check(ServerStatus::create, json!({"server": "lobby"})).evaluate(&ctx));
        assert!(check(ServerStatus::create, json!({"server": "survival", "status": "OFFLINE"})).evaluate(&ctx));
        assert!(check(ServerStatus::create, json!({"server": "ghost", "status": "offline"})).evaluate(&ctx));
    }

    #[test]
    fn player_count_compares_cached_players() {
        let ctx = ExecutionContext::new();
        assert!(check(PlayerCount::create, json!({"server": "lobby", "equals": 3})).evaluate(&ctx));
        assert!(check(PlayerCount::create, json!({"server": "lobby", "min": 2})).evaluate(&ctx));
        assert!(!check(PlayerCount::create, json!({"server": "survival", "min": 1})).evaluate(&ctx));
    }
}
