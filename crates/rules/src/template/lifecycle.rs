use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use super::{params, required_servers, run_in_order, server_actions, Recipe, Template};
use crate::action::{Action, StartAction, StopAction};
use crate::config::{ActionConfig, TemplateConfig, TypedConfig};
use crate::error::CreateError;
use crate::registry::TemplateContext;
use crate::trigger::{EmptyServerTrigger, ListMode, NameFilter, ProxyShutdownTrigger, ProxyStartTrigger};

const DEFAULT_EMPTY_TIME: Duration = Duration::from_secs(15 * 60);

// ── start_on_proxy_start ────────────────────────────────────────────

/// Starts `servers`, in order, when the process starts.
pub struct StartOnProxyStart;

impl StartOnProxyStart {
    pub const NAME: &'static str = "start_on_proxy_start";

    pub fn create(config: &TemplateConfig, ctx: &Arc<TemplateContext>) -> Result<Arc<dyn Template>, CreateError> {
        let servers = required_servers(config)?;
        let actions: Arc<[Arc<dyn Action>]> =
            server_actions(&ctx.actions, StartAction::NAME, StartAction::create, &servers)?.into();
        let trigger = Arc::new(ProxyStartTrigger::new(&ctx.triggers));
        Ok(Arc::new(Recipe::new(Self::NAME, trigger, &ctx.executor, move |run_ctx| {
            let actions = Arc::clone(&actions);
            async move { run_in_order(&actions, &run_ctx).await }
        })))
    }
}

// ── stop_on_proxy_shutdown ──────────────────────────────────────────

/// Stops `servers`, in order, while the process shuts down. The shutdown
/// waits for this at most `settings.shutdown_timeout`.
pub struct StopOnProxyShutdown;

impl StopOnProxyShutdown {
    pub const NAME: &'static str = "stop_on_proxy_shutdown";

    pub fn create(config: &TemplateConfig, ctx: &Arc<TemplateContext>) -> Result<Arc<dyn Template>, CreateError> {
        let servers = required_servers(config)?;
        let actions: Arc<[Arc<dyn Action>]> =
            server_actions(&ctx.actions, StopAction::NAME, StopAction::create, &servers)?.into();
        let trigger = Arc::new(ProxyShutdownTrigger::new(&ctx.triggers));
        Ok(Arc::new(Recipe::new(Self::NAME, trigger, &ctx.executor, move |run_ctx| {
            let actions = Arc::clone(&actions);
            async move { run_in_order(&actions, &run_ctx).await }
        })))
    }
}

// ── stop_on_empty ───────────────────────────────────────────────────

/// Stops any of `servers` once it has been empty for `empty_time`.
pub struct StopOnEmpty;

impl StopOnEmpty {
    pub const NAME: &'static str = "stop_on_empty";

    pub fn create(config: &TemplateConfig, ctx: &Arc<TemplateContext>) -> Result<Arc<dyn Template>, CreateError> {
        let servers = required_servers(config)?;
        let empty_time = config.accessor().get_duration("empty_time", DEFAULT_EMPTY_TIME);
        if empty_time.is_zero() {
            warn!(template = Self::NAME, "empty_time of zero stops servers as soon as they empty");
        }

        // The emptied server is only known at firing time.
        let stop = StopAction::create(
            &ActionConfig::new(
                StopAction::NAME,
                params(json!({ "server": "${empty_server.server.name}" })),
            ),
            &ctx.actions,
        )?;
        let trigger = Arc::new(EmptyServerTrigger::new(
            &ctx.triggers,
            empty_time,
            NameFilter::new(ListMode::Whitelist, servers),
        ));
        Ok(Arc::new(Recipe::new(Self::NAME, trigger, &ctx.executor, move |run_ctx| {
            let stop = Arc::clone(&stop);
            async move { run_in_order(std::slice::from_ref(&stop), &run_ctx).await }
        })))
    }
}
