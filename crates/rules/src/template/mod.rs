//! Prebuilt rules: a trigger and its firing logic in one block.
//!
//! A template owns its trigger. Activation binds the trigger to a callback
//! that runs the template's recipe on the rule executor, so template
//! firings share the executor's admission and shutdown like any rule.

mod connection;
mod lifecycle;


use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use crate::action::{execute_logged, Action};
use crate::config::{ActionConfig, Params, TemplateConfig, TypedConfig};
use crate::context::ExecutionContext;
use crate::error::{ConfigError, CreateError};
use crate::executor::RuleExecutor;
use crate::registry::{ActionContext, CatalogEntry, Registry, TemplateContext};
use crate::trigger::{ExecutionCallback, Trigger};

pub use connection::{ConnectionMode, StartOnConnection};
pub use lifecycle::{StartOnProxyStart, StopOnEmpty, StopOnProxyShutdown};

pub trait Template: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn activate(&self, rule: &str);

    fn deactivate(&self);
}

pub type TemplateRegistry = Registry<TemplateConfig, TemplateContext, dyn Template>;
pub type TemplateEntry = CatalogEntry<TemplateConfig, TemplateContext, dyn Template>;

pub fn catalog() -> Vec<TemplateEntry> {
    vec![
        CatalogEntry::new(StartOnProxyStart::NAME, StartOnProxyStart::create),
        CatalogEntry::new(StopOnProxyShutdown::NAME, StopOnProxyShutdown::create),
        CatalogEntry::new(StopOnEmpty::NAME, StopOnEmpty::create),
        CatalogEntry::new(StartOnConnection::NAME, StartOnConnection::create),
        CatalogEntry::known("respond_ping"),
    ]
}

pub fn builtin_registry() -> TemplateRegistry {
    Registry::new("template", catalog())
}

// ── Recipe ──────────────────────────────────────────────────────────

type RecipeFn = Arc<dyn Fn(Arc<ExecutionContext>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A trigger plus the async work run for each of its firings.
pub(crate) struct Recipe {
    name: &'static str,
    trigger: Arc<dyn Trigger>,
    executor: Arc<RuleExecutor>,
    run: RecipeFn,
}

impl Recipe {
    pub(crate) fn new<F, Fut>(
        name: &'static str,
        trigger: Arc<dyn Trigger>,
        executor: &Arc<RuleExecutor>,
        run: F,
    ) -> Self
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            trigger,
            executor: Arc::clone(executor),
            run: Arc::new(move |ctx| Box::pin(run(ctx))),
        }
    }

    fn callback(&self, rule: &str) -> ExecutionCallback {
        let executor = Arc::clone(&self.executor);
        let run = Arc::clone(&self.run);
        let rule = rule.to_string();
        Arc::new(move |ctx: ExecutionContext| {
            ctx.set("_rule_name", rule.as_str());
            executor.spawn(&rule, run(Arc::new(ctx)))
        })
    }
}

impl Template for Recipe {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn activate(&self, rule: &str) {
        self.trigger.activate(rule, self.callback(rule));
        debug!(rule, template = self.name, trigger = self.trigger.type_name(), "template active");
    }

    fn deactivate(&self) {
        self.trigger.deactivate();
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The non-empty `servers` list every built-in template needs.
pub(crate) fn required_servers(config: &TemplateConfig) -> Result<Vec<String>, ConfigError> {
    let servers: Vec<String> = config
        .accessor()
        .get_string_list("servers")
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if servers.is_empty() {
        return Err(ConfigError::required(config.type_name(), "servers"));
    }
    Ok(servers)
}

pub(crate) type ActionFactory = fn(&ActionConfig, &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError>;

/// Build one `factory` action per server, in order.
pub(crate) fn server_actions<S: AsRef<str>>(
    bundle: &Arc<ActionContext>,
    type_name: &str,
    factory: ActionFactory,
    servers: &[S],
) -> Result<Vec<Arc<dyn Action>>, CreateError> {
    servers
        .iter()
        .map(|server| {
            let params = params(json!({ "server": server.as_ref() }));
            factory(&ActionConfig::new(type_name, params), bundle)
        })
        .collect()
}

/// Run `actions` one after another; failures are logged and skipped.
pub(crate) async fn run_in_order(actions: &[Arc<dyn Action>], ctx: &Arc<ExecutionContext>) {
    let rule = crate::action::rule_name(ctx);
    for action in actions {
        execute_logged(action.as_ref(), ctx, &rule).await;
    }
}

fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}
