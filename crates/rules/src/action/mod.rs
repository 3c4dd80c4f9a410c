//! Units of work run by a rule firing.
//!
//! Actions are built from their config block when the firing reaches them
//! and run strictly in declared order. `wait_for_completion: false` detaches
//! the action onto the executor's task scope and moves on.

mod flow;
mod general;
mod player;
mod server;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ActionConfig;
use crate::context::ExecutionContext;
use crate::error::ActionError;
use crate::registry::{ActionContext, CatalogEntry, Registry};

pub use flow::{IfAction, WhileAction};
pub use general::{ExecAction, LogAction, LogLevel, SleepAction};
pub use player::{AllowConnectionAction, ConnectAction, DisconnectAction, SendMessageAction};
pub use server::{RestartAction, SendCommandAction, StartAction, StopAction};

#[async_trait]
pub trait Action: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Run once against `ctx`. String parameters are resolved here, not at
    /// creation, so they see the variables of this firing.
    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError>;
}

pub type ActionRegistry = Registry<ActionConfig, ActionContext, dyn Action>;
pub type ActionEntry = CatalogEntry<ActionConfig, ActionContext, dyn Action>;

pub fn catalog() -> Vec<ActionEntry> {
    vec![
        CatalogEntry::new(StartAction::NAME, StartAction::create),
        CatalogEntry::new(StopAction::NAME, StopAction::create),
        CatalogEntry::new(RestartAction::NAME, RestartAction::create),
        CatalogEntry::new(SendCommandAction::NAME, SendCommandAction::create),
        CatalogEntry::new(LogAction::NAME, LogAction::create),
        CatalogEntry::new(SleepAction::NAME, SleepAction::create),
        CatalogEntry::new(ExecAction::NAME, ExecAction::create),
        CatalogEntry::new(IfAction::NAME, IfAction::create),
        CatalogEntry::new(WhileAction::NAME, WhileAction::create),
        CatalogEntry::new(AllowConnectionAction::NAME, AllowConnectionAction::create),
        CatalogEntry::new(SendMessageAction::NAME, SendMessageAction::create),
        CatalogEntry::new(DisconnectAction::NAME, DisconnectAction::create),
        CatalogEntry::new(ConnectAction::NAME, ConnectAction::create),
        // Ping responses and on-screen UI need a host with those surfaces.
        CatalogEntry::known("deny_ping"),
        CatalogEntry::known("allow_ping"),
        CatalogEntry::known("respond_ping"),
        CatalogEntry::known("send_title"),
        CatalogEntry::known("send_action_bar"),
        CatalogEntry::known("show_bossbar"),
        CatalogEntry::known("clear_title"),
        CatalogEntry::known("hide_bossbar"),
    ]
}

/// Registry preloaded with the built-in actions.
pub fn builtin_registry() -> ActionRegistry {
    Registry::new("action", catalog())
}

/// Rule name recorded in the context, for log lines.
pub(crate) fn rule_name(ctx: &ExecutionContext) -> String {
    ctx.get_str("_rule_name").unwrap_or_else(|| "unknown".to_string())
}

// ── Sequencing ──────────────────────────────────────────────────────

/// Run `actions` in order against `ctx`.
///
/// A block that cannot be built is skipped; a failing action is logged and
/// the sequence continues. Detached actions run on `bundle.tasks`.
pub async fn run_actions(bundle: &ActionContext, actions: &[ActionConfig], ctx: &Arc<ExecutionContext>) {
    let rule = rule_name(ctx);
    for (index, config) in actions.iter().enumerate() {
        let action = match bundle.actions.create(config) {
            Ok(Some(action)) => action,
            Ok(None) => continue,
            Err(e) => {
                warn!(rule = %rule, index, error = %e, "skipping action");
                continue;
            }
        };

        if config.wait_for_completion {
            execute_logged(action.as_ref(), ctx, &rule).await;
        } else {
            let ctx = Arc::clone(ctx);
            let rule = rule.clone();
            debug!(rule = %rule, action = action.type_name(), "dispatching detached action");
            bundle.tasks.spawn(async move {
                execute_logged(action.as_ref(), &ctx, &rule).await;
            });
        }
    }
}

pub(crate) async fn execute_logged(action: &dyn Action, ctx: &Arc<ExecutionContext>, rule: &str) {
    debug!(rule, action = action.type_name(), "executing action");
    if let Err(e) = action.execute(ctx).await {
        warn!(rule, action = action.type_name(), error = %e, "action failed");
    }
}
