//! Branching and looping over nested action lists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{rule_name, run_actions, Action};
use crate::config::{ActionConfig, ConditionConfig, Params, TypedConfig};
use crate::context::ExecutionContext;
use crate::error::{ActionError, CreateError};
use crate::registry::ActionContext;

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

fn action_list(params: &Params, key: &str, owner: &str) -> Vec<ActionConfig> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| ActionConfig::parse_list(items, owner))
        .unwrap_or_default()
}

/// `{mode, checks}` from `params`, with `mode` falling back to `default_mode`.
fn conditions(params: &Params, default_mode: Option<&str>, owner: &str) -> ConditionConfig {
    let mut spec = ConditionConfig::from_params(params, owner);
    if spec.mode.is_none() {
        spec.mode = default_mode.map(str::to_string);
    }
    spec
}

// ── if ──────────────────────────────────────────────────────────────

struct Branch {
    conditions: ConditionConfig,
    actions: Vec<ActionConfig>,
}

/// Runs the first branch whose conditions pass, or `else`.
pub struct IfAction {
    branches: Vec<Branch>,
    otherwise: Vec<ActionConfig>,
    bundle: Arc<ActionContext>,
}

impl IfAction {
    pub const NAME: &'static str = "if";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        let params = config.params();
        let head = conditions(params, None, Self::NAME);
        let mut branches = vec![Branch {
            actions: action_list(params, "then", Self::NAME),
            conditions: head.clone(),
        }];

        for (index, else_if) in config.accessor().get_map_list("else_if").iter().enumerate() {
            let spec = conditions(else_if, head.mode.as_deref(), Self::NAME);
            if spec.checks.is_empty() {
                warn!(index, "dropping else_if branch without checks");
                continue;
            }
            branches.push(Branch {
                conditions: spec,
                actions: action_list(else_if, "then", Self::NAME),
            });
        }

        Ok(Arc::new(Self {
            branches,
            otherwise: action_list(params, "else", Self::NAME),
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for IfAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let rule = rule_name(ctx);
        for (index, branch) in self.branches.iter().enumerate() {
            if self.bundle.conditions.evaluate(Some(&branch.conditions), ctx) {
                debug!(rule = %rule, branch = index, "if branch taken");
                run_actions(&self.bundle, &branch.actions, ctx).await;
                return Ok(());
            }
        }
        if !self.otherwise.is_empty() {
            debug!(rule = %rule, "if falling through to else");
            run_actions(&self.bundle, &self.otherwise, ctx).await;
        }
        Ok(())
    }
}

// ── while ───────────────────────────────────────────────────────────

/// Repeats `do` while the conditions hold, pausing `update_interval`
/// between iterations. `timeout` bounds the whole loop, including any
/// waited action still running when it expires.
pub struct WhileAction {
    conditions: ConditionConfig,
    body: Vec<ActionConfig>,
    timeout: Option<String>,
    update_interval: Option<String>,
    bundle: Arc<ActionContext>,
}

impl WhileAction {
    pub const NAME: &'static str = "while";

    pub fn create(config: &ActionConfig, bundle: &Arc<ActionContext>) -> Result<Arc<dyn Action>, CreateError> {
        let params = config.params();
        let accessor = config.accessor();
        Ok(Arc::new(Self {
            conditions: conditions(params, None, Self::NAME),
            body: action_list(params, "do", Self::NAME),
            timeout: accessor.get_string("timeout"),
            update_interval: accessor.get_string("update_interval"),
            bundle: Arc::clone(bundle),
        }))
    }
}

#[async_trait]
impl Action for WhileAction {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>) -> Result<(), ActionError> {
        let resolver = &self.bundle.resolver;
        let rule = rule_name(ctx);
        let deadline = self
            .timeout
            .as_deref()
            .map(|raw| resolver.resolve_duration(raw, ctx, Duration::ZERO))
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);
        let interval = self
            .update_interval
            .as_deref()
            .map(|raw| resolver.resolve_duration(raw, ctx, DEFAULT_UPDATE_INTERVAL))
            .unwrap_or(DEFAULT_UPDATE_INTERVAL);

        let mut iterations = 0u64;
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!(rule = %rule, iterations, "while loop timed out");
                break;
            }
            if !self.bundle.conditions.evaluate(Some(&self.conditions), ctx) {
                debug!(rule = %rule, iterations, "while conditions no longer met");
                break;
            }
            iterations += 1;

            let body = run_actions(&self.bundle, &self.body, ctx);
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, body).await.is_err() {
                        debug!(rule = %rule, iterations, "while loop timed out inside body");
                        break;
                    }
                }
                None => body.await,
            }

            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.min(Instant::now() + interval)).await,
                None => tokio::time::sleep(interval).await,
            }
        }
        Ok(())
    }
}
