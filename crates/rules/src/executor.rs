//! Concurrent rule firing with cooperative shutdown.
//!
//! Every firing is its own task on a shared [`TaskScope`]. Inside a firing,
//! conditions are evaluated first and actions then run strictly in order.
//! Shutdown stops admission, optionally waits for in-flight work, and can
//! escalate to cancelling everything still running.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::action::{run_actions, ActionRegistry};
use crate::condition::ConditionEvaluator;
use crate::config::RuleConfig;
use crate::context::ExecutionContext;

// ── Task scope ──────────────────────────────────────────────────────

/// Tracked, cancellable group of tasks: firings, detached actions and
/// template work all run here.
#[derive(Debug, Clone, Default)]
pub struct TaskScope {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task`; it is dropped at its next await point once the scope
    /// is cancelled.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        })
    }

    /// Tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Allow [`TaskScope::wait`] to finish once the running tasks end.
    pub fn close(&self) {
        self.tracker.close();
    }

    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Firing handle ───────────────────────────────────────────────────

/// Handle to one submitted firing. Dropping it detaches the firing.
#[derive(Debug)]
pub struct Firing {
    handle: Option<JoinHandle<()>>,
}

impl Firing {
    pub(crate) fn rejected() -> Self {
        Self { handle: None }
    }

    /// False when the executor was shutting down and refused the firing.
    pub fn is_accepted(&self) -> bool {
        self.handle.is_some()
    }

    /// Resolves when the firing ends. True if it ran to completion or was
    /// cancelled cleanly; false if it was rejected or panicked.
    pub async fn wait(self) -> bool {
        match self.handle {
            Some(handle) => handle.await.is_ok(),
            None => false,
        }
    }
}

// ── Executor ────────────────────────────────────────────────────────

pub struct RuleExecutor {
    actions: Arc<ActionRegistry>,
    conditions: Arc<ConditionEvaluator>,
    tasks: TaskScope,
    accepting: AtomicBool,
}

impl std::fmt::Debug for RuleExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleExecutor")
            .field("accepting", &self.is_accepting())
            .field("in_flight", &self.tasks.len())
            .finish()
    }
}

impl RuleExecutor {
    pub fn new(actions: Arc<ActionRegistry>, conditions: Arc<ConditionEvaluator>) -> Self {
        Self {
            actions,
            conditions,
            tasks: TaskScope::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Scope shared with detached actions so shutdown covers them too.
    pub fn tasks(&self) -> &TaskScope {
        &self.tasks
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Submit one firing of `rule`.
    pub fn execute(&self, rule: &str, config: Arc<RuleConfig>, ctx: ExecutionContext) -> Firing {
        let actions = Arc::clone(&self.actions);
        let conditions = Arc::clone(&self.conditions);
        let rule_name = rule.to_string();
        self.spawn(rule, async move {
            run_firing(&rule_name, &config, Arc::new(ctx), &actions, &conditions).await;
        })
    }

    /// Run arbitrary work for `rule` under the executor's lifecycle.
    /// Templates use this for their own firing logic.
    pub fn spawn<F>(&self, rule: &str, task: F) -> Firing
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_accepting() {
            debug!(rule, "executor shut down, rejecting firing");
            return Firing::rejected();
        }
        Firing {
            handle: Some(self.tasks.spawn(task)),
        }
    }

    /// Stop accepting firings. In-flight firings keep running.
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            self.tasks.close();
            info!(in_flight = self.tasks.len(), "rule executor shutting down");
        }
    }

    /// Wait up to `timeout` for in-flight firings. True if all finished.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok()
    }

    /// Stop accepting and cancel everything still running.
    pub fn shutdown_now(&self) {
        self.shutdown();
        let remaining = self.tasks.len();
        if remaining > 0 {
            warn!(remaining, "cancelling in-flight firings");
        }
        self.tasks.cancel();
    }
}

async fn run_firing(
    rule: &str,
    config: &RuleConfig,
    ctx: Arc<ExecutionContext>,
    actions: &ActionRegistry,
    conditions: &ConditionEvaluator,
) {
    let started = Instant::now();
    ctx.set("_rule_name", rule);
    debug!(rule, execution = ctx.id(), "firing started");

    if !conditions.evaluate(config.conditions.as_ref(), &ctx) {
        debug!(rule, execution = ctx.id(), "conditions not met, skipping");
        return;
    }

    let Some(bundle) = actions.context() else {
        warn!(rule, "action context not set, skipping actions");
        return;
    };
    run_actions(&bundle, &config.actions, &ctx).await;
    debug!(
        rule,
        execution = ctx.id(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "firing completed"
    );
}
