//! Dependency bundles handed to factories. Built once per load and shared
//! read-only by every instance created from them.

use std::sync::Arc;

use autostart_core::{ServerManager, StartupTracker};

use crate::action::ActionRegistry;
use crate::condition::ConditionEvaluator;
use crate::config::Settings;
use crate::context::VariableResolver;
use crate::executor::{RuleExecutor, TaskScope};
use crate::host::{EventBus, PlayerBridge};

pub struct TriggerContext {
    pub servers: Arc<ServerManager>,
    pub events: Arc<EventBus>,
    pub settings: Settings,
    /// True when rules are rebuilt after a configuration reload rather
    /// than at process start.
    pub is_reload: bool,
}

pub struct ConditionContext {
    pub servers: Arc<ServerManager>,
    pub resolver: Arc<VariableResolver>,
}

pub struct ActionContext {
    pub servers: Arc<ServerManager>,
    pub resolver: Arc<VariableResolver>,
    pub startup: Arc<StartupTracker>,
    pub players: Arc<dyn PlayerBridge>,
    /// Nested action lists (`if`, `while`) are built through this.
    pub actions: Arc<ActionRegistry>,
    pub conditions: Arc<ConditionEvaluator>,
    /// Detached (`wait_for_completion: false`) actions are spawned here.
    pub tasks: TaskScope,
}

/// Templates assemble their own triggers and actions, so they carry the
/// other bundles.
pub struct TemplateContext {
    pub servers: Arc<ServerManager>,
    pub resolver: Arc<VariableResolver>,
    pub startup: Arc<StartupTracker>,
    pub players: Arc<dyn PlayerBridge>,
    pub settings: Settings,
    pub triggers: Arc<TriggerContext>,
    pub actions: Arc<ActionContext>,
    pub executor: Arc<RuleExecutor>,
}
