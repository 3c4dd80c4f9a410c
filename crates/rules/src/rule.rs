//! A configured rule bound to its live triggers or template.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::RuleConfig;
use crate::executor::RuleExecutor;
use crate::template::Template;
use crate::trigger::{ExecutionCallback, Trigger};

pub struct Rule {
    name: String,
    config: Arc<RuleConfig>,
    triggers: Vec<Arc<dyn Trigger>>,
    template: Option<Arc<dyn Template>>,
    active: AtomicBool,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .field("triggers", &self.trigger_types())
            .field("template", &self.template.as_ref().map(|t| t.type_name()))
            .field("active", &self.is_active())
            .finish()
    }
}

impl Rule {
    pub fn new(name: impl Into<String>, config: Arc<RuleConfig>, triggers: Vec<Arc<dyn Trigger>>) -> Self {
        Self {
            name: name.into(),
            config,
            triggers,
            template: None,
            active: AtomicBool::new(false),
        }
    }

    pub fn from_template(name: impl Into<String>, config: Arc<RuleConfig>, template: Arc<dyn Template>) -> Self {
        Self {
            name: name.into(),
            config,
            triggers: Vec::new(),
            template: Some(template),
            active: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<RuleConfig> {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }

    pub fn triggers(&self) -> &[Arc<dyn Trigger>] {
        &self.triggers
    }

    pub fn trigger_types(&self) -> Vec<&'static str> {
        self.triggers.iter().map(|t| t.type_name()).collect()
    }

    /// Bind every trigger (or the template) to `executor`. No-op when
    /// already active.
    pub fn activate(&self, executor: &Arc<RuleExecutor>) {
        if self.active.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(template) = &self.template {
            template.activate(&self.name);
        } else {
            let callback = self.callback(executor);
            for trigger in &self.triggers {
                trigger.activate(&self.name, Arc::clone(&callback));
            }
        }
        debug!(rule = %self.name, triggers = self.triggers.len(), template = self.is_template(), "rule activated");
    }

    /// Unbind everything. No-op when inactive.
    pub fn deactivate(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(template) = &self.template {
            template.deactivate();
        }
        for trigger in &self.triggers {
            trigger.deactivate();
        }
        debug!(rule = %self.name, "rule deactivated");
    }

    fn callback(&self, executor: &Arc<RuleExecutor>) -> ExecutionCallback {
        let executor = Arc::clone(executor);
        let config = Arc::clone(&self.config);
        let name = self.name.clone();
        Arc::new(move |ctx| executor.execute(&name, Arc::clone(&config), ctx))
    }
}
