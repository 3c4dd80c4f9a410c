//! Builds rules from configuration and keeps the active set.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use indexmap::IndexMap;
use tracing::{error, info, warn};

use crate::config::{EngineConfig, RuleConfig};
use crate::executor::{Firing, RuleExecutor};
use crate::rule::Rule;
use crate::template::TemplateRegistry;
use crate::trigger::{Trigger, TriggerRegistry};

/// Outcome of one [`RuleManager::load_rules`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Rules registered, enabled or not.
    pub loaded: usize,
    pub active: usize,
    /// Rules dropped because their template could not be built.
    pub failed: Vec<String>,
}

/// An activated manual trigger and the rule it belongs to.
#[derive(Clone)]
pub struct ManualHandle {
    pub rule: String,
    pub trigger: Arc<dyn Trigger>,
}

impl ManualHandle {
    pub fn fire(&self, args: &[String]) -> Option<Firing> {
        self.trigger.as_manual().and_then(|manual| manual.fire(args))
    }
}

impl std::fmt::Debug for ManualHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualHandle").field("rule", &self.rule).finish()
    }
}

#[derive(Default)]
struct ManagerState {
    rules: IndexMap<String, Arc<Rule>>,
    /// Manual trigger id -> every active manual trigger with that id.
    manual: HashMap<String, Vec<ManualHandle>>,
}

pub struct RuleManager {
    triggers: Arc<TriggerRegistry>,
    templates: Arc<TemplateRegistry>,
    state: RwLock<ManagerState>,
    /// Held for a whole rebuild or clear so two reloads never interleave.
    reload: Mutex<()>,
}

impl std::fmt::Debug for RuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RuleManager")
            .field("rules", &state.rules.len())
            .field("manual_ids", &state.manual.len())
            .finish()
    }
}

impl RuleManager {
    pub fn new(triggers: Arc<TriggerRegistry>, templates: Arc<TemplateRegistry>) -> Self {
        Self {
            triggers,
            templates,
            state: RwLock::new(ManagerState::default()),
            reload: Mutex::new(()),
        }
    }

    /// Replace the rule set with the rules of `config`, activating the
    /// enabled ones against `executor`.
    pub fn load_rules(&self, config: &EngineConfig, executor: &Arc<RuleExecutor>) -> LoadSummary {
        let _reload = self.reload.lock().unwrap_or_else(PoisonError::into_inner);
        self.deactivate_all();

        let mut summary = LoadSummary::default();
        let mut next = ManagerState::default();
        for (name, rule_config) in &config.rules {
            let Some(rule) = self.build_rule(name, rule_config) else {
                summary.failed.push(name.clone());
                continue;
            };
            let rule = Arc::new(rule);
            summary.loaded += 1;

            if rule.is_enabled() {
                rule.activate(executor);
                summary.active += 1;
                for trigger in rule.triggers() {
                    if let Some(manual) = trigger.as_manual() {
                        next.manual.entry(manual.id().to_string()).or_default().push(ManualHandle {
                            rule: name.clone(),
                            trigger: Arc::clone(trigger),
                        });
                    }
                }
            } else {
                info!(rule = %name, "rule disabled, not activating");
            }
            next.rules.insert(name.clone(), rule);
        }

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
        info!(
            loaded = summary.loaded,
            active = summary.active,
            failed = summary.failed.len(),
            "rules loaded"
        );
        summary
    }

    fn build_rule(&self, name: &str, config: &RuleConfig) -> Option<Rule> {
        let shared = Arc::new(config.clone());

        if let Some(template_config) = &config.template {
            return match self.templates.create(template_config) {
                Ok(Some(template)) => Some(Rule::from_template(name, shared, template)),
                Ok(None) => {
                    error!(rule = %name, template = %template_config.type_name, "template could not be created");
                    None
                }
                Err(e) => {
                    error!(rule = %name, error = %e, "invalid template rule");
                    None
                }
            };
        }

        let mut triggers = Vec::with_capacity(config.triggers.len());
        for trigger_config in &config.triggers {
            match self.triggers.create(trigger_config) {
                Ok(Some(trigger)) => triggers.push(trigger),
                Ok(None) => {}
                Err(e) => warn!(rule = %name, error = %e, "skipping trigger"),
            }
        }
        if triggers.is_empty() {
            warn!(rule = %name, "rule has no usable triggers and will never fire");
        }
        Some(Rule::new(name, shared, triggers))
    }

    /// Deactivate every rule and forget them.
    pub fn clear(&self) {
        let _reload = self.reload.lock().unwrap_or_else(PoisonError::into_inner);
        self.deactivate_all();
    }

    fn deactivate_all(&self) {
        let previous = std::mem::take(&mut *self.state.write().unwrap_or_else(PoisonError::into_inner));
        for (name, rule) in &previous.rules {
            if catch_unwind(AssertUnwindSafe(|| rule.deactivate())).is_err() {
                error!(rule = %name, "rule deactivation panicked");
            }
        }
        if !previous.rules.is_empty() {
            info!(count = previous.rules.len(), "rules cleared");
        }
    }

    pub fn rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .get(name)
            .cloned()
    }

    /// All rules in configuration order.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .values()
            .cloned()
            .collect()
    }

    /// Every active manual trigger registered under `id`, one entry per
    /// trigger even when a rule declares the same id twice.
    pub fn manual_triggers(&self, id: &str) -> Vec<ManualHandle> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .manual
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn manual_trigger_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .manual
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Fire every active manual trigger with `id`.
    pub fn fire(&self, id: &str, args: &[String]) -> Vec<Firing> {
        let handles = self.manual_triggers(id);
        if handles.is_empty() {
            warn!(id, "no active manual trigger with this id");
        }
        handles.iter().filter_map(|handle| handle.fire(args)).collect()
    }
}
