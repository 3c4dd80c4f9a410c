use std::sync::Arc;

use tracing::{debug, warn};

use super::ConditionRegistry;
use crate::config::{ConditionConfig, TypedConfig};
use crate::context::ExecutionContext;

/// Evaluates a `{mode, checks}` block against an execution context.
///
/// Checks are created lazily in order, so a short-circuit leaves later
/// checks unbuilt. A check that cannot be created counts as neither pass
/// nor fail.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    registry: Arc<ConditionRegistry>,
}

impl ConditionEvaluator {
    pub fn new(registry: Arc<ConditionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConditionRegistry> {
        &self.registry
    }

    /// `None` (no conditions configured) evaluates to true.
    pub fn evaluate(&self, spec: Option<&ConditionConfig>, ctx: &ExecutionContext) -> bool {
        let Some(spec) = spec else {
            return true;
        };
        let all = !spec.is_any();

        for check in &spec.checks {
            let condition = match self.registry.create(check) {
                Ok(Some(condition)) => condition,
                Ok(None) => continue,
                Err(e) => {
                    warn!(condition = %check.type_name, error = %e, "skipping condition");
                    continue;
                }
            };
            let invert = check.accessor().get_bool("invert", false);
            let passed = condition.evaluate(ctx) != invert;
            debug!(condition = condition.type_name(), passed, invert, "evaluated condition");

            if all && !passed {
                return false;
            }
            if !all && passed {
                return true;
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionEntry};
    use crate::config::{ConditionCheck, Params};
    use crate::context::VariableResolver;
    use crate::error::CreateError;
    use crate::registry::{CatalogEntry, ConditionContext, Registry};
    use autostart_core::ServerManager;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTED_CREATES: AtomicUsize = AtomicUsize::new(0);

    struct Fixed(bool);

    impl Condition for Fixed {
        fn type_name(&self) -> &'static str {
            "fixed"
        }

        fn evaluate(&self, _ctx: &ExecutionContext) -> bool {
            self.0
        }
    }

    fn pass(_: &ConditionCheck, _: &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError> {
        Ok(Arc::new(Fixed(true)))
    }

    fn fail(_: &ConditionCheck, _: &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError> {
        Ok(Arc::new(Fixed(false)))
    }

    fn counted(_: &ConditionCheck, _: &Arc<ConditionContext>) -> Result<Arc<dyn Condition>, CreateError> {
        COUNTED_CREATES.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Fixed(true)))
    }

    fn evaluator() -> ConditionEvaluator {
        let catalog: Vec<ConditionEntry> = vec![
            CatalogEntry::new("pass", pass),
            CatalogEntry::new("fail", fail),
            CatalogEntry::new("counted", counted),
        ];
        let registry = Registry::new("condition", catalog);
        let servers = Arc::new(ServerManager::new());
        let resolver = Arc::new(VariableResolver::new(Arc::clone(&servers), None));
        registry.set_context(Arc::new(ConditionContext { servers, resolver }));
        ConditionEvaluator::new(Arc::new(registry))
    }

    fn check(type_name: &str, params: serde_json::Value) -> ConditionCheck {
        let params: Params = params.as_object().cloned().unwrap_or_default();
        ConditionCheck::new(type_name, params)
    }

    fn spec(mode: Option<&str>, checks: Vec<ConditionCheck>) -> ConditionConfig {
        ConditionConfig {
            mode: mode.map(str::to_string),
            checks,
        }
    }

    #[test]
    fn absent_spec_is_true() {
        assert!(evaluator().evaluate(None, &ExecutionContext::new()));
    }

    #[test]
    fn empty_checks_follow_mode() {
        let ev = evaluator();
        let ctx = ExecutionContext::new();
        assert!(ev.evaluate(Some(&spec(None, vec![])), &ctx));
        assert!(ev.evaluate(Some(&spec(Some("all"), vec![])), &ctx));
        assert!(!ev.evaluate(Some(&spec(Some("ANY"), vec![])), &ctx));
    }

    #[test]
    fn all_mode_short_circuits_before_creating_later_checks() {
        let ev = evaluator();
        let ctx = ExecutionContext::new();
        let before = COUNTED_CREATES.load(Ordering::SeqCst);
        let s = spec(None, vec![check("fail", json!({})), check("counted", json!({}))]);
        assert!(!ev.evaluate(Some(&s), &ctx));
        assert_eq!(COUNTED_CREATES.load(Ordering::SeqCst), before);
    }

    #[test]
    fn any_mode_passes_on_first_success() {
        let ev = evaluator();
        let ctx = ExecutionContext::new();
        let s = spec(Some("any"), vec![check("fail", json!({})), check("pass", json!({}))]);
        assert!(ev.evaluate(Some(&s), &ctx));
        let s = spec(Some("any"), vec![check("fail", json!({})), check("fail", json!({}))]);
        assert!(!ev.evaluate(Some(&s), &ctx));
    }

    #[test]
    fn invert_flips_a_check() {
        let ev = evaluator();
        let ctx = ExecutionContext::new();
        let s = spec(None, vec![check("pass", json!({"invert": true}))]);
        assert!(!ev.evaluate(Some(&s), &ctx));
        let s = spec(None, vec![check("fail", json!({"invert": "yes"}))]);
        assert!(ev.evaluate(Some(&s), &ctx));
    }

    #[test]
    fn uncreatable_checks_are_skipped() {
        let ev = evaluator();
        let ctx = ExecutionContext::new();
        let s = spec(None, vec![check("mystery", json!({})), check("pass", json!({}))]);
        assert!(ev.evaluate(Some(&s), &ctx));
        let s = spec(Some("any"), vec![check("mystery", json!({}))]);
        assert!(!ev.evaluate(Some(&s), &ctx));
    }
}
