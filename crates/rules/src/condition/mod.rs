//! Boolean predicates over an execution context.

mod builtin;
mod evaluator;

use crate::config::ConditionCheck;
use crate::context::ExecutionContext;
use crate::registry::{CatalogEntry, ConditionContext, Registry};

pub use builtin::{NumberCompare, PlayerCount, ServerStatus, StringEquals};
pub use evaluator::ConditionEvaluator;

pub trait Condition: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn evaluate(&self, ctx: &ExecutionContext) -> bool;
}

pub type ConditionRegistry = Registry<ConditionCheck, ConditionContext, dyn Condition>;
pub type ConditionEntry = CatalogEntry<ConditionCheck, ConditionContext, dyn Condition>;

pub fn catalog() -> Vec<ConditionEntry> {
    vec![
        CatalogEntry::new(StringEquals::NAME, StringEquals::create),
        CatalogEntry::new(NumberCompare::NAME, NumberCompare::create),
        CatalogEntry::new(ServerStatus::NAME, ServerStatus::create),
        CatalogEntry::new(PlayerCount::NAME, PlayerCount::create),
    ]
}

/// Registry preloaded with the built-in conditions.
pub fn builtin_registry() -> ConditionRegistry {
    Registry::new("condition", catalog())
}
