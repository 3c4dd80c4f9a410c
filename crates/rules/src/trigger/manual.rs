use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::{trigger_context, ExecutionCallback, Trigger};
use crate::config::{TriggerConfig, TypedConfig};
use crate::error::CreateError;
use crate::executor::Firing;
use crate::registry::TriggerContext;

/// Fired on demand by id, with optional arguments exposed as
/// `manual.args.0`, `manual.args.1`, ...
pub struct ManualTrigger {
    id: String,
    binding: Mutex<Option<(String, ExecutionCallback)>>,
}

impl ManualTrigger {
    pub const NAME: &'static str = "manual";

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            binding: Mutex::new(None),
        }
    }

    pub fn create(config: &TriggerConfig, _ctx: &Arc<TriggerContext>) -> Result<Arc<dyn Trigger>, CreateError> {
        Ok(Arc::new(Self::new(config.accessor().require_string("id")?)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Fire once. `None` when the trigger is not active.
    pub fn fire(&self, args: &[String]) -> Option<Firing> {
        let binding = self
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some((rule, callback)) = binding else {
            warn!(id = %self.id, "manual trigger fired while inactive");
            return None;
        };

        debug!(id = %self.id, rule = %rule, args = args.len(), "manual trigger firing");
        let ctx = trigger_context(Self::NAME);
        ctx.set("manual.id", self.id.as_str());
        ctx.set("manual.args.length", args.len());
        for (i, arg) in args.iter().enumerate() {
            ctx.set(format!("manual.args.{i}"), arg.as_str());
        }
        Some(callback(ctx))
    }
}

impl Trigger for ManualTrigger {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn activate(&self, rule: &str, callback: ExecutionCallback) {
        *self.binding.lock().unwrap_or_else(PoisonError::into_inner) = Some((rule.to_string(), callback));
    }

    fn deactivate(&self) {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn as_manual(&self) -> Option<&ManualTrigger> {
        Some(self)
    }
}
