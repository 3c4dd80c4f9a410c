use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{trigger_context, ExecutionCallback, Subscription, Trigger};
use crate::config::TriggerConfig;
use crate::error::CreateError;
use crate::host::{EventListener, HostEvent};
use crate::registry::TriggerContext;

// ── proxy_start ─────────────────────────────────────────────────────

/// Fires once when its rule is activated at process start. Rules rebuilt
/// by a reload do not fire again.
pub struct ProxyStartTrigger {
    is_reload: bool,
}

impl ProxyStartTrigger {
    pub const NAME: &'static str = "proxy_start";

    pub fn create(_config: &TriggerConfig, ctx: &Arc<TriggerContext>) -> Result<Arc<dyn Trigger>, CreateError> {
        Ok(Arc::new(Self::new(ctx)))
    }

    pub fn new(ctx: &TriggerContext) -> Self {
        Self {
            is_reload: ctx.is_reload,
        }
    }
}

impl Trigger for ProxyStartTrigger {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn activate(&self, rule: &str, callback: ExecutionCallback) {
        if self.is_reload {
            debug!(rule, "skipping proxy_start after reload");
            return;
        }
        info!(rule, "proxy_start firing");
        // The returned handle is not awaited: startup is not held back.
        let _ = callback(trigger_context(Self::NAME));
    }

    fn deactivate(&self) {}
}

// ── proxy_shutdown ──────────────────────────────────────────────────

/// Fires on [`HostEvent::ProxyShutdown`]; the publisher waits for the
/// firing, bounded by `settings.shutdown_timeout`.
pub struct ProxyShutdownTrigger {
    timeout: Duration,
    subscription: Subscription,
}

struct ShutdownListener {
    rule: String,
    callback: ExecutionCallback,
    timeout: Duration,
}

#[async_trait]
impl EventListener for ShutdownListener {
    async fn on_event(&self, event: &HostEvent) {
        if !matches!(event, HostEvent::ProxyShutdown) {
            return;
        }
        info!(rule = %self.rule, "proxy_shutdown firing");
        let firing = (self.callback)(trigger_context(ProxyShutdownTrigger::NAME));
        if tokio::time::timeout(self.timeout, firing.wait()).await.is_err() {
            warn!(
                rule = %self.rule,
                timeout_ms = self.timeout.as_millis() as u64,
                "proxy_shutdown rule did not finish in time"
            );
        }
    }
}

impl ProxyShutdownTrigger {
    pub const NAME: &'static str = "proxy_shutdown";

    pub fn create(_config: &TriggerConfig, ctx: &Arc<TriggerContext>) -> Result<Arc<dyn Trigger>, CreateError> {
        Ok(Arc::new(Self::new(ctx)))
    }

    pub fn new(ctx: &TriggerContext) -> Self {
        Self {
            timeout: ctx.settings.shutdown_timeout(),
            subscription: Subscription::new(Arc::clone(&ctx.events)),
        }
    }
}

impl Trigger for ProxyShutdownTrigger {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn activate(&self, rule: &str, callback: ExecutionCallback) {
        self.subscription.subscribe(Arc::new(ShutdownListener {
            rule: rule.to_string(),
            callback,
            timeout: self.timeout,
        }));
        debug!(rule, "proxy_shutdown trigger active");
    }

    fn deactivate(&self) {
        self.subscription.cancel();
    }
}
