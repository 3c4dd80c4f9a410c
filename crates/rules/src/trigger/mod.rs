//! Event sources that start rule firings.
//!
//! A trigger is bound to one rule at activation and hands a fresh
//! [`ExecutionContext`] to the rule's callback for every event it sees.

mod connection;
mod cron;
mod empty_server;
mod lifecycle;
mod manual;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::config::{Params, TriggerConfig};
use crate::context::ExecutionContext;
use crate::executor::Firing;
use crate::host::{EventBus, EventListener, ListenerId};
use crate::registry::{CatalogEntry, Registry, TriggerContext};

pub use connection::ConnectionTrigger;
pub use cron::{CronFormat, CronTrigger};
pub use empty_server::EmptyServerTrigger;
pub use lifecycle::{ProxyShutdownTrigger, ProxyStartTrigger};
pub use manual::ManualTrigger;

/// Receives each firing's context and submits it for execution.
pub type ExecutionCallback = Arc<dyn Fn(ExecutionContext) -> Firing + Send + Sync>;

pub trait Trigger: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Start delivering events for `rule`. Activating an active trigger
    /// rebinds it.
    fn activate(&self, rule: &str, callback: ExecutionCallback);

    fn deactivate(&self);

    fn as_manual(&self) -> Option<&ManualTrigger> {
        None
    }
}

pub type TriggerRegistry = Registry<TriggerConfig, TriggerContext, dyn Trigger>;
pub type TriggerEntry = CatalogEntry<TriggerConfig, TriggerContext, dyn Trigger>;

pub fn catalog() -> Vec<TriggerEntry> {
    vec![
        CatalogEntry::new(ProxyStartTrigger::NAME, ProxyStartTrigger::create),
        CatalogEntry::new(ProxyShutdownTrigger::NAME, ProxyShutdownTrigger::create),
        CatalogEntry::new(ConnectionTrigger::NAME, ConnectionTrigger::create),
        CatalogEntry::new(ManualTrigger::NAME, ManualTrigger::create),
        CatalogEntry::new(CronTrigger::NAME, CronTrigger::create),
        CatalogEntry::new(EmptyServerTrigger::NAME, EmptyServerTrigger::create),
        // Ping events need a host that answers server-list pings.
        CatalogEntry::known("ping"),
    ]
}

/// Registry preloaded with the built-in triggers.
pub fn builtin_registry() -> TriggerRegistry {
    Registry::new("trigger", catalog())
}

/// Context with `_trigger_type` set, the starting point of every firing.
pub(crate) fn trigger_context(type_name: &str) -> ExecutionContext {
    let ctx = ExecutionContext::new();
    ctx.set("_trigger_type", type_name);
    ctx
}

// ── Name filters ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListMode {
    #[default]
    Whitelist,
    Blacklist,
    Disabled,
}

/// `{mode, <names>}` filter over server or player names. An empty list
/// lets everything through.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    mode: ListMode,
    names: Vec<String>,
}

impl NameFilter {
    pub fn new(mode: ListMode, names: Vec<String>) -> Self {
        Self { mode, names }
    }

    /// Read `params[key]` as `{mode, <list_key>: [...]}`.
    pub fn from_params(params: &Params, key: &str, list_key: &str) -> Self {
        let Some(Value::Object(section)) = params.get(key) else {
            return Self::default();
        };
        let mode = match section.get("mode").and_then(Value::as_str).map(str::trim) {
            Some(m) if m.eq_ignore_ascii_case("blacklist") => ListMode::Blacklist,
            Some(m) if m.eq_ignore_ascii_case("disabled") => ListMode::Disabled,
            _ => ListMode::Whitelist,
        };
        let names = match section.get(list_key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        };
        Self { mode, names }
    }

    pub fn allows(&self, name: &str) -> bool {
        if self.names.is_empty() {
            return true;
        }
        let listed = self.names.iter().any(|n| n.eq_ignore_ascii_case(name));
        match self.mode {
            ListMode::Whitelist => listed,
            ListMode::Blacklist => !listed,
            ListMode::Disabled => true,
        }
    }
}

// ── Event bus subscription ──────────────────────────────────────────

/// At most one live listener on the bus, replaced on re-activation.
pub(crate) struct Subscription {
    events: Arc<EventBus>,
    id: Mutex<Option<ListenerId>>,
}

impl Subscription {
    pub(crate) fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            id: Mutex::new(None),
        }
    }

    pub(crate) fn subscribe(&self, listener: Arc<dyn EventListener>) {
        let mut id = self.id.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = id.take() {
            self.events.unsubscribe(previous);
        }
        *id = Some(self.events.subscribe(listener));
    }

    /// Returns false if nothing was subscribed.
    pub(crate) fn cancel(&self) -> bool {
        let taken = self.id.lock().unwrap_or_else(PoisonError::into_inner).take();
        match taken {
            Some(id) => {
                self.events.unsubscribe(id);
                debug!(listener = id, "unsubscribed trigger listener");
                true
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
