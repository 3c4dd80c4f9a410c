use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use autostart_core::{format_duration, ServerManager};
use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{trigger_context, ExecutionCallback, NameFilter, Subscription, Trigger};
use crate::config::{TriggerConfig, TypedConfig};
use crate::error::CreateError;
use crate::host::{EventListener, HostEvent};
use crate::registry::TriggerContext;

const DEFAULT_EMPTY_TIME: Duration = Duration::from_secs(15 * 60);

/// Fires once a monitored, online server has had no players for
/// `empty_time`. A server fires at most once per empty period.
///
/// Emptiness is noticed on disconnects and server switches, and by a
/// periodic sweep (`settings.empty_server_check_interval`) that catches
/// servers which came online empty.
pub struct EmptyServerTrigger {
    servers: Arc<ServerManager>,
    empty_time: Duration,
    check_interval: Duration,
    filter: NameFilter,
    subscription: Subscription,
    monitor: Mutex<Option<Arc<EmptyMonitor>>>,
}

impl EmptyServerTrigger {
    pub const NAME: &'static str = "empty_server";

    pub fn create(config: &TriggerConfig, ctx: &Arc<TriggerContext>) -> Result<Arc<dyn Trigger>, CreateError> {
        Ok(Arc::new(Self::new(
            ctx,
            config.accessor().get_duration("empty_time", DEFAULT_EMPTY_TIME),
            NameFilter::from_params(config.params(), "server_list", "servers"),
        )))
    }

    pub fn new(ctx: &TriggerContext, empty_time: Duration, filter: NameFilter) -> Self {
        Self {
            servers: Arc::clone(&ctx.servers),
            empty_time,
            check_interval: ctx.settings.empty_server_check_interval(),
            filter,
            subscription: Subscription::new(Arc::clone(&ctx.events)),
            monitor: Mutex::new(None),
        }
    }

    pub fn empty_time(&self) -> Duration {
        self.empty_time
    }

    /// Servers with a running empty timer.
    pub fn pending(&self) -> Vec<String> {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.pending())
            .unwrap_or_default()
    }
}

impl Trigger for EmptyServerTrigger {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn activate(&self, rule: &str, callback: ExecutionCallback) {
        self.deactivate();

        let monitor = Arc::new(EmptyMonitor {
            rule: rule.to_string(),
            callback,
            servers: Arc::clone(&self.servers),
            empty_time: self.empty_time,
            filter: self.filter.clone(),
            state: Mutex::new(MonitorState::default()),
            cancel: CancellationToken::new(),
        });
        self.subscription.subscribe(Arc::new(MonitorListener(Arc::clone(&monitor))));
        info!(
            rule,
            empty_time = %format_duration(self.empty_time),
            check_interval = %format_duration(self.check_interval),
            "empty_server trigger active"
        );

        monitor.sweep();
        if !self.check_interval.is_zero() {
            tokio::spawn(Arc::clone(&monitor).sweep_every(self.check_interval));
        }
        *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(monitor);
    }

    fn deactivate(&self) {
        self.subscription.cancel();
        if let Some(monitor) = self.monitor.lock().unwrap_or_else(PoisonError::into_inner).take() {
            monitor.stop();
        }
    }
}

impl Drop for EmptyServerTrigger {
    fn drop(&mut self) {
        self.deactivate();
    }
}

// ── Monitor ─────────────────────────────────────────────────────────

struct PendingTimer {
    generation: u64,
    task: AbortHandle,
}

#[derive(Default)]
struct MonitorState {
    pending: HashMap<String, PendingTimer>,
    fired: HashSet<String>,
    generation: u64,
}

struct EmptyMonitor {
    rule: String,
    callback: ExecutionCallback,
    servers: Arc<ServerManager>,
    empty_time: Duration,
    filter: NameFilter,
    state: Mutex<MonitorState>,
    cancel: CancellationToken,
}

impl EmptyMonitor {
    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().pending.keys().cloned().collect();
        names.sort();
        names
    }

    fn is_empty(&self, server: &str) -> bool {
        self.servers.player_count(server) == 0
    }

    fn stop(&self) {
        self.cancel.cancel();
        let mut state = self.lock();
        for (_, timer) in state.pending.drain() {
            timer.task.abort();
        }
        state.fired.clear();
    }

    /// Start timers for online, empty servers not already tracked.
    fn sweep(self: &Arc<Self>) {
        for server in self.servers.server_names() {
            if !self.filter.allows(&server) {
                continue;
            }
            {
                let state = self.lock();
                if state.pending.contains_key(&server) || state.fired.contains(&server) {
                    continue;
                }
            }
            if self.is_empty(&server) && self.servers.is_online(&server) {
                debug!(rule = %self.rule, %server, "online server is empty");
                self.schedule(&server);
            }
        }
    }

    async fn sweep_every(self: Arc<Self>, period: Duration) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(period) => self.sweep(),
            }
        }
    }

    /// The server just became empty: (re)start its timer.
    fn became_empty(self: &Arc<Self>, server: &str) {
        self.lock().fired.remove(server);
        self.schedule(server);
    }

    fn schedule(self: &Arc<Self>, server: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut state = self.lock();
        if state.fired.contains(server) {
            return;
        }
        if let Some(previous) = state.pending.remove(server) {
            previous.task.abort();
        }

        state.generation += 1;
        let generation = state.generation;
        let empty_since = Utc::now();
        let monitor = Arc::clone(self);
        let name = server.to_string();
        let delay = self.empty_time;
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => monitor.fire(&name, generation, empty_since),
            }
        });
        debug!(rule = %self.rule, server, empty_time = %format_duration(delay), "empty timer started");
        state.pending.insert(
            server.to_string(),
            PendingTimer {
                generation,
                task: task.abort_handle(),
            },
        );
    }

    /// A player arrived: the server is no longer empty.
    fn occupied(&self, server: &str) {
        let mut state = self.lock();
        if let Some(timer) = state.pending.remove(server) {
            timer.task.abort();
            debug!(rule = %self.rule, server, "empty timer cancelled");
        }
        state.fired.remove(server);
    }

    fn fire(&self, server: &str, generation: u64, empty_since: DateTime<Utc>) {
        {
            let mut state = self.lock();
            let current = state.pending.get(server).map(|t| t.generation);
            if current != Some(generation) {
                // Superseded by a newer timer.
                return;
            }
            state.pending.remove(server);
            if !self.is_empty(server) {
                debug!(rule = %self.rule, server, "server no longer empty at timer expiry");
                return;
            }
            state.fired.insert(server.to_string());
        }

        info!(rule = %self.rule, server, empty_time = %format_duration(self.empty_time), "server empty, firing");
        let ctx = trigger_context(EmptyServerTrigger::NAME);
        ctx.set("empty_server.server", server);
        ctx.set("empty_server.server.name", server);
        ctx.set("empty_server.empty_time", format_duration(self.empty_time));
        ctx.set("empty_server.empty_since", empty_since.to_rfc3339());
        let _ = (self.callback)(ctx);
    }
}

struct MonitorListener(Arc<EmptyMonitor>);

#[async_trait]
impl EventListener for MonitorListener {
    async fn on_event(&self, event: &HostEvent) {
        let monitor = &self.0;
        match event {
            HostEvent::Disconnect { server, .. } => {
                if monitor.filter.allows(server) && monitor.is_empty(server) {
                    monitor.became_empty(server);
                }
            }
            HostEvent::ServerSwitch { server, previous, .. } => {
                monitor.occupied(server);
                if let Some(previous) = previous {
                    if monitor.filter.allows(previous) && monitor.is_empty(previous) {
                        monitor.became_empty(previous);
                    }
                }
            }
            _ => {}
        }
    }
}
