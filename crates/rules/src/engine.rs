//! The assembled rule engine: registries, bundles, executor and manager
//! behind one handle.
//!
//! The host feeds events in through [`Engine::publish`], operators fire
//! manual triggers through [`Engine::fire`], and configuration changes go
//! through [`Engine::load`] or [`Engine::reload_configuration`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use autostart_core::{ServerManager, StartupTimes, StartupTracker};
use tracing::{error, info, warn};

use crate::action::{self, ActionRegistry};
use crate::condition::{self, ConditionEvaluator, ConditionRegistry};
use crate::config::{EngineConfig, Settings};
use crate::context::VariableResolver;
use crate::error::Result;
use crate::executor::{Firing, RuleExecutor};
use crate::host::{EventBus, HostEvent, PlayerBridge};
use crate::manager::{LoadSummary, RuleManager};
use crate::registry::{ActionContext, ConditionContext, TemplateContext, TriggerContext};
use crate::template::{self, TemplateRegistry};
use crate::trigger::{self, TriggerRegistry};

pub struct Engine {
    servers: Arc<ServerManager>,
    startup: Arc<StartupTracker>,
    resolver: Arc<VariableResolver>,
    events: Arc<EventBus>,
    players: Arc<dyn PlayerBridge>,

    triggers: Arc<TriggerRegistry>,
    actions: Arc<ActionRegistry>,
    conditions: Arc<ConditionRegistry>,
    templates: Arc<TemplateRegistry>,
    evaluator: Arc<ConditionEvaluator>,

    executor: Arc<RuleExecutor>,
    manager: RuleManager,

    config_path: Option<PathBuf>,
    shutdown_timeout: Option<Duration>,
    config: RwLock<Arc<EngineConfig>>,
    started: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config_path", &self.config_path)
            .field("executor", &self.executor)
            .field("manager", &self.manager)
            .finish()
    }
}

impl Engine {
    /// Engine with the built-in catalogs. Startup samples are kept under
    /// `data_dir`.
    pub fn new(data_dir: &Path, players: Arc<dyn PlayerBridge>) -> Self {
        let servers = Arc::new(ServerManager::new());
        let times = Arc::new(StartupTimes::load(data_dir));
        let startup = Arc::new(StartupTracker::new(Arc::clone(&servers), times));
        let resolver = Arc::new(VariableResolver::new(Arc::clone(&servers), Some(Arc::clone(&startup))));

        let triggers = Arc::new(trigger::builtin_registry());
        let actions = Arc::new(action::builtin_registry());
        let conditions = Arc::new(condition::builtin_registry());
        let templates = Arc::new(template::builtin_registry());
        let evaluator = Arc::new(ConditionEvaluator::new(Arc::clone(&conditions)));
        let executor = Arc::new(RuleExecutor::new(Arc::clone(&actions), Arc::clone(&evaluator)));
        let manager = RuleManager::new(Arc::clone(&triggers), Arc::clone(&templates));

        Self {
            servers,
            startup,
            resolver,
            events: Arc::new(EventBus::new()),
            players,
            triggers,
            actions,
            conditions,
            templates,
            evaluator,
            executor,
            manager,
            config_path: None,
            shutdown_timeout: None,
            config: RwLock::new(Arc::new(EngineConfig::default())),
            started: AtomicBool::new(false),
        }
    }

    /// File read by [`Engine::reload_configuration`].
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Drain timeout used instead of `settings.shutdown_timeout`.
    pub fn with_shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn servers(&self) -> &Arc<ServerManager> {
        &self.servers
    }

    pub fn startup(&self) -> &Arc<StartupTracker> {
        &self.startup
    }

    pub fn resolver(&self) -> &Arc<VariableResolver> {
        &self.resolver
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn triggers(&self) -> &Arc<TriggerRegistry> {
        &self.triggers
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn conditions(&self) -> &Arc<ConditionRegistry> {
        &self.conditions
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    pub fn executor(&self) -> &Arc<RuleExecutor> {
        &self.executor
    }

    pub fn manager(&self) -> &RuleManager {
        &self.manager
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn settings(&self) -> Settings {
        self.config().settings.clone()
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Apply `config`: servers first, then the rule set.
    pub fn load(&self, config: EngineConfig) -> LoadSummary {
        self.servers.load(
            config.servers.iter().map(|(name, c)| (name.clone(), c.clone())),
            config.defaults.server.as_ref(),
        );
        self.load_rules(config)
    }

    /// Replace only the rule set; servers are left as they are.
    pub fn load_rules(&self, config: EngineConfig) -> LoadSummary {
        let is_reload = self.started.swap(true, Ordering::AcqRel);
        self.install_bundles(&config.settings, is_reload);
        let config = Arc::new(config);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&config);
        self.manager.load_rules(&config, &self.executor)
    }

    /// Re-read the configuration file. A file that fails to parse leaves
    /// the current rules in place.
    pub fn reload_configuration(&self) -> Result<LoadSummary> {
        let Some(path) = self.config_path.as_deref() else {
            return Err(crate::error::RuleError::Config("no configuration file set".into()));
        };
        let config = match EngineConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "reload failed, keeping current rules");
                return Err(e);
            }
        };
        info!(path = %path.display(), "reloading configuration");
        Ok(self.load(config))
    }

    fn install_bundles(&self, settings: &Settings, is_reload: bool) {
        let triggers = Arc::new(TriggerContext {
            servers: Arc::clone(&self.servers),
            events: Arc::clone(&self.events),
            settings: settings.clone(),
            is_reload,
        });
        let actions = Arc::new(ActionContext {
            servers: Arc::clone(&self.servers),
            resolver: Arc::clone(&self.resolver),
            startup: Arc::clone(&self.startup),
            players: Arc::clone(&self.players),
            actions: Arc::clone(&self.actions),
            conditions: Arc::clone(&self.evaluator),
            tasks: self.executor.tasks().clone(),
        });
        let templates = Arc::new(TemplateContext {
            servers: Arc::clone(&self.servers),
            resolver: Arc::clone(&self.resolver),
            startup: Arc::clone(&self.startup),
            players: Arc::clone(&self.players),
            settings: settings.clone(),
            triggers: Arc::clone(&triggers),
            actions: Arc::clone(&actions),
            executor: Arc::clone(&self.executor),
        });

        self.triggers.set_context(triggers);
        self.conditions.set_context(Arc::new(ConditionContext {
            servers: Arc::clone(&self.servers),
            resolver: Arc::clone(&self.resolver),
        }));
        self.actions.set_context(actions);
        self.templates.set_context(templates);
    }

    // ── Runtime ─────────────────────────────────────────────────────

    /// Fire every active manual trigger with `id`.
    pub fn fire(&self, id: &str, args: &[String]) -> Vec<Firing> {
        self.manager.fire(id, args)
    }

    /// Deliver a host event. Player lists are updated before listeners
    /// run, so they see the post-event population.
    pub async fn publish(&self, event: HostEvent) {
        match &event {
            HostEvent::Disconnect { player, server } => {
                self.servers.remove_player(server, player);
            }
            HostEvent::ServerSwitch {
                player,
                server,
                previous,
            } => {
                if let Some(previous) = previous {
                    self.servers.remove_player(previous, player);
                }
                self.servers.add_player(server, player);
            }
            HostEvent::ProxyShutdown | HostEvent::Connection(_) => {}
        }
        self.events.publish(&event).await;
    }

    /// Run shutdown rules, deactivate everything and drain in-flight
    /// firings within the shutdown timeout. Returns false when
    /// firings had to be cancelled.
    pub async fn shutdown(&self) -> bool {
        let timeout = self
            .shutdown_timeout
            .unwrap_or_else(|| self.settings().shutdown_timeout());
        info!(timeout_ms = timeout.as_millis() as u64, "engine shutting down");

        self.publish(HostEvent::ProxyShutdown).await;
        self.manager.clear();
        self.executor.shutdown();

        let drained = self.executor.await_termination(timeout).await;
        if !drained {
            warn!(in_flight = self.executor.in_flight(), "firings still running after shutdown timeout");
            self.executor.shutdown_now();
        }

        self.triggers.clear_context();
        self.actions.clear_context();
        self.conditions.clear_context();
        self.templates.clear_context();
        info!(drained, "engine stopped");
        drained
    }
}
