//! Managed servers: configuration, cached state, player lists and control.

mod startup;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::control::{create_control, ControlApiConfig, ServerControl};
use crate::error::{CoreError, Result};
use crate::state::ServerState;

pub use startup::{StartupContext, StartupTimes, StartupTracker, DEFAULT_EXPECTED_STARTUP};

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupTimerConfig {
    #[serde(default)]
    pub expected_startup_time: Option<String>,
    #[serde(default)]
    pub auto_calculate_expected_startup_time: Option<bool>,
}

/// One entry of the `servers` section (or `defaults.server`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host-side server name, when it differs from the config key.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub virtual_host: Option<String>,
    #[serde(default)]
    pub control_api: Option<ControlApiConfig>,
    #[serde(default)]
    pub startup_timer: Option<StartupTimerConfig>,
}

impl ServerConfig {
    /// Fill unset fields from `defaults`.
    pub fn merged_with(&self, defaults: &ServerConfig) -> ServerConfig {
        let control_api = match (&self.control_api, &defaults.control_api) {
            (Some(own), Some(def)) => Some(own.merged_with(def)),
            (own, def) => own.clone().or_else(|| def.clone()),
        };
        let startup_timer = match (&self.startup_timer, &defaults.startup_timer) {
            (Some(own), Some(def)) => Some(StartupTimerConfig {
                expected_startup_time: own
                    .expected_startup_time
                    .clone()
                    .or_else(|| def.expected_startup_time.clone()),
                auto_calculate_expected_startup_time: own
                    .auto_calculate_expected_startup_time
                    .or(def.auto_calculate_expected_startup_time),
            }),
            (own, def) => own.clone().or_else(|| def.clone()),
        };
        ServerConfig {
            name: self.name.clone(),
            virtual_host: self.virtual_host.clone().or_else(|| defaults.virtual_host.clone()),
            control_api,
            startup_timer,
        }
    }

    pub fn auto_calculate_startup(&self) -> bool {
        self.startup_timer
            .as_ref()
            .and_then(|t| t.auto_calculate_expected_startup_time)
            .unwrap_or(false)
    }
}

// ── Managed server ──────────────────────────────────────────────────

/// A configured server with its control backend and last known state.
///
/// State and players are cached: they are refreshed by
/// [`ManagedServer::refresh`] or pushed by the host.
pub struct ManagedServer {
    name: String,
    config: ServerConfig,
    control: Option<Arc<dyn ServerControl>>,
    state: RwLock<ServerState>,
    players: RwLock<Vec<String>>,
}

impl ManagedServer {
    pub fn new(name: impl Into<String>, config: ServerConfig, control: Option<Arc<dyn ServerControl>>) -> Self {
        Self {
            name: name.into(),
            config,
            control,
            state: RwLock::new(ServerState::Unknown),
            players: RwLock::new(Vec::new()),
        }
    }

    /// Build from config; a control backend that cannot be created leaves the
    /// server uncontrollable but still tracked.
    pub fn from_config(name: &str, config: ServerConfig) -> Self {
        let control = match config.control_api.as_ref() {
            Some(api) => match create_control(name, api) {
                Ok(control) => Some(control),
                Err(e) => {
                    warn!(server = name, error = %e, "control api unavailable");
                    None
                }
            },
            None => {
                debug!(server = name, "no control_api configured");
                None
            }
        };
        Self::new(name, config, control)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn control(&self) -> Option<&Arc<dyn ServerControl>> {
        self.control.as_ref()
    }

    pub fn supports_state(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.supports_state())
    }

    pub fn state(&self) -> ServerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: ServerState) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *guard != state {
            debug!(server = %self.name, from = %*guard, to = %state, "server state changed");
            *guard = state;
        }
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    pub fn players(&self) -> Vec<String> {
        self.players.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn set_players(&self, players: Vec<String>) {
        *self.players.write().unwrap_or_else(PoisonError::into_inner) = players;
    }

    pub fn add_player(&self, player: &str) {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        if !players.iter().any(|p| p.eq_ignore_ascii_case(player)) {
            players.push(player.to_string());
        }
    }

    /// Returns true when the player was present.
    pub fn remove_player(&self, player: &str) -> bool {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        let before = players.len();
        players.retain(|p| !p.eq_ignore_ascii_case(player));
        players.len() != before
    }

    /// Query the backend for state (preferred) or liveness. Backends with
    /// neither keep the host-reported state.
    pub async fn refresh(&self) -> ServerState {
        let Some(control) = self.control.as_ref() else {
            return self.state();
        };
        if control.supports_state() {
            match control.state().await {
                Ok(state) => self.set_state(state),
                Err(e) => warn!(server = %self.name, error = %e, "state query failed"),
            }
        } else if control.supports_ping() {
            let online = control.ping().await.unwrap_or_else(|e| {
                debug!(server = %self.name, error = %e, "ping failed");
                false
            });
            self.set_state(if online { ServerState::Online } else { ServerState::Offline });
        }
        self.state()
    }

    pub async fn start(&self, force: bool) -> bool {
        let Some(control) = self.control.as_ref() else {
            warn!(server = %self.name, "cannot start: control api not available");
            return false;
        };
        if !force && self.is_online() {
            info!(server = %self.name, "already online, skipping start");
            return true;
        }
        info!(server = %self.name, control = control.control_type(), force, "starting server");
        self.outcome("start", control.start().await)
    }

    pub async fn stop(&self) -> bool {
        let Some(control) = self.control.as_ref() else {
            warn!(server = %self.name, "cannot stop: control api not available");
            return false;
        };
        info!(server = %self.name, control = control.control_type(), "stopping server");
        let ok = self.outcome("stop", control.stop().await);
        if ok && !control.supports_state() {
            self.set_state(ServerState::Offline);
        }
        ok
    }

    pub async fn restart(&self) -> bool {
        let Some(control) = self.control.as_ref() else {
            warn!(server = %self.name, "cannot restart: control api not available");
            return false;
        };
        info!(server = %self.name, control = control.control_type(), "restarting server");
        self.outcome("restart", control.restart().await)
    }

    pub async fn send_command(&self, command: &str) -> bool {
        let Some(control) = self.control.as_ref() else {
            warn!(server = %self.name, "cannot send command: control api not available");
            return false;
        };
        if !control.supports_command_sending() {
            warn!(
                server = %self.name,
                control = control.control_type(),
                "control api does not support command sending"
            );
            return false;
        }
        debug!(server = %self.name, command, "sending console command");
        self.outcome("send_command", control.send_command(command).await)
    }

    fn outcome(&self, operation: &str, result: Result<bool>) -> bool {
        match result {
            Ok(true) => true,
            Ok(false) => {
                warn!(server = %self.name, operation, "control command returned failure");
                false
            }
            Err(e) => {
                error!(server = %self.name, operation, error = %e, "control command failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for ManagedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedServer")
            .field("name", &self.name)
            .field("control", &self.control.as_ref().map(|c| c.control_type().to_string()))
            .field("state", &self.state())
            .finish()
    }
}

// ── Server manager ──────────────────────────────────────────────────

/// Registry of managed servers keyed by config name.
#[derive(Debug, Default)]
pub struct ServerManager {
    servers: RwLock<HashMap<String, Arc<ManagedServer>>>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the server set. Cached state and players survive for servers
    /// whose name is unchanged.
    pub fn load<I>(&self, configs: I, defaults: Option<&ServerConfig>)
    where
        I: IntoIterator<Item = (String, ServerConfig)>,
    {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashMap::new();
        for (name, config) in configs {
            let config = match defaults {
                Some(d) => config.merged_with(d),
                None => config,
            };
            let server = ManagedServer::from_config(&name, config);
            if let Some(previous) = servers.get(&name) {
                server.set_state(previous.state());
                server.set_players(previous.players());
            }
            next.insert(name, Arc::new(server));
        }
        info!(count = next.len(), "loaded servers");
        *servers = next;
    }

    /// Register one server directly.
    pub fn insert(&self, server: ManagedServer) -> Arc<ManagedServer> {
        let server = Arc::new(server);
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server.name().to_string(), Arc::clone(&server));
        server
    }

    pub fn server(&self, name: &str) -> Option<Arc<ManagedServer>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn require(&self, name: &str) -> Result<Arc<ManagedServer>> {
        self.server(name)
            .ok_or_else(|| CoreError::ServerNotFound(name.to_string()))
    }

    pub fn has_server(&self, name: &str) -> bool {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Sorted server names.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn all(&self) -> Vec<Arc<ManagedServer>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub async fn start_server(&self, name: &str, force: bool) -> Result<bool> {
        Ok(self.require(name)?.start(force).await)
    }

    pub async fn stop_server(&self, name: &str) -> Result<bool> {
        Ok(self.require(name)?.stop().await)
    }

    pub async fn restart_server(&self, name: &str) -> Result<bool> {
        Ok(self.require(name)?.restart().await)
    }

    pub async fn send_command(&self, name: &str, command: &str) -> Result<bool> {
        Ok(self.require(name)?.send_command(command).await)
    }

    /// Cached state; `Unknown` for unconfigured names.
    pub fn state(&self, name: &str) -> ServerState {
        self.server(name).map(|s| s.state()).unwrap_or_default()
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.state(name).is_online()
    }

    /// Refresh every server's cached state from its backend.
    pub async fn refresh_states(&self) {
        for server in self.all() {
            server.refresh().await;
        }
    }

    /// Host report that a server answered (or stopped answering) pings.
    pub fn report_online(&self, name: &str, online: bool) {
        if let Some(server) = self.server(name) {
            server.set_state(if online { ServerState::Online } else { ServerState::Offline });
        }
    }

    pub fn set_players(&self, name: &str, players: Vec<String>) {
        if let Some(server) = self.server(name) {
            server.set_players(players);
        }
    }

    pub fn add_player(&self, name: &str, player: &str) {
        if let Some(server) = self.server(name) {
            server.add_player(player);
        }
    }

    pub fn remove_player(&self, name: &str, player: &str) -> bool {
        self.server(name).is_some_and(|s| s.remove_player(player))
    }

    pub fn players(&self, name: &str) -> Vec<String> {
        self.server(name).map(|s| s.players()).unwrap_or_default()
    }

    pub fn player_count(&self, name: &str) -> usize {
        self.server(name).map(|s| s.player_count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and answers pings with a fixed value.
    #[derive(Default)]
    pub(crate) struct CountingControl {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        pub online: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ServerControl for CountingControl {
        async fn start(&self) -> Result<bool> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn stop(&self) -> Result<bool> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn restart(&self) -> Result<bool> {
            Err(CoreError::Other("boom".into()))
        }
        fn control_type(&self) -> &str {
            "counting"
        }
        fn supports_ping(&self) -> bool {
            true
        }
        async fn ping(&self) -> Result<bool> {
            Ok(self.online.load(Ordering::SeqCst))
        }
    }

    fn manager_with(control: Arc<CountingControl>) -> ServerManager {
        let manager = ServerManager::new();
        manager.insert(ManagedServer::new("lobby", ServerConfig::default(), Some(control)));
        manager
    }

    #[tokio::test]
    async fn start_skips_online_server_unless_forced() {
        let control = Arc::new(CountingControl::default());
        let manager = manager_with(Arc::clone(&control));

        manager.report_online("lobby", true);
        assert!(manager.start_server("lobby", false).await.unwrap());
        assert_eq!(control.starts.load(Ordering::SeqCst), 0);

        assert!(manager.start_server("lobby", true).await.unwrap());
        assert_eq!(control.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn control_errors_become_false() {
        let manager = manager_with(Arc::new(CountingControl::default()));
        assert!(!manager.restart_server("lobby").await.unwrap());
        assert!(!manager.send_command("lobby", "list").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_server_is_an_error() {
        let manager = ServerManager::new();
        assert!(matches!(
            manager.stop_server("ghost").await,
            Err(CoreError::ServerNotFound(name)) if name == "ghost"
        ));
        assert_eq!(manager.state("ghost"), ServerState::Unknown);
        assert_eq!(manager.player_count("ghost"), 0);
    }

    #[tokio::test]
    async fn refresh_uses_ping() {
        let control = Arc::new(CountingControl::default());
        let manager = manager_with(Arc::clone(&control));

        manager.refresh_states().await;
        assert_eq!(manager.state("lobby"), ServerState::Offline);

        control.online.store(true, Ordering::SeqCst);
        manager.refresh_states().await;
        assert!(manager.is_online("lobby"));
    }

    #[tokio::test]
    async fn stop_marks_stateless_server_offline() {
        let manager = manager_with(Arc::new(CountingControl::default()));
        manager.report_online("lobby", true);
        assert!(manager.stop_server("lobby").await.unwrap());
        assert_eq!(manager.state("lobby"), ServerState::Offline);
    }

    #[test]
    fn players_are_tracked_case_insensitively() {
        let manager = manager_with(Arc::new(CountingControl::default()));
        manager.add_player("lobby", "Steve");
        manager.add_player("lobby", "steve");
        manager.add_player("lobby", "Alex");
        assert_eq!(manager.player_count("lobby"), 2);
        assert!(manager.remove_player("lobby", "STEVE"));
        assert_eq!(manager.players("lobby"), vec!["Alex".to_string()]);
    }

    #[test]
    fn reload_keeps_cached_state() {
        let manager = ServerManager::new();
        manager.load([("lobby".to_string(), ServerConfig::default())], None);
        manager.report_online("lobby", true);
        manager.set_players("lobby", vec!["Alex".into()]);

        manager.load(
            [
                ("lobby".to_string(), ServerConfig::default()),
                ("survival".to_string(), ServerConfig::default()),
            ],
            None,
        );
        assert!(manager.is_online("lobby"));
        assert_eq!(manager.player_count("lobby"), 1);
        assert_eq!(manager.server_names(), vec!["lobby", "survival"]);
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let defaults: ServerConfig = serde_json::from_value(serde_json::json!({
            "control_api": {"type": "shell", "command_timeout": "30s"},
            "startup_timer": {"expected_startup_time": "45s", "auto_calculate_expected_startup_time": true}
        }))
        .unwrap();
        let own: ServerConfig = serde_json::from_value(serde_json::json!({
            "control_api": {"start_command": "./start.sh"},
            "startup_timer": {"expected_startup_time": "1m"}
        }))
        .unwrap();

        let merged = own.merged_with(&defaults);
        let api = merged.control_api.as_ref().unwrap();
        assert_eq!(api.control_type.as_deref(), Some("shell"));
        assert_eq!(api.start_command.as_deref(), Some("./start.sh"));
        let timer = merged.startup_timer.as_ref().unwrap();
        assert_eq!(timer.expected_startup_time.as_deref(), Some("1m"));
        assert!(merged.auto_calculate_startup());
    }
}
