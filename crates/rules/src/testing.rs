//! Fixtures shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use autostart_core::{ManagedServer, ServerConfig, ServerControl};
use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::host::PlayerBridge;

/// Counts lifecycle calls; with `boots` set, a start brings the server
/// online as seen by the next ping.
#[derive(Default)]
pub(crate) struct FakeControl {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub online: AtomicBool,
    pub boots: AtomicBool,
    pub commands: Mutex<Vec<String>>,
}

impl FakeControl {
    pub fn booting() -> Self {
        let control = Self::default();
        control.boots.store(true, Ordering::SeqCst);
        control
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ServerControl for FakeControl {
    async fn start(&self) -> autostart_core::Result<bool> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.boots.load(Ordering::SeqCst) {
            self.online.store(true, Ordering::SeqCst);
        }
        Ok(true)
    }

    async fn stop(&self) -> autostart_core::Result<bool> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.online.store(false, Ordering::SeqCst);
        Ok(true)
    }

    async fn restart(&self) -> autostart_core::Result<bool> {
        Ok(true)
    }

    fn control_type(&self) -> &str {
        "fake"
    }

    fn supports_ping(&self) -> bool {
        true
    }

    async fn ping(&self) -> autostart_core::Result<bool> {
        Ok(self.online.load(Ordering::SeqCst))
    }

    fn supports_command_sending(&self) -> bool {
        true
    }

    async fn send_command(&self, command: &str) -> autostart_core::Result<bool> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());
        Ok(true)
    }
}

/// Records every player command as one line.
#[derive(Default)]
pub(crate) struct RecordingBridge {
    calls: Mutex<Vec<String>>,
}

impl RecordingBridge {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, line: String) -> bool {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(line);
        true
    }
}

#[async_trait]
impl PlayerBridge for RecordingBridge {
    async fn send_message(&self, player: &str, message: &str) -> bool {
        self.record(format!("message {player}: {message}"))
    }

    async fn disconnect(&self, player: &str, reason: &str) -> bool {
        self.record(format!("disconnect {player}: {reason}"))
    }

    async fn connect(&self, player: &str, server: &str) -> bool {
        self.record(format!("connect {player} -> {server}"))
    }
}

pub(crate) struct Harness {
    pub engine: Engine,
    pub bridge: Arc<RecordingBridge>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bridge = Arc::new(RecordingBridge::default());
        let engine = Engine::new(dir.path(), Arc::clone(&bridge) as Arc<dyn PlayerBridge>);
        Self {
            engine,
            bridge,
            _dir: dir,
        }
    }

    /// Register `name` backed by a fresh [`FakeControl`].
    pub fn server(&self, name: &str, control: FakeControl) -> Arc<FakeControl> {
        let control = Arc::new(control);
        self.engine.servers().insert(ManagedServer::new(
            name,
            ServerConfig::default(),
            Some(Arc::clone(&control) as Arc<dyn ServerControl>),
        ));
        control
    }

    /// Load the rules of `yaml`, leaving registered servers in place.
    pub fn rules(&self, yaml: &str) -> crate::manager::LoadSummary {
        self.engine.load_rules(config(yaml))
    }
}

pub(crate) fn config(yaml: &str) -> EngineConfig {
    EngineConfig::from_yaml_str(yaml).unwrap()
}
