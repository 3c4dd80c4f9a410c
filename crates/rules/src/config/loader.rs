//! Config file loading with hot-reload via `notify` watcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::model::EngineConfig;
use crate::error::{Result, RuleError};

/// Quiet period before a burst of file events is reported as one change.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// What happened to the watched config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Modified,
    Removed,
}

/// Reads the YAML rule configuration and optionally watches it for changes.
pub struct ConfigLoader {
    path: PathBuf,
    /// Active filesystem watcher (held to keep it alive).
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigLoader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _watcher: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the config file.
    pub fn load(&self) -> Result<EngineConfig> {
        let config = EngineConfig::from_file(&self.path)?;
        info!(
            path = %self.path.display(),
            servers = config.servers.len(),
            rules = config.rules.len(),
            "loaded configuration"
        );
        Ok(config)
    }

    /// Write a commented starter file if none exists. Returns true when
    /// a file was created.
    pub fn ensure_exists(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        let io_err = |source| RuleError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&self.path, STARTER_CONFIG).map_err(io_err)?;
        info!(path = %self.path.display(), "wrote starter configuration");
        Ok(true)
    }

    /// Watch the config file. Changes are sent on `tx`; the containing
    /// directory is watched so editors that replace the file are seen.
    pub fn watch(&mut self, tx: mpsc::UnboundedSender<ConfigChange>) -> Result<()> {
        let target = self.path.clone();
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            match res {
                Ok(event) => handle_fs_event(&event, &target, &tx),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %self.path.display(), "watching configuration for changes");
        self._watcher = Some(watcher);
        Ok(())
    }
}

/// Map one notify event to a [`ConfigChange`] for the watched file.
fn handle_fs_event(event: &Event, target: &Path, tx: &mpsc::UnboundedSender<ConfigChange>) {
    let touches_target = event
        .paths
        .iter()
        .any(|p| p.file_name().is_some() && p.file_name() == target.file_name());
    if !touches_target {
        return;
    }

    let change = match &event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any) => {
            ConfigChange::Modified
        }
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => ConfigChange::Removed,
        _ => return,
    };
    debug!(path = %target.display(), ?change, "configuration file event");
    let _ = tx.send(change);
}

/// Wait for the next change, then absorb follow-up events until the file
/// has been quiet for `window`. Returns the last change seen, or `None`
/// when the sender is gone.
pub async fn next_change(
    rx: &mut mpsc::UnboundedReceiver<ConfigChange>,
    window: Duration,
) -> Option<ConfigChange> {
    let mut last = rx.recv().await?;
    loop {
        match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(change)) => last = change,
            Ok(None) | Err(_) => return Some(last),
        }
    }
}

const STARTER_CONFIG: &str = r#"# autostart rule configuration
version: 1

settings:
  shutdown_timeout: 30s
  empty_server_check_interval: 5m
  status_refresh_interval: 10s

defaults:
  server:
    control_api:
      type: shell
      command_timeout: 60s

servers: {}

rules: {}
"#;
