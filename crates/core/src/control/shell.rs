use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::command::{run_command, CommandSpec, DEFAULT_COMMAND_TIMEOUT};
use super::{ControlApiConfig, ServerControl};
use crate::duration::parse_duration_or;
use crate::error::Result;

/// Placeholder replaced by the console command in `send_command_command`.
const COMMAND_PLACEHOLDER: &str = "${command}";

/// Control backend that runs configured shell commands.
///
/// A missing command makes the matching operation report failure.
#[derive(Debug, Clone)]
pub struct ShellControl {
    server: String,
    start_command: Option<String>,
    stop_command: Option<String>,
    restart_command: Option<String>,
    send_command_command: Option<String>,
    working_directory: Option<String>,
    environment: HashMap<String, String>,
    timeout: Duration,
}

impl ShellControl {
    pub fn from_config(server: &str, config: &ControlApiConfig) -> Self {
        let non_blank = |s: &Option<String>| s.clone().filter(|v| !v.trim().is_empty());
        Self {
            server: server.to_string(),
            start_command: non_blank(&config.start_command),
            stop_command: non_blank(&config.stop_command),
            restart_command: non_blank(&config.restart_command),
            send_command_command: non_blank(&config.send_command_command),
            working_directory: non_blank(&config.working_directory),
            environment: config.environment_strings(),
            timeout: parse_duration_or(config.command_timeout.as_deref(), DEFAULT_COMMAND_TIMEOUT),
        }
    }

    async fn run(&self, operation: &str, command: Option<&str>) -> Result<bool> {
        let Some(command) = command else {
            warn!(server = %self.server, operation, "no command configured");
            return Ok(false);
        };
        info!(server = %self.server, operation, "running control command");
        let owner = format!("server '{}'", self.server);
        let spec = CommandSpec {
            command,
            operation,
            owner: &owner,
            working_directory: self.working_directory.as_deref(),
            environment: Some(&self.environment),
            timeout: self.timeout,
        };
        run_command(&spec).await
    }
}

#[async_trait]
impl ServerControl for ShellControl {
    async fn start(&self) -> Result<bool> {
        self.run("start", self.start_command.as_deref()).await
    }

    async fn stop(&self) -> Result<bool> {
        self.run("stop", self.stop_command.as_deref()).await
    }

    async fn restart(&self) -> Result<bool> {
        self.run("restart", self.restart_command.as_deref()).await
    }

    fn control_type(&self) -> &str {
        "shell"
    }

    fn supports_command_sending(&self) -> bool {
        self.send_command_command.is_some()
    }

    async fn send_command(&self, command: &str) -> Result<bool> {
        let Some(template) = self.send_command_command.as_deref() else {
            return Ok(false);
        };
        if command.trim().is_empty() {
            warn!(server = %self.server, "refusing to send empty command");
            return Ok(false);
        }
        let full = template.replace(COMMAND_PLACEHOLDER, command);
        self.run("send_command", Some(&full)).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> ControlApiConfig {
        ControlApiConfig {
            control_type: Some("shell".into()),
            start_command: Some("echo start >> log".into()),
            stop_command: Some("echo stop >> log".into()),
            send_command_command: Some("echo \"${command}\" >> log".into()),
            working_directory: Some(dir.to_string_lossy().into_owned()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_and_stop_run_in_working_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let control = ShellControl::from_config("lobby", &config(dir.path()));

        assert!(control.start().await.unwrap());
        assert!(control.stop().await.unwrap());
        assert!(!control.restart().await.unwrap());
        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(log, "start\nstop\n");
    }

    #[tokio::test]
    async fn send_command_substitutes_placeholder() {
        let dir = tempfile::TempDir::new().unwrap();
        let control = ShellControl::from_config("lobby", &config(dir.path()));
        assert!(control.supports_command_sending());

        assert!(control.send_command("say hi").await.unwrap());
        let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
        assert_eq!(log, "say hi\n");
    }

    #[tokio::test]
    async fn missing_command_reports_failure() {
        let control = ShellControl::from_config("lobby", &ControlApiConfig::default());
        assert!(!control.start().await.unwrap());
        assert!(!control.supports_command_sending());
        assert!(!control.send_command("list").await.unwrap());
    }

    #[tokio::test]
    async fn blank_console_command_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let control = ShellControl::from_config("lobby", &config(dir.path()));
        assert!(!control.send_command("   ").await.unwrap());
        assert!(!dir.path().join("log").exists());
    }
}
