//! Shell command execution with timeout, working directory and environment.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured output is truncated past this many bytes.
const MAX_OUTPUT_BYTES: usize = 10_000;

/// A shell command plus the context it runs in.
#[derive(Debug, Clone)]
pub struct CommandSpec<'a> {
    pub command: &'a str,
    /// Short verb for logs ("start", "exec", ...).
    pub operation: &'a str,
    /// Who is running it ("server 'lobby'", "rule 'nightly'").
    pub owner: &'a str,
    pub working_directory: Option<&'a str>,
    pub environment: Option<&'a HashMap<String, String>>,
    pub timeout: Duration,
}

impl<'a> CommandSpec<'a> {
    pub fn new(command: &'a str, operation: &'a str, owner: &'a str) -> Self {
        Self {
            command,
            operation,
            owner,
            working_directory: None,
            environment: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Run `spec.command` through the platform shell.
///
/// Returns `Ok(true)` on exit code 0, `Ok(false)` on any other exit code and
/// [`CoreError::CommandTimeout`] when the timeout elapses (the child is killed).
pub async fn run_command(spec: &CommandSpec<'_>) -> Result<bool> {
    let started = Instant::now();

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd.exe");
        c.arg("/c").arg(spec.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(spec.command);
        c
    };

    if let Some(dir) = spec.working_directory.filter(|d| !d.trim().is_empty()) {
        if Path::new(dir).is_dir() {
            cmd.current_dir(dir);
        } else {
            warn!(owner = spec.owner, dir, "working directory does not exist, using current");
        }
    }
    if let Some(env) = spec.environment {
        cmd.envs(env.iter());
        debug!(owner = spec.owner, count = env.len(), "added environment variables");
    }

    debug!(
        owner = spec.owner,
        operation = spec.operation,
        timeout_secs = spec.timeout.as_secs(),
        "executing command"
    );

    let child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                owner = spec.owner,
                operation = spec.operation,
                timeout_secs = spec.timeout.as_secs(),
                "command timed out"
            );
            return Err(CoreError::CommandTimeout {
                operation: spec.operation.to_string(),
                timeout: spec.timeout,
            });
        }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if output.status.success() {
        debug!(owner = spec.owner, operation = spec.operation, elapsed_ms, "command completed");
        return Ok(true);
    }

    let code = output.status.code().unwrap_or(-1);
    warn!(owner = spec.owner, operation = spec.operation, code, elapsed_ms, "command failed");
    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    combined.truncate(MAX_OUTPUT_BYTES);
    let text = String::from_utf8_lossy(&combined);
    if !text.trim().is_empty() {
        debug!(owner = spec.owner, operation = spec.operation, "command output:\n{}", text.trim());
    }
    Ok(false)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exit_code_maps_to_bool() {
        assert!(run_command(&CommandSpec::new("true", "test", "tests")).await.unwrap());
        assert!(!run_command(&CommandSpec::new("exit 3", "test", "tests")).await.unwrap());
    }

    #[tokio::test]
    async fn environment_and_working_directory_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut env = HashMap::new();
        env.insert("AUTOSTART_MARKER".to_string(), "42".to_string());
        let dir_str = dir.path().to_str().unwrap();
        let mut spec = CommandSpec::new(
            r#"[ "$AUTOSTART_MARKER" = "42" ] && touch marker"#,
            "test",
            "tests",
        );
        spec.environment = Some(&env);
        spec.working_directory = Some(dir_str);

        assert!(run_command(&spec).await.unwrap());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let mut spec = CommandSpec::new("sleep 5", "test", "tests");
        spec.timeout = Duration::from_millis(100);
        let err = run_command(&spec).await.unwrap_err();
        assert!(matches!(err, CoreError::CommandTimeout { .. }));
    }
}
