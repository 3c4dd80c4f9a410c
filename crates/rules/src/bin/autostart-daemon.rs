//! autostart-daemon: runs the rule engine against a YAML configuration.
//!
//! Reads operator commands from stdin:
//! - `reload` re-reads the configuration file
//! - `fire <id> [args...]` fires manual triggers
//! - `triggers` lists manual trigger ids and rule triggers
//! - `status` prints server and executor state
//! - `quit` shuts down (as does ctrl-c)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autostart_core::{format_duration, Config};
use autostart_rules::config::{next_change, ConfigChange, ConfigLoader, DEBOUNCE_WINDOW};
use autostart_rules::{Engine, LoggingBridge};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ── CLI ─────────────────────────────────────────────────────────────

/// Config-driven server automation daemon.
#[derive(Parser, Debug)]
#[command(name = "autostart-daemon", version, about)]
struct Cli {
    /// Environment profile; keys are looked up as `{PROFILE}_{KEY}` first.
    #[arg(long, env = "AUTOSTART_PROFILE")]
    profile: Option<String>,

    /// YAML rule configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for persisted state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Do not reload when the configuration file changes.
    #[arg(long)]
    no_watch: bool,

    /// Ignore stdin (for running under a supervisor).
    #[arg(long)]
    no_console: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    autostart_core::config::load_dotenv();
    let cli = Cli::parse();

    let mut config = match cli.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    if let Some(path) = cli.config {
        config.config_file = path;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.no_watch {
        config.watch_config = false;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();
    config.log_summary();

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let mut loader = ConfigLoader::new(config.config_file.clone());
    if loader.ensure_exists()? {
        info!(path = %loader.path().display(), "wrote starter configuration");
    }
    let initial = loader.load().context("loading configuration")?;

    let engine = Arc::new(
        Engine::new(&config.data_dir, Arc::new(LoggingBridge))
            .with_config_path(loader.path())
            .with_shutdown_timeout(config.shutdown_timeout),
    );
    let summary = engine.load(initial);
    info!(
        rules = summary.loaded,
        active = summary.active,
        failed = summary.failed.len(),
        "autostart-daemon started"
    );

    let cancel = CancellationToken::new();
    let quit = Arc::new(Notify::new());

    tokio::spawn(refresh_states(Arc::clone(&engine), cancel.clone()));

    if config.watch_config {
        let (tx, rx) = mpsc::unbounded_channel();
        loader.watch(tx)?;
        tokio::spawn(watch_config(Arc::clone(&engine), rx, cancel.clone()));
    }

    if !cli.no_console {
        tokio::spawn(console(Arc::clone(&engine), Arc::clone(&quit), cancel.clone()));
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("ctrl-c received");
        }
        _ = quit.notified() => info!("quit requested"),
    }

    cancel.cancel();
    let drained = engine.shutdown().await;
    drop(loader);
    if drained {
        info!("autostart-daemon exited cleanly");
    } else {
        warn!("autostart-daemon exited with cancelled firings");
    }
    Ok(())
}

// ── Background tasks ────────────────────────────────────────────────

async fn refresh_states(engine: Arc<Engine>, cancel: CancellationToken) {
    loop {
        let period = engine.settings().status_refresh_interval();
        if period.is_zero() {
            warn!("status_refresh_interval is zero, state polling disabled");
            return;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(period) => engine.servers().refresh_states().await,
        }
    }
}

async fn watch_config(engine: Arc<Engine>, mut rx: mpsc::UnboundedReceiver<ConfigChange>, cancel: CancellationToken) {
    loop {
        let change = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            change = next_change(&mut rx, DEBOUNCE_WINDOW) => change,
        };
        match change {
            Some(ConfigChange::Modified) => {
                if let Ok(summary) = engine.reload_configuration() {
                    info!(rules = summary.loaded, active = summary.active, "configuration reloaded");
                }
            }
            Some(ConfigChange::Removed) => {
                warn!("configuration file removed, keeping current rules");
            }
            None => return,
        }
    }
}

async fn console(engine: Arc<Engine>, quit: Arc<Notify>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "stdin read failed, console disabled");
                return;
            }
        };

        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        match command.to_ascii_lowercase().as_str() {
            "reload" => match engine.reload_configuration() {
                Ok(summary) => println!(
                    "reloaded: {} rules, {} active, {} failed",
                    summary.loaded,
                    summary.active,
                    summary.failed.len()
                ),
                Err(e) => println!("reload failed: {e}"),
            },
            "fire" => {
                let Some(id) = words.next() else {
                    println!("usage: fire <id> [args...]");
                    continue;
                };
                let args: Vec<String> = words.map(str::to_string).collect();
                let firings = engine.fire(id, &args);
                println!("fired {} trigger(s) with id '{id}'", firings.len());
            }
            "triggers" => print_triggers(&engine),
            "status" => print_status(&engine),
            "quit" | "exit" | "stop" => {
                quit.notify_one();
                return;
            }
            "help" => println!("commands: reload, fire <id> [args...], triggers, status, quit"),
            other => println!("unknown command '{other}' (try 'help')"),
        }
    }
}

fn print_triggers(engine: &Engine) {
    let ids = engine.manager().manual_trigger_ids();
    if ids.is_empty() {
        println!("no manual triggers");
    } else {
        println!("manual triggers: {}", ids.join(", "));
    }
    for rule in engine.manager().rules() {
        let kind = match &rule.config().template {
            Some(template) => format!("template {}", template.type_name),
            None => rule.trigger_types().join(", "),
        };
        let flag = if rule.is_active() { "active" } else { "inactive" };
        println!("  {} [{flag}]: {kind}", rule.name());
    }
}

fn print_status(engine: &Engine) {
    let servers = engine.servers();
    for name in servers.server_names() {
        let state = engine.startup().server_state(&name);
        let players = servers.player_count(&name);
        match engine.startup().active_startup(&name).filter(|s| !s.is_completed()) {
            Some(startup) => println!(
                "  {name}: {state}, {players} player(s), starting {}% ({} of ~{})",
                startup.percentage(),
                format_duration(startup.elapsed()),
                format_duration(startup.expected())
            ),
            None => println!("  {name}: {state}, {players} player(s)"),
        }
    }
    println!(
        "executor: {} in flight, accepting={}",
        engine.executor().in_flight(),
        engine.executor().is_accepting()
    );
}
