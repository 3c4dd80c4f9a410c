//! `${name}` placeholder substitution over execution variables and live
//! server properties.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use autostart_core::{parse_duration, ServerManager, StartupTracker};
use tracing::trace;

use super::execution::ExecutionContext;
use crate::config::{parse_bool, parse_enum, render_value};

/// Upper bound on whole-string passes; cyclic variables stop here.
pub const MAX_PASSES: usize = 5;

const OPEN: &str = "${";

/// Resolves placeholders against an [`ExecutionContext`], falling back to
/// read-only server properties (`lobby.status`, `lobby.player_count`, ...).
#[derive(Debug, Clone)]
pub struct VariableResolver {
    servers: Arc<ServerManager>,
    startup: Option<Arc<StartupTracker>>,
}

impl VariableResolver {
    pub fn new(servers: Arc<ServerManager>, startup: Option<Arc<StartupTracker>>) -> Self {
        Self { servers, startup }
    }

    pub fn servers(&self) -> &Arc<ServerManager> {
        &self.servers
    }

    /// Substitute every placeholder in `input`. Repeats up to
    /// [`MAX_PASSES`] times, stopping once a pass changes nothing.
    pub fn resolve(&self, input: &str, ctx: &ExecutionContext) -> String {
        let mut current = input.to_string();
        for pass in 0..MAX_PASSES {
            if !current.contains(OPEN) {
                break;
            }
            let next = self.resolve_pass(&current, ctx);
            if next == current {
                trace!(pass, "resolution reached a fixed point");
                break;
            }
            current = next;
        }
        current
    }

    /// Resolve an optional raw string; `None` stays `None`.
    pub fn resolve_opt(&self, input: Option<&str>, ctx: &ExecutionContext) -> Option<String> {
        input.map(|raw| self.resolve(raw, ctx))
    }

    /// Value of a single flat name (no surrounding `${}`), if known.
    pub fn resolve_variable(&self, name: &str, ctx: &ExecutionContext) -> Option<String> {
        if let Some(value) = ctx.get(name) {
            if let Some(rendered) = render_value(&value) {
                return Some(rendered);
            }
        }
        self.global_property(name)
    }

    fn resolve_pass(&self, input: &str, ctx: &ExecutionContext) -> String {
        let bytes = input.as_bytes();
        let mut out = String::with_capacity(input.len());
        let mut literal_start = 0;
        let mut i = 0;

        while i < bytes.len() {
            if !(bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{')) {
                i += 1;
                continue;
            }
            let Some(end) = closing_brace(bytes, i) else {
                // Unmatched opener stays literal.
                i += 1;
                continue;
            };
            out.push_str(&input[literal_start..i]);

            let inner = &input[i + OPEN.len()..end];
            if inner.contains(OPEN) {
                let flat = self.resolve_pass(inner, ctx);
                match self.resolve_variable(&flat, ctx) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str(OPEN);
                        out.push_str(&flat);
                        out.push('}');
                    }
                }
            } else {
                match self.resolve_variable(inner, ctx) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&input[i..=end]),
                }
            }

            i = end + 1;
            literal_start = i;
        }

        out.push_str(&input[literal_start..]);
        out
    }

    /// `<server>.<property>` or a bare server name.
    fn global_property(&self, name: &str) -> Option<String> {
        if let Some(server) = name.strip_suffix(".name") {
            return self.servers.server(server).map(|s| s.name().to_string());
        }
        if let Some(server) = name.strip_suffix(".status") {
            let managed = self.servers.server(server)?;
            let status = if managed.is_online() { "online" } else { "offline" };
            return Some(status.to_string());
        }
        if let Some(server) = name.strip_suffix(".state") {
            let managed = self.servers.server(server)?;
            let state = match &self.startup {
                Some(tracker) => tracker.server_state(server),
                None => managed.state(),
            };
            return Some(state.name().to_string());
        }
        if let Some(server) = name.strip_suffix(".startup_timer") {
            self.servers.server(server)?;
            let seconds = self.startup.as_ref().map_or(0, |t| t.timer_seconds(server));
            return Some(seconds.to_string());
        }
        if let Some(server) = name.strip_suffix(".startup_progress_percentage") {
            let managed = self.servers.server(server)?;
            let percentage = match &self.startup {
                Some(tracker) => tracker.percentage(server),
                None if managed.is_online() => 100,
                None => 0,
            };
            return Some(percentage.to_string());
        }
        if let Some(server) = name.strip_suffix(".startup_progress") {
            let managed = self.servers.server(server)?;
            let progress = match &self.startup {
                Some(tracker) => tracker.progress(server),
                None if managed.is_online() => 1.0,
                None => 0.0,
            };
            return Some(format!("{progress:.2}"));
        }
        if let Some(server) = name.strip_suffix(".player_count") {
            return self.servers.server(server).map(|s| s.player_count().to_string());
        }
        if let Some(server) = name.strip_suffix(".players") {
            return self.servers.server(server).map(|s| s.players().join(", "));
        }
        self.servers.server(name).map(|s| s.name().to_string())
    }

    // ── Typed accessors ─────────────────────────────────────────────

    pub fn resolve_int(&self, input: &str, ctx: &ExecutionContext, default: i32) -> i32 {
        self.resolve(input, ctx).trim().parse().unwrap_or(default)
    }

    pub fn resolve_long(&self, input: &str, ctx: &ExecutionContext, default: i64) -> i64 {
        self.resolve(input, ctx).trim().parse().unwrap_or(default)
    }

    pub fn resolve_double(&self, input: &str, ctx: &ExecutionContext, default: f64) -> f64 {
        self.resolve(input, ctx).trim().parse().unwrap_or(default)
    }

    pub fn resolve_bool(&self, input: &str, ctx: &ExecutionContext, default: bool) -> bool {
        parse_bool(&self.resolve(input, ctx)).unwrap_or(default)
    }

    pub fn resolve_duration(&self, input: &str, ctx: &ExecutionContext, default: Duration) -> Duration {
        parse_duration(&self.resolve(input, ctx)).unwrap_or(default)
    }

    pub fn resolve_enum<T: FromStr>(&self, input: &str, ctx: &ExecutionContext, default: T) -> T {
        parse_enum(&self.resolve(input, ctx)).unwrap_or(default)
    }

    /// Resolve each element, one output per input. Empty results are kept
    /// so positions line up with `items`.
    pub fn resolve_list(&self, items: &[String], ctx: &ExecutionContext) -> Vec<String> {
        items.iter().map(|item| self.resolve(item, ctx)).collect()
    }
}

/// Index of the `}` closing the `${` at `start`, counting nested opens.
fn closing_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut j = start;
    while j < bytes.len() {
        if bytes[j] == b'$' && bytes.get(j + 1) == Some(&b'{') {
            depth += 1;
            j += 2;
            continue;
        }
        if bytes[j] == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(j);
            }
        }
        j += 1;
    }
    None
}
