//! Startup progress tracking and expected-startup-time estimation.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::ServerManager;
use crate::duration::parse_duration;
use crate::state::ServerState;

pub const DEFAULT_EXPECTED_STARTUP: Duration = Duration::from_secs(30);

const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MONITOR_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const DATA_FILE_NAME: &str = "startup_times.dat";
const MAX_SAMPLES_PER_SERVER: usize = 20;

// ── Startup context ─────────────────────────────────────────────────

#[derive(Debug)]
struct Completion {
    at: Instant,
    state: ServerState,
}

/// One tracked startup of one server.
#[derive(Debug)]
pub struct StartupContext {
    server: String,
    started_at: Instant,
    expected: Duration,
    completion: Mutex<Option<Completion>>,
}

impl StartupContext {
    pub fn new(server: impl Into<String>, expected: Duration) -> Self {
        Self {
            server: server.into(),
            started_at: Instant::now(),
            expected,
            completion: Mutex::new(None),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn expected(&self) -> Duration {
        self.expected
    }

    pub fn is_completed(&self) -> bool {
        self.completion.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// `starting` until completed, then `online` or `failed`.
    pub fn state(&self) -> ServerState {
        self.completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.state)
            .unwrap_or(ServerState::Starting)
    }

    /// Time since start, frozen at completion.
    pub fn elapsed(&self) -> Duration {
        match self.completion.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(c) => c.at.duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }

    pub fn timer_seconds(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// 0.0..=0.99 while starting; 1.0 once online; 0.0 if failed.
    pub fn progress(&self) -> f64 {
        match self.state() {
            ServerState::Online => 1.0,
            ServerState::Starting => {
                let expected = self.expected.as_millis();
                if expected == 0 {
                    return 0.0;
                }
                let ratio = self.elapsed().as_millis() as f64 / expected as f64;
                ratio.clamp(0.0, 0.99)
            }
            _ => 0.0,
        }
    }

    /// Integer percentage; 100 is reserved for online.
    pub fn percentage(&self) -> u8 {
        match self.state() {
            ServerState::Online => 100,
            ServerState::Starting => {
                let expected = self.expected.as_millis();
                if expected == 0 {
                    return 0;
                }
                let pct = self.elapsed().as_millis() * 100 / expected;
                pct.min(99) as u8
            }
            _ => 0,
        }
    }

    /// Actual startup duration, once completed.
    pub fn actual_duration(&self) -> Option<Duration> {
        self.completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.at.duration_since(self.started_at))
    }

    /// Returns false when the context was already completed.
    fn complete(&self, state: ServerState) -> bool {
        let mut completion = self.completion.lock().unwrap_or_else(PoisonError::into_inner);
        if completion.is_some() {
            return false;
        }
        *completion = Some(Completion {
            at: Instant::now(),
            state,
        });
        true
    }
}

// ── Startup tracker ─────────────────────────────────────────────────

/// Tracks in-flight server startups and feeds completed durations into
/// [`StartupTimes`].
#[derive(Debug)]
pub struct StartupTracker {
    servers: Arc<ServerManager>,
    times: Arc<StartupTimes>,
    active: RwLock<HashMap<String, Arc<StartupContext>>>,
}

impl StartupTracker {
    pub fn new(servers: Arc<ServerManager>, times: Arc<StartupTimes>) -> Self {
        Self {
            servers,
            times,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn times(&self) -> &Arc<StartupTimes> {
        &self.times
    }

    /// Start tracking `server` and spawn a monitor that completes the
    /// context once the server reports online.
    pub fn begin_startup(self: &Arc<Self>, server: &str) -> Arc<StartupContext> {
        let expected = self.expected_startup_time(server);
        let context = Arc::new(StartupContext::new(server, expected));
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server.to_string(), Arc::clone(&context));
        debug!(server, expected_ms = expected.as_millis() as u64, "began startup tracking");

        let tracker = Arc::clone(self);
        let monitored = Arc::clone(&context);
        tokio::spawn(async move { tracker.monitor(monitored).await });
        context
    }

    async fn monitor(&self, context: Arc<StartupContext>) {
        let deadline = Instant::now() + MONITOR_TIMEOUT;
        loop {
            if context.is_completed() {
                return;
            }
            if Instant::now() >= deadline {
                warn!(server = context.server(), "startup monitor timed out");
                self.complete_startup(context.server(), false);
                return;
            }
            if let Some(server) = self.servers.server(context.server()) {
                if server.refresh().await.is_online() {
                    self.complete_startup(context.server(), true);
                    return;
                }
            }
            tokio::time::sleep(MONITOR_POLL_INTERVAL).await;
        }
    }

    /// Mark the active startup finished. Successful startups are recorded
    /// when auto-calculation is enabled for the server.
    pub fn complete_startup(&self, server: &str, success: bool) {
        let Some(context) = self.active_startup(server) else {
            return;
        };
        let state = if success { ServerState::Online } else { ServerState::Failed };
        if !context.complete(state) {
            return;
        }
        if success && self.auto_calculate(server) {
            if let Some(actual) = context.actual_duration() {
                self.times.record(server, actual);
            }
        }
        debug!(server, success, elapsed_ms = context.elapsed().as_millis() as u64, "completed startup tracking");
    }

    pub fn active_startup(&self, server: &str) -> Option<Arc<StartupContext>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server)
            .cloned()
    }

    fn in_progress(&self, server: &str) -> Option<Arc<StartupContext>> {
        self.active_startup(server).filter(|c| !c.is_completed())
    }

    pub fn clear_startup(&self, server: &str) {
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(server);
    }

    /// State for display: backends that report state are authoritative;
    /// otherwise an in-progress startup reads as `starting`.
    pub fn server_state(&self, server: &str) -> ServerState {
        let Some(managed) = self.servers.server(server) else {
            return ServerState::Unknown;
        };
        if !managed.supports_state() && self.in_progress(server).is_some() {
            return ServerState::Starting;
        }
        managed.state()
    }

    pub fn timer_seconds(&self, server: &str) -> u64 {
        self.in_progress(server).map(|c| c.timer_seconds()).unwrap_or(0)
    }

    pub fn progress(&self, server: &str) -> f64 {
        match self.in_progress(server) {
            Some(c) => c.progress(),
            None if self.servers.is_online(server) => 1.0,
            None => 0.0,
        }
    }

    pub fn percentage(&self, server: &str) -> u8 {
        match self.in_progress(server) {
            Some(c) => c.percentage(),
            None if self.servers.is_online(server) => 100,
            None => 0,
        }
    }

    fn auto_calculate(&self, server: &str) -> bool {
        self.servers
            .server(server)
            .is_some_and(|s| s.config().auto_calculate_startup())
    }

    /// Expected duration: recorded samples when auto-calculation is enabled
    /// (or no timer is configured), else the configured time, else 30s.
    fn expected_startup_time(&self, server: &str) -> Duration {
        let Some(managed) = self.servers.server(server) else {
            return DEFAULT_EXPECTED_STARTUP;
        };
        let timer = managed.config().startup_timer.as_ref();
        let use_samples = timer.map_or(true, |t| t.auto_calculate_expected_startup_time.unwrap_or(false));
        if use_samples {
            if let Some(expected) = self.times.expected(server) {
                return expected;
            }
        }
        match timer.and_then(|t| t.expected_startup_time.as_deref()) {
            Some(raw) if !raw.trim().is_empty() => parse_duration(raw).unwrap_or_else(|e| {
                warn!(server, error = %e, "invalid expected_startup_time, using default");
                DEFAULT_EXPECTED_STARTUP
            }),
            _ => DEFAULT_EXPECTED_STARTUP,
        }
    }
}

// ── Persisted samples ───────────────────────────────────────────────

/// Recent startup durations per server, persisted as
/// `name:ms,ms,...` lines in `startup_times.dat`.
#[derive(Debug)]
pub struct StartupTimes {
    path: PathBuf,
    samples: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl StartupTimes {
    /// Load samples from `data_dir`; a missing or unreadable file starts empty.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(DATA_FILE_NAME);
        let samples = match fs::read_to_string(&path) {
            Ok(text) => parse_samples(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read startup times");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), servers = samples.len(), "loaded startup times");
        Self {
            path,
            samples: Mutex::new(samples),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, server: &str, duration: Duration) {
        let ms = duration.as_millis() as u64;
        if ms == 0 {
            return;
        }
        {
            let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = samples.entry(server.to_string()).or_default();
            entry.push_back(ms);
            while entry.len() > MAX_SAMPLES_PER_SERVER {
                entry.pop_front();
            }
        }
        debug!(server, ms, "recorded startup time");
        self.save();
    }

    /// Weighted average of recorded samples; newer samples weigh more.
    pub fn expected(&self, server: &str) -> Option<Duration> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let times = samples.get(server).filter(|t| !t.is_empty())?;
        let n = times.len() as f64;
        let (sum, weights) = times
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sum, weights), (i, &ms)| {
                let w = (i as f64 + 1.0) / n;
                (sum + ms as f64 * w, weights + w)
            });
        Some(Duration::from_millis((sum / weights) as u64))
    }

    pub fn sample_count(&self, server: &str) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server)
            .map_or(0, VecDeque::len)
    }

    pub fn clear(&self, server: &str) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(server);
        self.save();
    }

    fn save(&self) {
        let body = {
            let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
            let mut names: Vec<&String> = samples.keys().collect();
            names.sort();
            let mut body = String::from("# startup times in milliseconds: server:ms,ms,...\n");
            for name in names {
                let times: Vec<String> = samples[name].iter().map(u64::to_string).collect();
                if !times.is_empty() {
                    body.push_str(&format!("{}:{}\n", name, times.join(",")));
                }
            }
            body
        };
        if let Err(e) = write_atomic(&self.path, &body) {
            warn!(path = %self.path.display(), error = %e, "failed to save startup times");
        }
    }
}

fn parse_samples(text: &str) -> HashMap<String, VecDeque<u64>> {
    let mut samples = HashMap::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, list)) = line.split_once(':') else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let mut times: VecDeque<u64> = list
            .split(',')
            .filter_map(|t| t.trim().parse::<u64>().ok())
            .filter(|&t| t > 0)
            .collect();
        while times.len() > MAX_SAMPLES_PER_SERVER {
            times.pop_front();
        }
        if !times.is_empty() {
            samples.insert(name.to_string(), times);
        }
    }
    samples
}

fn write_atomic(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("dat.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::CountingControl;
    use crate::server::{ManagedServer, ServerConfig, StartupTimerConfig};
    use std::sync::atomic::Ordering;

    fn tracker_with(
        config: ServerConfig,
        data_dir: &Path,
    ) -> (Arc<StartupTracker>, Arc<ServerManager>, Arc<CountingControl>) {
        let control = Arc::new(CountingControl::default());
        let servers = Arc::new(ServerManager::new());
        servers.insert(ManagedServer::new("lobby", config, Some(control.clone())));
        let times = Arc::new(StartupTimes::load(data_dir));
        let tracker = Arc::new(StartupTracker::new(Arc::clone(&servers), times));
        (tracker, servers, control)
    }

    fn timer(expected: &str, auto: bool) -> ServerConfig {
        ServerConfig {
            startup_timer: Some(StartupTimerConfig {
                expected_startup_time: Some(expected.into()),
                auto_calculate_expected_startup_time: Some(auto),
            }),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn progress_caps_below_one_until_online() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tracker, _servers, _control) = tracker_with(timer("10s", false), dir.path());

        let ctx = tracker.begin_startup("lobby");
        assert_eq!(ctx.expected(), Duration::from_secs(10));
        assert_eq!(tracker.server_state("lobby"), ServerState::Starting);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(tracker.percentage("lobby"), 50);
        assert!((tracker.progress("lobby") - 0.5).abs() < 0.01);
        assert_eq!(tracker.timer_seconds("lobby"), 5);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(tracker.percentage("lobby"), 99);
        assert!((tracker.progress("lobby") - 0.99).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_completes_when_server_comes_online() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tracker, servers, control) = tracker_with(timer("10s", true), dir.path());

        let ctx = tracker.begin_startup("lobby");
        tokio::time::sleep(Duration::from_secs(3)).await;
        control.online.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(ctx.is_completed());
        assert_eq!(ctx.state(), ServerState::Online);
        assert!(servers.is_online("lobby"));
        assert_eq!(tracker.percentage("lobby"), 100);
        assert_eq!(tracker.progress("lobby"), 1.0);
        assert_eq!(tracker.timer_seconds("lobby"), 0);
        assert_eq!(tracker.times().sample_count("lobby"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_gives_up_after_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tracker, _servers, _control) = tracker_with(ServerConfig::default(), dir.path());

        let ctx = tracker.begin_startup("lobby");
        assert_eq!(ctx.expected(), DEFAULT_EXPECTED_STARTUP);
        tokio::time::sleep(MONITOR_TIMEOUT + Duration::from_secs(2)).await;

        assert_eq!(ctx.state(), ServerState::Failed);
        assert_eq!(tracker.percentage("lobby"), 0);
        assert_eq!(tracker.times().sample_count("lobby"), 0);
    }

    #[test]
    fn samples_persist_and_weight_recent_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let times = StartupTimes::load(dir.path());
        assert_eq!(times.expected("lobby"), None);

        times.record("lobby", Duration::from_millis(10_000));
        times.record("lobby", Duration::from_millis(20_000));
        // weights 0.5 and 1.0: (5000 + 20000) / 1.5
        assert_eq!(times.expected("lobby"), Some(Duration::from_millis(16_666)));

        let reloaded = StartupTimes::load(dir.path());
        assert_eq!(reloaded.sample_count("lobby"), 2);
        let text = fs::read_to_string(reloaded.path()).unwrap();
        assert!(text.contains("lobby:10000,20000"));
    }

    #[test]
    fn samples_are_capped() {
        let dir = tempfile::TempDir::new().unwrap();
        let times = StartupTimes::load(dir.path());
        for i in 1..=25 {
            times.record("lobby", Duration::from_millis(i * 1_000));
        }
        assert_eq!(times.sample_count("lobby"), MAX_SAMPLES_PER_SERVER);
        times.clear("lobby");
        assert_eq!(times.sample_count("lobby"), 0);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let parsed = parse_samples("# header\n\nbad line\n:1,2\nlobby: 100, x, -5, 200\nempty:\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["lobby"], VecDeque::from(vec![100, 200]));
    }
}
