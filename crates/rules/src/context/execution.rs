use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::render_value;

/// One-shot marker an action fulfils to let a waiting trigger proceed
/// before the rest of the action chain finishes.
#[derive(Debug)]
pub struct ReleaseSignal {
    tx: watch::Sender<bool>,
}

impl ReleaseSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fulfil the signal. Returns false if it was already released.
    pub fn release(&self) -> bool {
        self.tx.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        })
    }

    pub fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is released (immediately if it already is).
    pub async fn released(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|released| *released).await;
    }
}

type Attachment = Arc<dyn Any + Send + Sync>;

/// Isolated variable scope of one rule firing.
///
/// Variables are JSON values keyed by name. Host objects that actions need
/// by reference (a pending connection, for instance) travel as typed
/// attachments.
#[derive(Debug)]
pub struct ExecutionContext {
    id: String,
    variables: RwLock<HashMap<String, Value>>,
    attachments: RwLock<HashMap<String, Attachment>>,
    created_at: DateTime<Utc>,
    started: Instant,
    release: OnceLock<Arc<ReleaseSignal>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string(), HashMap::new(), HashMap::new())
    }

    fn with_id(
        id: String,
        variables: HashMap<String, Value>,
        attachments: HashMap<String, Attachment>,
    ) -> Self {
        Self {
            id,
            variables: RwLock::new(variables),
            attachments: RwLock::new(attachments),
            created_at: Utc::now(),
            started: Instant::now(),
            release: OnceLock::new(),
        }
    }

    /// Copy of this context with `extra` variables layered on top. The
    /// child id is `<parent-id>-<8 hex chars>`; later writes to either
    /// side are not shared.
    pub fn child<I, K>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut variables = self.variables();
        variables.extend(extra.into_iter().map(|(k, v)| (k.into(), v)));
        let attachments = self
            .attachments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let suffix = Uuid::new_v4().simple().to_string();
        Self::with_id(format!("{}-{}", self.id, &suffix[..8]), variables, attachments)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    // ── Variables ───────────────────────────────────────────────────

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Variable rendered as text (`None` when absent or null).
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).as_ref().and_then(render_value)
    }

    pub fn has(&self, key: &str) -> bool {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Snapshot of all variables.
    pub fn variables(&self) -> HashMap<String, Value> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Attachments ─────────────────────────────────────────────────

    pub fn attach<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
        self.attachments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn attachment<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let any = self
            .attachments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()?;
        any.downcast::<T>().ok()
    }

    // ── Release signal ──────────────────────────────────────────────

    /// The release signal, created on first call.
    pub fn release_signal(&self) -> Arc<ReleaseSignal> {
        Arc::clone(self.release.get_or_init(|| Arc::new(ReleaseSignal::new())))
    }

    pub fn has_release_signal(&self) -> bool {
        self.release.get().is_some()
    }

    /// Release a waiting trigger. No-op when nobody asked for the signal.
    pub fn release_event(&self) {
        if let Some(signal) = self.release.get() {
            signal.release();
        }
    }
}
