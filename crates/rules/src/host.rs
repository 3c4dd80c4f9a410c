//! Host event surface: lifecycle and player events that triggers subscribe
//! to, plus the player-facing command bridge used by actions.
//!
//! Listeners are awaited one after another for each published event, so a
//! listener that holds an event (a connection waiting for its rule to
//! finish) delays the host until it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

// ── Events ──────────────────────────────────────────────────────────

/// Execution context attachment key for the pending [`ConnectionRequest`].
pub const CONNECTION_ATTACHMENT: &str = "connection";

/// Where a pending connection will go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDecision {
    Allowed(String),
    Denied,
}

/// A player about to connect to a server. The decision starts as
/// "allowed to the original target" and may be changed by listeners.
#[derive(Debug)]
pub struct ConnectionRequest {
    player: String,
    uuid: String,
    server: String,
    decision: Mutex<ConnectionDecision>,
}

impl ConnectionRequest {
    pub fn new(player: impl Into<String>, uuid: impl Into<String>, server: impl Into<String>) -> Self {
        let server = server.into();
        Self {
            player: player.into(),
            uuid: uuid.into(),
            decision: Mutex::new(ConnectionDecision::Allowed(server.clone())),
            server,
        }
    }

    pub fn player(&self) -> &str {
        &self.player
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Original target server.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn decision(&self) -> ConnectionDecision {
        self.decision
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_denied(&self) -> bool {
        self.decision() == ConnectionDecision::Denied
    }

    pub fn deny(&self) {
        *self.decision.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionDecision::Denied;
    }

    pub fn allow(&self, server: impl Into<String>) {
        *self.decision.lock().unwrap_or_else(PoisonError::into_inner) =
            ConnectionDecision::Allowed(server.into());
    }
}

/// Events published by the host.
#[derive(Debug, Clone)]
pub enum HostEvent {
    ProxyShutdown,
    Connection(Arc<ConnectionRequest>),
    /// `player` left the proxy while on `server`.
    Disconnect { player: String, server: String },
    /// `player` finished connecting to `server`, coming from `previous`.
    ServerSwitch {
        player: String,
        server: String,
        previous: Option<String>,
    },
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::ProxyShutdown => "proxy_shutdown",
            HostEvent::Connection(_) => "connection",
            HostEvent::Disconnect { .. } => "disconnect",
            HostEvent::ServerSwitch { .. } => "server_switch",
        }
    }
}

// ── Event bus ───────────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &HostEvent);
}

/// Handle returned by [`EventBus::subscribe`].
pub type ListenerId = u64;

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver `event` to every listener registered at call time.
    pub async fn publish(&self, event: &HostEvent) {
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        debug!(event = event.name(), listeners = listeners.len(), "publishing host event");
        for listener in listeners {
            listener.on_event(event).await;
        }
    }
}

// ── Player bridge ───────────────────────────────────────────────────

/// Player-facing commands the host can carry out.
#[async_trait::async_trait]
pub trait PlayerBridge: Send + Sync {
    async fn send_message(&self, player: &str, message: &str) -> bool;
    async fn disconnect(&self, player: &str, reason: &str) -> bool;
    async fn connect(&self, player: &str, server: &str) -> bool;
}

/// Bridge for hosts without player I/O: records the request in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBridge;

#[async_trait::async_trait]
impl PlayerBridge for LoggingBridge {
    async fn send_message(&self, player: &str, message: &str) -> bool {
        info!(player, message, "send message");
        true
    }

    async fn disconnect(&self, player: &str, reason: &str) -> bool {
        info!(player, reason, "disconnect player");
        true
    }

    async fn connect(&self, player: &str, server: &str) -> bool {
        info!(player, server, "connect player");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl EventListener for Counter {
        async fn on_event(&self, _event: &HostEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn publish_reaches_current_listeners() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let a = bus.subscribe(Arc::new(Counter(Arc::clone(&hits))));
        bus.subscribe(Arc::new(Counter(Arc::clone(&hits))));

        bus.publish(&HostEvent::ProxyShutdown).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        bus.publish(&HostEvent::ProxyShutdown).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn connection_decision_changes() {
        let request = ConnectionRequest::new("alice", "uuid-1", "lobby");
        assert_eq!(request.decision(), ConnectionDecision::Allowed("lobby".into()));
        request.deny();
        assert!(request.is_denied());
        request.allow("limbo");
        assert_eq!(request.decision(), ConnectionDecision::Allowed("limbo".into()));
        assert_eq!(request.server(), "lobby");
    }
}
