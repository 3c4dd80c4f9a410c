use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::*;
use crate::host::{ConnectionDecision, ConnectionRequest, HostEvent};
use crate::testing::{FakeControl, Harness};

async fn connect(h: &Harness, player: &str, server: &str) -> Arc<ConnectionRequest> {
    let request = Arc::new(ConnectionRequest::new(player, "uuid-1", server));
    h.engine.publish(HostEvent::Connection(Arc::clone(&request))).await;
    request
}

// ── manual ──────────────────────────────────────────────────────────

#[test]
fn inactive_manual_trigger_does_not_fire() {
    let trigger = ManualTrigger::new("launch");
    assert!(!trigger.is_active());
    assert!(trigger.fire(&[]).is_none());
}

#[tokio::test]
async fn manual_fire_exposes_arguments() {
    let h = Harness::new();
    let lobby = h.server("lobby", FakeControl::default());
    h.rules(
        r#"
rules:
  shout:
    triggers:
      - manual: {id: launch}
    actions:
      - send_command: {server: lobby, command: "say ${manual.args.0} (${manual.args.length}) via ${manual.id}"}
"#,
    );

    let firings = h.engine.fire("launch", &["hello".to_string()]);
    assert_eq!(firings.len(), 1);
    for firing in firings {
        assert!(firing.wait().await);
    }
    assert_eq!(lobby.commands(), vec!["say hello (1) via launch"]);
    assert!(h.engine.fire("nope", &[]).is_empty());
}

#[tokio::test]
async fn disabled_rule_is_loaded_but_not_fired() {
    let h = Harness::new();
    let summary = h.rules(
        r#"
rules:
  quiet:
    enabled: false
    triggers:
      - manual: {id: launch}
    actions:
      - log: {message: hi}
"#,
    );
    assert_eq!((summary.loaded, summary.active), (1, 0));
    assert!(!h.engine.manager().rule("quiet").unwrap().is_active());
    assert!(h.engine.fire("launch", &[]).is_empty());
}

// ── connection ──────────────────────────────────────────────────────

#[tokio::test]
async fn connection_sets_player_and_server_variables() {
    let h = Harness::new();
    h.server("lobby", FakeControl::default());
    h.engine.servers().add_player("lobby", "Alex");
    h.rules(
        r#"
rules:
  greet:
    triggers:
      - connection: {server_list: {servers: [lobby]}}
    actions:
      - send_message: {message: "${connection.server.name} is ${connection.server.status} with ${connection.server.player_count}"}
"#,
    );

    let request = connect(&h, "Steve", "lobby").await;
    connect(&h, "Steve", "survival").await;
    h.engine.executor().shutdown();
    assert!(h.engine.executor().await_termination(Duration::from_secs(1)).await);

    assert!(!request.is_denied());
    assert_eq!(h.bridge.calls(), vec!["message Steve: lobby is offline with 1"]);
}

#[tokio::test(start_paused = true)]
async fn denied_connection_is_held_until_released() {
    let h = Harness::new();
    h.rules(
        r#"
rules:
  gate:
    triggers:
      - connection: {deny_connection: true}
    actions:
      - sleep: {duration: 5s}
      - allow_connection: {server: hub}
      - sleep: {duration: 1m}
"#,
    );

    let started = Instant::now();
    let request = connect(&h, "Steve", "lobby").await;
    let held = started.elapsed();
    assert!(held >= Duration::from_secs(5), "{held:?}");
    assert!(held < Duration::from_secs(60), "{held:?}");
    assert_eq!(request.decision(), ConnectionDecision::Allowed("hub".into()));
}

#[tokio::test(start_paused = true)]
async fn denied_connection_without_release_waits_for_the_firing() {
    let h = Harness::new();
    h.rules(
        r#"
rules:
  gate:
    triggers:
      - connection:
          deny_connection: true
          player_list: {mode: blacklist, players: [Admin]}
    actions:
      - sleep: {duration: 2s}
"#,
    );

    let started = Instant::now();
    let request = connect(&h, "Steve", "lobby").await;
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(request.is_denied());

    let admin = connect(&h, "Admin", "lobby").await;
    assert!(!admin.is_denied());
}

// ── lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn proxy_shutdown_rule_runs_before_the_executor_closes() {
    let h = Harness::new();
    let lobby = h.server("lobby", FakeControl::default());
    h.rules(
        r#"
rules:
  farewell:
    triggers:
      - proxy_shutdown:
    actions:
      - send_command: {server: lobby, command: "save-all"}
"#,
    );

    assert!(h.engine.shutdown().await);
    assert_eq!(lobby.commands(), vec!["save-all"]);
    assert!(!h.engine.executor().is_accepting());
}

// ── empty_server ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_server_fires_once_and_rearms_on_join() {
    let h = Harness::new();
    let lobby = h.server("lobby", FakeControl::default());
    h.engine.servers().report_online("lobby", true);
    h.rules(
        r#"
rules:
  idle:
    triggers:
      - empty_server: {empty_time: 1m}
    actions:
      - send_command: {server: lobby, command: "say ${empty_server.server.name} idle for ${empty_server.empty_time}"}
"#,
    );

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(lobby.commands().len(), 1);
    assert!(lobby.commands()[0].starts_with("say lobby idle for"));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(lobby.commands().len(), 1);

    h.engine
        .publish(HostEvent::ServerSwitch {
            player: "Steve".into(),
            server: "lobby".into(),
            previous: None,
        })
        .await;
    h.engine
        .publish(HostEvent::Disconnect {
            player: "Steve".into(),
            server: "lobby".into(),
        })
        .await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(lobby.commands().len(), 2);
}
