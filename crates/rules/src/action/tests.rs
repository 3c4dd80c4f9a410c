use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::*;
use crate::host::{ConnectionDecision, ConnectionRequest, CONNECTION_ATTACHMENT};
use crate::testing::{FakeControl, Harness};

fn actions(yaml: &str) -> Vec<ActionConfig> {
    let items: Vec<Value> = serde_yaml::from_str(yaml).unwrap();
    ActionConfig::parse_list(&items, "test")
}

fn firing() -> Arc<ExecutionContext> {
    let ctx = ExecutionContext::new();
    ctx.set("_rule_name", "test");
    Arc::new(ctx)
}

/// Firing for `player` connecting to `server`, with the request attached.
fn connecting(player: &str, server: &str) -> (Arc<ExecutionContext>, Arc<ConnectionRequest>) {
    let ctx = firing();
    let request = Arc::new(ConnectionRequest::new(player, "uuid-1", server));
    ctx.set("connection.player.name", player);
    ctx.set("connection.server.name", server);
    ctx.attach::<ConnectionRequest>(CONNECTION_ATTACHMENT, Arc::clone(&request));
    (ctx, request)
}

fn harness() -> Harness {
    let h = Harness::new();
    h.rules("");
    h
}

async fn run(h: &Harness, yaml: &str, ctx: &Arc<ExecutionContext>) {
    let bundle = h.engine.actions().context().unwrap();
    run_actions(&bundle, &actions(yaml), ctx).await;
}

fn build(h: &Harness, type_name: &str, params: Value) -> Arc<dyn Action> {
    let config = ActionConfig::new(type_name, params.as_object().cloned().unwrap());
    h.engine.actions().create(&config).unwrap().unwrap()
}

// ── Catalog ─────────────────────────────────────────────────────────

#[test]
fn catalog_knows_host_only_actions_without_building_them() {
    let registry = builtin_registry();
    assert!(registry.is_known("START"));
    assert!(registry.is_known("send_title"));
    assert!(!registry.is_known("teleport"));
}

#[tokio::test]
async fn missing_required_parameter_is_a_config_error() {
    let h = harness();
    let config = ActionConfig::new("send_command", json!({"server": "lobby"}).as_object().cloned().unwrap());
    let err = h.engine.actions().create(&config).err().unwrap();
    assert!(err.to_string().contains("command"), "{err}");
}

// ── Server actions ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn start_skips_servers_already_online() {
    let h = harness();
    let lobby = h.server("lobby", FakeControl::default());
    let ctx = firing();

    run(&h, "- start: {server: lobby}", &ctx).await;
    assert_eq!(lobby.starts(), 1);
    assert!(h.engine.startup().active_startup("lobby").is_some());

    h.engine.servers().report_online("lobby", true);
    run(&h, "- start: {server: lobby}", &ctx).await;
    assert_eq!(lobby.starts(), 1);
}

#[tokio::test]
async fn stop_targets_the_resolved_server() {
    let h = harness();
    let survival = h.server("survival", FakeControl::default());
    let ctx = firing();
    ctx.set("target", "survival");

    run(&h, "- stop: {server: \"${target}\"}", &ctx).await;
    assert_eq!(survival.stops(), 1);
    assert!(!h.engine.servers().is_online("survival"));
}

#[tokio::test]
async fn unknown_server_fails_the_action() {
    let h = harness();
    let result = build(&h, "stop", json!({"server": "ghost"})).execute(&firing()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn send_command_strips_slash_and_resolves() {
    let h = harness();
    let lobby = h.server("lobby", FakeControl::default());
    let ctx = firing();
    ctx.set("who", "Alex");

    run(
        &h,
        r#"
- send_command: {server: lobby, command: "/say hello ${who}"}
- send_command: {server: lobby, command: "   "}
"#,
        &ctx,
    )
    .await;
    assert_eq!(lobby.commands(), vec!["say hello Alex"]);
}

// ── Player actions ──────────────────────────────────────────────────

#[tokio::test]
async fn player_actions_default_to_the_connecting_player() {
    let h = harness();
    let (ctx, _request) = connecting("Steve", "lobby");

    run(
        &h,
        r#"
- send_message: {message: "welcome to ${connection.server.name}"}
- connect: {server: hub}
"#,
        &ctx,
    )
    .await;
    assert_eq!(
        h.bridge.calls(),
        vec!["message Steve: welcome to lobby", "connect Steve -> hub"]
    );
}

#[tokio::test]
async fn player_action_without_a_player_fails() {
    let h = harness();
    let result = build(&h, "send_message", json!({"message": "hi"})).execute(&firing()).await;
    assert!(result.is_err());
    assert!(h.bridge.calls().is_empty());

    build(&h, "send_message", json!({"message": "hi", "player": "Alex"}))
        .execute(&firing())
        .await
        .unwrap();
    assert_eq!(h.bridge.calls(), vec!["message Alex: hi"]);
}

#[tokio::test]
async fn disconnect_refuses_a_pending_connection() {
    let h = harness();
    let (ctx, request) = connecting("Steve", "lobby");
    let signal = ctx.release_signal();

    run(&h, "- disconnect: {reason: \"bye ${connection.player.name}\"}", &ctx).await;
    assert!(request.is_denied());
    assert!(signal.is_released());
    assert_eq!(h.bridge.calls(), vec!["disconnect Steve: bye Steve"]);
}

#[tokio::test]
async fn allow_connection_redirects_and_releases() {
    let h = harness();
    let (ctx, request) = connecting("Steve", "lobby");
    request.deny();
    let signal = ctx.release_signal();

    run(&h, "- allow_connection: {server: hub}", &ctx).await;
    assert_eq!(request.decision(), ConnectionDecision::Allowed("hub".into()));
    assert!(signal.is_released());

    let result = build(&h, "allow_connection", json!({})).execute(&firing()).await;
    assert!(result.is_err());
}

// ── Flow ────────────────────────────────────────────────────────────

#[tokio::test]
async fn if_takes_first_passing_branch() {
    let h = harness();
    let lobby = h.server("lobby", FakeControl::default());
    let yaml = r#"
- if:
    checks:
      - number_compare: {value: "${n}", min: 10}
    then:
      - send_command: {server: lobby, command: big}
    else_if:
      - checks:
          - number_compare: {value: "${n}", min: 5}
        then:
          - send_command: {server: lobby, command: medium}
      - then:
          - send_command: {server: lobby, command: never}
    else:
      - send_command: {server: lobby, command: small}
"#;

    for n in [7, 12, 1] {
        let ctx = firing();
        ctx.set("n", n);
        run(&h, yaml, &ctx).await;
    }
    assert_eq!(lobby.commands(), vec!["medium", "big", "small"]);
}

#[tokio::test(start_paused = true)]
async fn while_stops_at_timeout() {
    let h = harness();
    let lobby = h.server("lobby", FakeControl::default());
    let ctx = firing();
    ctx.set("go", "yes");

    run(
        &h,
        r#"
- while:
    checks:
      - string_equals: {value: "${go}", equals: "yes"}
    timeout: 3500ms
    update_interval: 1s
    do:
      - send_command: {server: lobby, command: tick}
"#,
        &ctx,
    )
    .await;
    assert_eq!(lobby.commands().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn while_with_failing_conditions_never_runs_body() {
    let h = harness();
    let lobby = h.server("lobby", FakeControl::default());

    run(
        &h,
        r#"
- while:
    checks:
      - string_equals: {value: "${go}", equals: "yes"}
    do:
      - send_command: {server: lobby, command: tick}
"#,
        &firing(),
    )
    .await;
    assert!(lobby.commands().is_empty());
}

// ── Sequencing ──────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_and_failing_actions_do_not_stop_the_sequence() {
    let h = harness();
    let lobby = h.server("lobby", FakeControl::default());

    run(
        &h,
        r#"
- teleport: {x: 1}
- send_title: {title: hi}
- stop: {server: ghost}
- send_command: {server: lobby, command: still-running}
"#,
        &firing(),
    )
    .await;
    assert_eq!(lobby.commands(), vec!["still-running"]);
}

#[tokio::test(start_paused = true)]
async fn detached_action_runs_on_the_task_scope() {
    let h = harness();
    let lobby = h.server("lobby", FakeControl::default());

    run(
        &h,
        r#"
- sleep: {duration: 1m, wait_for_completion: false}
- send_command: {server: lobby, command: first}
"#,
        &firing(),
    )
    .await;
    assert_eq!(lobby.commands(), vec!["first"]);
    assert_eq!(h.engine.executor().tasks().len(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(h.engine.executor().tasks().is_empty());
}

#[tokio::test]
async fn sleep_rejects_bad_durations() {
    let h = harness();
    let result = build(&h, "sleep", json!({"duration": "soon"})).execute(&firing()).await;
    assert!(result.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn exec_reports_exit_status() {
    let h = harness();
    let ctx = firing();
    ctx.set("code", 3);

    build(&h, "exec", json!({"command": "true"})).execute(&ctx).await.unwrap();
    let result = build(&h, "exec", json!({"command": "exit ${code}"})).execute(&ctx).await;
    assert!(result.is_err());
}
