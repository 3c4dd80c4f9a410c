//! Tests for the configuration model and loader.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use super::*;

const FULL_CONFIG_YAML: &str = r#"
version: 1
settings:
  shutdown_timeout: 10s
defaults:
  server:
    control_api:
      type: shell
      command_timeout: 2m
servers:
  lobby:
    control_api:
      start_command: ./start.sh
  survival: {}
rules:
  morning:
    triggers:
      - cron:
          expression: "0 8 * * *"
      - manual:
          id: launch
    conditions:
      mode: any
      checks:
        - server_status:
            server: lobby
            status: offline
            invert: true
    action:
      - start:
          server: lobby
      - log:
          message: "started"
          wait_for_completion: false
  lazy:
    enabled: false
    template: stop_on_empty
    servers: [lobby]
    empty_time: 5m
"#;

// -- model ----------------------------------------------------------

#[test]
fn parses_full_config_in_order() {
    let cfg = EngineConfig::from_yaml_str(FULL_CONFIG_YAML).unwrap();
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.settings.shutdown_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.settings.empty_server_check_interval(), Duration::from_secs(300));
    assert_eq!(cfg.servers.keys().collect::<Vec<_>>(), vec!["lobby", "survival"]);
    assert_eq!(cfg.rules.keys().collect::<Vec<_>>(), vec!["morning", "lazy"]);

    let morning = &cfg.rules["morning"];
    assert!(morning.enabled);
    assert!(!morning.is_template_rule());
    assert_eq!(morning.triggers.len(), 2);
    assert_eq!(morning.triggers[0].type_name, "cron");
    assert_eq!(morning.triggers[1].accessor().get_string("id").as_deref(), Some("launch"));

    let conditions = morning.conditions.as_ref().unwrap();
    assert!(conditions.is_any());
    assert_eq!(conditions.checks[0].type_name, "server_status");
    assert!(conditions.checks[0].accessor().get_bool("invert", false));

    assert_eq!(morning.actions.len(), 2);
    assert!(morning.actions[0].wait_for_completion);
    assert!(!morning.actions[1].wait_for_completion);
}

#[test]
fn template_rule_takes_remaining_keys() {
    let cfg = EngineConfig::from_yaml_str(FULL_CONFIG_YAML).unwrap();
    let lazy = &cfg.rules["lazy"];
    assert!(!lazy.enabled);
    let template = lazy.template.as_ref().unwrap();
    assert_eq!(template.type_name, "stop_on_empty");
    assert!(!template.params.contains_key("template"));
    assert!(!template.params.contains_key("enabled"));
    assert_eq!(template.accessor().get_string_list("servers"), vec!["lobby"]);
    assert!(lazy.triggers.is_empty() && lazy.actions.is_empty());
}

#[test]
fn actions_key_and_flat_form_are_accepted() {
    let yaml = r#"
rules:
  flat:
    triggers:
      - type: manual
        id: go
    actions:
      - type: log
        message: hi
        wait_for_completion: "no"
"#;
    let cfg = EngineConfig::from_yaml_str(yaml).unwrap();
    let rule = &cfg.rules["flat"];
    assert_eq!(rule.triggers[0].type_name, "manual");
    assert_eq!(rule.triggers[0].accessor().get_string("id").as_deref(), Some("go"));
    assert_eq!(rule.actions[0].type_name, "log");
    assert!(!rule.actions[0].wait_for_completion);
}

#[test]
fn malformed_entries_are_skipped() {
    let yaml = r#"
rules:
  messy:
    triggers:
      - "not a map"
      - proxy_start:
    action:
      - 42
      - log: {message: ok}
"#;
    let cfg = EngineConfig::from_yaml_str(yaml).unwrap();
    let rule = &cfg.rules["messy"];
    assert_eq!(rule.triggers.len(), 1);
    assert_eq!(rule.triggers[0].type_name, "proxy_start");
    assert!(rule.triggers[0].params.is_empty());
    assert_eq!(rule.actions.len(), 1);
}

#[test]
fn one_malformed_rule_or_server_leaves_the_rest() {
    let yaml = r#"
servers:
  lobby: {}
  broken: 5
  bare:
  odd:
    control_api: shell
rules:
  good:
    triggers:
      - manual: {id: go}
  bad: 5
  listed: [a, b]
  after:
    triggers:
      - proxy_start:
"#;
    let cfg = EngineConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(cfg.rules.keys().collect::<Vec<_>>(), vec!["good", "after"]);
    assert_eq!(cfg.servers.keys().collect::<Vec<_>>(), vec!["lobby", "bare"]);
}

#[test]
fn empty_sections_use_defaults() {
    let cfg = EngineConfig::from_yaml_str("servers:\nrules:\n").unwrap();
    assert!(cfg.servers.is_empty());
    assert!(cfg.rules.is_empty());
    assert_eq!(cfg.settings.shutdown_timeout(), Duration::from_secs(30));
    assert_eq!(EngineConfig::from_yaml_str("").unwrap().version, 1);
}

#[test]
fn invalid_yaml_is_an_error() {
    let err = EngineConfig::from_yaml_str("rules: [unclosed").unwrap_err();
    assert!(matches!(err, crate::error::RuleError::Parse(_)));
}

// -- loader ---------------------------------------------------------

#[test]
fn loader_reads_file_and_writes_starter() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.yml");
    let loader = ConfigLoader::new(path.clone());

    assert!(loader.ensure_exists().unwrap());
    assert!(!loader.ensure_exists().unwrap());
    let cfg = loader.load().unwrap();
    assert!(cfg.rules.is_empty());

    fs::write(&path, FULL_CONFIG_YAML).unwrap();
    assert_eq!(loader.load().unwrap().rules.len(), 2);
}

#[test]
fn missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let loader = ConfigLoader::new(dir.path().join("absent.yml"));
    assert!(matches!(loader.load(), Err(crate::error::RuleError::Io { .. })));
}

#[tokio::test(start_paused = true)]
async fn next_change_debounces_bursts() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(ConfigChange::Modified).unwrap();
    tx.send(ConfigChange::Modified).unwrap();
    tx.send(ConfigChange::Removed).unwrap();

    let change = next_change(&mut rx, DEBOUNCE_WINDOW).await;
    assert_eq!(change, Some(ConfigChange::Removed));

    drop(tx);
    assert_eq!(next_change(&mut rx, DEBOUNCE_WINDOW).await, None);
}
