//! Scenario: layered config loading, hashing and secret handling.
//!
//! # Coverage
//! 1. Same inputs hash identically; key order does not matter.
//! 2. A literal token in config fails with CONFIG_SECRET_DETECTED.
//! 3. Layers loaded from files merge in path order and map onto settings.
//! 4. Missing credentials name the env var, never a value.
//! 5. `Debug` of `ResolvedSecrets` is redacted.
//!
//! Failure tests use sentinel env var names that are never set anywhere, so
//! no test mutates the process environment.

use std::io::Write;

use esub_config::{
    load_layered_yaml, load_layered_yaml_from_strings, resolve_secrets, CredentialEnvNames,
    MirrorAction, ResolvedSecrets,
};

const BASE_YAML: &str = r#"
queue:
  base_interval_ms: 100
dedup:
  window_ms: 5000
credentials:
  client_id_env: "CLIENT_ID"
  client_secret_env: "CLIENT_SECRET"
"#;

const BASE_YAML_REORDERED: &str = r#"
credentials:
  client_secret_env: "CLIENT_SECRET"
  client_id_env: "CLIENT_ID"
dedup:
  window_ms: 5000
queue:
  base_interval_ms: 100
"#;

#[test]
fn config_hash_is_stable_and_order_independent() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let c = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();

    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.config_hash, c.config_hash, "key order must not change the hash");
    assert_eq!(a.config_hash.len(), 64);

    let changed = load_layered_yaml_from_strings(&[BASE_YAML, "queue:\n  base_interval_ms: 101\n"])
        .unwrap();
    assert_ne!(a.config_hash, changed.config_hash);
}

#[test]
fn literal_access_token_is_refused() {
    let yaml = r#"
credentials:
  access_token_env: "oauth:abcdef0123456789"
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_SECRET_DETECTED"), "got: {msg}");
    assert!(msg.contains("/credentials/access_token_env"), "got: {msg}");
    assert!(!msg.contains("abcdef0123456789"), "value must be redacted: {msg}");
}

#[test]
fn file_layers_merge_in_path_order() {
    let mut base = tempfile::NamedTempFile::new().unwrap();
    write!(
        base,
        r#"
queue:
  base_interval_ms: 100
subscriptions:
  - type: "channel.moderate"
    condition:
      broadcaster_user_id: "77"
      moderator_user_id: "77"
    mirror: "Mod_Action"
"#
    )
    .unwrap();

    let mut local = tempfile::NamedTempFile::new().unwrap();
    write!(
        local,
        r#"
queue:
  base_interval_ms: 40
reconcile:
  requeue_on_recreate_failure: true
"#
    )
    .unwrap();

    let base_path = base.path().to_str().unwrap().to_string();
    let local_path = local.path().to_str().unwrap().to_string();
    let loaded = load_layered_yaml(&[&base_path, &local_path]).unwrap();
    let settings = loaded.settings().unwrap();

    assert_eq!(settings.queue.base_interval_ms, 40);
    assert!(settings.reconcile.requeue_on_recreate_failure);
    assert_eq!(settings.subscriptions.len(), 1);
    assert_eq!(settings.subscriptions[0].kind, "channel.moderate");
    assert_eq!(
        settings.subscriptions[0].condition["moderator_user_id"],
        "77"
    );
    assert_eq!(settings.subscriptions[0].mirror, Some(MirrorAction::ModAction));
}

#[test]
fn missing_file_reports_the_path() {
    let err = load_layered_yaml(&["/nonexistent/esub/base.yaml"]).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/esub/base.yaml"));
}

#[test]
fn missing_client_id_names_the_variable() {
    let names = CredentialEnvNames {
        client_id_env: "ESUB_SENTINEL_CLIENT_ID_NEVER_SET_1".to_string(),
        client_secret_env: "ESUB_SENTINEL_CLIENT_SECRET_NEVER_SET_1".to_string(),
        access_token_env: "ESUB_SENTINEL_TOKEN_NEVER_SET_1".to_string(),
    };
    let msg = resolve_secrets(&names).unwrap_err().to_string();
    assert!(msg.contains("SECRETS_MISSING"), "got: {msg}");
    assert!(msg.contains("ESUB_SENTINEL_CLIENT_ID_NEVER_SET_1"), "got: {msg}");
}

#[test]
fn resolved_secrets_debug_is_redacted() {
    let secrets = ResolvedSecrets {
        client_id: "client-id-value".to_string(),
        client_secret: "client-secret-value".to_string(),
        access_token: Some("token-value".to_string()),
    };
    let dbg = format!("{secrets:?}");
    assert!(dbg.contains("<REDACTED>"));
    assert!(!dbg.contains("client-id-value"));
    assert!(!dbg.contains("client-secret-value"));
    assert!(!dbg.contains("token-value"));
}
