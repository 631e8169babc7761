//! esub-config
//!
//! Layered YAML configuration for the subscription manager.
//!
//! - YAML layers are merged in order (earlier = base, later = override).
//! - Literal secrets in config are refused (`CONFIG_SECRET_DETECTED`), naming
//!   the layer that carried them; config stores env var NAMES only, resolved
//!   once at startup by [`secrets`].
//! - The merged document is rendered to canonical JSON and hashed (SHA-256)
//!   so a running daemon can log exactly which configuration it booted with.
//! - [`settings`] maps the merged JSON onto typed, defaulted settings.

pub mod secrets;
pub mod settings;

use std::fs;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use settings::{
    CredentialEnvNames, DaemonSettings, DedupSettings, ManagerSettings, MirrorAction,
    QueueSettings, ReconcileSettings, RetrySettings, SubscriptionRequestConfig,
};

/// A leaf string starting with one of these is treated as a pasted secret.
const SECRET_PREFIXES: &[&str] = &[
    "oauth:", // chat IRC password form of an access token
    "Bearer ",
    "sk-",
    "sk_live",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "xoxb-",
];

/// Shorter strings are never flagged (ids, small numbers).
const SECRET_MIN_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Loaded config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed view of the merged document.
    pub fn settings(&self) -> Result<ManagerSettings> {
        ManagerSettings::from_config_json(&self.config_json)
    }
}

/// One parsed layer and where it came from.
struct Layer {
    origin: String,
    doc: Value,
}

impl Layer {
    fn parse(origin: String, raw: &str) -> Result<Self> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(raw)
            .with_context(|| format!("invalid yaml in config layer {origin}"))?;
        let doc = serde_json::to_value(yaml)
            .with_context(|| format!("config layer {origin} is not representable as json"))?;
        Ok(Self { origin, doc })
    }
}

/// Load and merge YAML files in order.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let layers = paths
        .iter()
        .map(|p| {
            let raw =
                fs::read_to_string(p).with_context(|| format!("failed to read config layer {p}"))?;
            Layer::parse(p.to_string(), &raw)
        })
        .collect::<Result<Vec<_>>>()?;
    merge_layers(layers)
}

/// Same as [`load_layered_yaml`] for in-memory documents (`inline#N`).
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let layers = yaml_docs
        .iter()
        .enumerate()
        .map(|(i, raw)| Layer::parse(format!("inline#{i}"), raw))
        .collect::<Result<Vec<_>>>()?;
    merge_layers(layers)
}

fn merge_layers(layers: Vec<Layer>) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        // An empty layer parses to null; it must not wipe the base.
        if layer.doc.is_null() {
            continue;
        }
        if let Some(ptr) = find_secret(&layer.doc, &mut String::new()) {
            bail!(
                "CONFIG_SECRET_DETECTED layer={} leaf={} value=REDACTED",
                layer.origin,
                ptr
            );
        }
        overlay(&mut merged, layer.doc);
    }

    let canonical_json = serde_json::to_string(&canonical(&merged))
        .context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

// ---------------------------------------------------------------------------
// Merge / canonical form
// ---------------------------------------------------------------------------

/// Objects merge key by key; anything else in `top` replaces `base`.
fn overlay(base: &mut Value, top: Value) {
    match (base, top) {
        (Value::Object(base_map), Value::Object(top_map)) => {
            for (k, v) in top_map {
                match base_map.get_mut(&k) {
                    Some(slot) => overlay(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}

/// Recursively key-sorted copy, independent of the map backing in use.
fn canonical(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Secret scan
// ---------------------------------------------------------------------------

/// JSON pointer of the first secret-looking leaf, if any. `path` is scratch.
fn find_secret(v: &Value, path: &mut String) -> Option<String> {
    match v {
        Value::String(s) if looks_like_secret(s) => Some(if path.is_empty() {
            "/".to_string()
        } else {
            path.clone()
        }),
        Value::Object(map) => map.iter().find_map(|(k, child)| {
            descend(path, &k.replace('~', "~0").replace('/', "~1"), child)
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, child)| descend(path, &i.to_string(), child)),
        _ => None,
    }
}

fn descend(path: &mut String, token: &str, child: &Value) -> Option<String> {
    let len = path.len();
    path.push('/');
    path.push_str(token);
    let found = find_secret(child, path);
    path.truncate(len);
    found
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= SECRET_MIN_LEN && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_layer_overrides_nested_keys_only() {
        let base = "queue:\n  base_interval_ms: 100\ndedup:\n  window_ms: 5000\n";
        let over = "queue:\n  base_interval_ms: 250\n";
        let loaded = load_layered_yaml_from_strings(&[base, over]).unwrap();
        assert_eq!(loaded.config_json["queue"]["base_interval_ms"], 250);
        assert_eq!(loaded.config_json["dedup"]["window_ms"], 5000);
    }

    #[test]
    fn lists_are_replaced_not_appended() {
        let base = "dedup:\n  bypass_types: [a, b]\n";
        let over = "dedup:\n  bypass_types: [c]\n";
        let loaded = load_layered_yaml_from_strings(&[base, over]).unwrap();
        assert_eq!(loaded.config_json["dedup"]["bypass_types"], json!(["c"]));
    }

    #[test]
    fn empty_layer_is_ignored() {
        let base = "queue:\n  base_interval_ms: 100\n";
        let loaded = load_layered_yaml_from_strings(&[base, ""]).unwrap();
        assert_eq!(loaded.config_json["queue"]["base_interval_ms"], 100);
    }

    #[test]
    fn secret_pointer_escapes_tokens_and_names_layer() {
        let clean = "queue:\n  base_interval_ms: 100\n";
        let dirty = "dedup:\n  unique_fields:\n    \"a/b\": \"oauth:0123456789\"\n";
        let err = load_layered_yaml_from_strings(&[clean, dirty]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("layer=inline#1"), "got: {msg}");
        assert!(msg.contains("leaf=/dedup/unique_fields/a~1b"), "got: {msg}");
    }

    #[test]
    fn short_strings_are_never_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("oauth:abcdefgh123"));
    }
}
