//! Typed settings for the subscription manager and daemon.
//!
//! Every section is optional in YAML; absent keys take the defaults below,
//! which reproduce the behaviour of the manager before it was configurable
//! (100 ms base tick, 5 s dedup window, retry forever, no re-queue on a
//! failed recreate).

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use esub_schemas::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique-field lookup used when an event carries no `message_id`.
pub const DEFAULT_UNIQUE_FIELDS: &[(&str, &str)] =
    &[("channel.channel_points_custom_reward_redemption.add", "id")];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    pub queue: QueueSettings,
    pub dedup: DedupSettings,
    pub retry: RetrySettings,
    pub reconcile: ReconcileSettings,
    pub daemon: DaemonSettings,
    pub credentials: CredentialEnvNames,
    /// Subscriptions the daemon queues at boot.
    pub subscriptions: Vec<SubscriptionRequestConfig>,
}

impl ManagerSettings {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let settings: ManagerSettings = serde_json::from_value(config_json.clone())
            .context("CONFIG_INVALID: settings do not match the expected shape")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.base_interval_ms == 0 {
            bail!("CONFIG_INVALID: /queue/base_interval_ms must be > 0");
        }
        if self.dedup.window_ms == 0 {
            bail!("CONFIG_INVALID: /dedup/window_ms must be > 0");
        }
        if self.retry.max_attempts == Some(0) {
            bail!("CONFIG_INVALID: /retry/max_attempts must be >= 1 (omit it to retry forever)");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            bail!(
                "CONFIG_INVALID: /retry/max_delay_ms ({}) is below /retry/base_delay_ms ({})",
                self.retry.max_delay_ms,
                self.retry.base_delay_ms
            );
        }
        for (i, sub) in self.subscriptions.iter().enumerate() {
            if sub.kind.trim().is_empty() {
                bail!("CONFIG_INVALID: /subscriptions/{i}/type is empty");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Tick interval at zero heat.
    pub base_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub window_ms: u64,
    /// Types whose events are never deduplicated.
    pub bypass_types: Vec<String>,
    /// `type -> field` used as the fingerprint when `message_id` is absent.
    pub unique_fields: BTreeMap<String, String>,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            bypass_types: Vec::new(),
            unique_fields: DEFAULT_UNIQUE_FIELDS
                .iter()
                .map(|(t, f)| (t.to_string(), f.to_string()))
                .collect(),
        }
    }
}

/// Registration retry policy. `max_attempts: None` retries forever.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Put a failed recreate back on the ingestion queue instead of waiting
    /// for the next repair trigger.
    pub requeue_on_recreate_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub addr: String,
    /// Browser origins allowed to call the HTTP routes (overlay pages).
    pub cors_origins: Vec<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            cors_origins: ["http://localhost", "http://127.0.0.1"]
                .iter()
                .map(|o| o.to_string())
                .collect(),
        }
    }
}

/// Env var NAMES holding the app credentials. Values never live in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialEnvNames {
    pub client_id_env: String,
    pub client_secret_env: String,
    pub access_token_env: String,
}

impl Default for CredentialEnvNames {
    fn default() -> Self {
        Self {
            client_id_env: "CLIENT_ID".to_string(),
            client_secret_env: "CLIENT_SECRET".to_string(),
            access_token_env: "ESUB_ACCESS_TOKEN".to_string(),
        }
    }
}

/// Overlay action an event type is mirrored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorAction {
    #[serde(rename = "Message")]
    Message,
    #[serde(rename = "Message_Delete")]
    MessageDelete,
    #[serde(rename = "Mod_Action")]
    ModAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequestConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub mirror: Option<MirrorAction>,
}
