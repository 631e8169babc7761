//! Shared runtime state for esub-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The subscription
//! manager owns its own workers; this module only wires configured
//! subscriptions and background helpers around it.

use std::sync::Arc;

use esub_config::SubscriptionRequestConfig;
use esub_core::{callback, mirror_callback, EventCallback, FanoutSink, SubscriptionManager};
use esub_remote::SharedCredentials;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub manager: Arc<SubscriptionManager>,
    /// Overlay websocket observers.
    pub fanout: Arc<FanoutSink>,
    /// Hash of the loaded config layers, when booted from config.
    pub config_hash: Option<String>,
}

impl AppState {
    pub fn new(manager: Arc<SubscriptionManager>, fanout: Arc<FanoutSink>) -> Self {
        Self {
            build: BuildInfo {
                service: "esub-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            manager,
            fanout,
            config_hash: None,
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Queue every configured subscription. Mirrored types broadcast to the
/// overlay; the rest only log.
pub fn register_configured(
    manager: &SubscriptionManager,
    fanout: &Arc<FanoutSink>,
    subscriptions: &[SubscriptionRequestConfig],
) {
    for sub in subscriptions {
        let cb: EventCallback = match sub.mirror {
            Some(action) => mirror_callback(fanout.clone(), action),
            None => callback(|event, sub| {
                info!(kind = %sub.kind, id = %sub.id, event = %event, "event received");
            }),
        };
        manager.queue_subscription(sub.kind.clone(), sub.condition.clone(), Some(cb));
    }
    info!(count = subscriptions.len(), "configured subscriptions queued");
}

/// Spawn a background task that surfaces credential refresh requests.
///
/// The authorization flow itself lives outside this process; the task only
/// makes each request visible in the logs.
pub fn spawn_refresh_watcher(credentials: Arc<SharedCredentials>) {
    tokio::spawn(async move {
        loop {
            credentials.refresh_wanted().notified().await;
            warn!(
                requests = credentials.refresh_requests(),
                "credential refresh requested; re-run the authorization flow and restart or set a new token"
            );
        }
    });
}
