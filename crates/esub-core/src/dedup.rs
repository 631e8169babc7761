//! At-most-once delivery per callback within a time window.
//!
//! Each wrapped callback gets its own scope, so two callbacks registered for
//! the same type never suppress each other. A repeat seen inside the window
//! is dropped, refreshes the window and asks for a repair pass, since the
//! usual cause is a duplicate remote subscription.
//!
//! Fingerprint precedence:
//! 1. bypass types: no fingerprint, always delivered
//! 2. `message_id` field of the event
//! 3. configured unique field for the type
//! 4. compact JSON serialization of the whole event

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use esub_config::DedupSettings;
use esub_schemas::{EventPayload, Subscription};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::repair::{RepairReason, RepairTrigger};
use crate::EventCallback;

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FingerprintPolicy {
    bypass_types: BTreeSet<String>,
    unique_fields: BTreeMap<String, String>,
}

impl FingerprintPolicy {
    pub fn new(bypass_types: BTreeSet<String>, unique_fields: BTreeMap<String, String>) -> Self {
        Self {
            bypass_types,
            unique_fields,
        }
    }

    pub fn from_settings(s: &DedupSettings) -> Self {
        Self::new(
            s.bypass_types.iter().cloned().collect(),
            s.unique_fields.clone(),
        )
    }

    /// `None` means the event is exempt from deduplication.
    pub fn fingerprint(&self, event: &EventPayload, subscription: &Subscription) -> Option<String> {
        if self.bypass_types.contains(&subscription.kind) {
            return None;
        }
        if let Some(id) = field_text(event, "message_id") {
            return Some(id);
        }
        if let Some(field) = self.unique_fields.get(&subscription.kind) {
            if let Some(v) = field_text(event, field) {
                return Some(v);
            }
        }
        Some(event.to_string())
    }
}

fn field_text(event: &EventPayload, field: &str) -> Option<String> {
    match event.get(field)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    First,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    scope: u64,
    fingerprint: String,
}

pub struct DedupCache {
    window: Duration,
    policy: FingerprintPolicy,
    entries: Mutex<HashMap<DedupKey, Instant>>,
    next_scope: AtomicU64,
    repair: Arc<dyn RepairTrigger>,
}

impl DedupCache {
    pub fn new(window: Duration, policy: FingerprintPolicy, repair: Arc<dyn RepairTrigger>) -> Self {
        Self {
            window,
            policy,
            entries: Mutex::new(HashMap::new()),
            next_scope: AtomicU64::new(1),
            repair,
        }
    }

    pub fn from_settings(s: &DedupSettings, repair: Arc<dyn RepairTrigger>) -> Self {
        Self::new(
            Duration::from_millis(s.window_ms),
            FingerprintPolicy::from_settings(s),
            repair,
        )
    }

    /// Wrap `callback` with its own dedup scope.
    pub fn wrap(self: &Arc<Self>, callback: EventCallback) -> EventCallback {
        let scope = self.next_scope.fetch_add(1, Ordering::Relaxed);
        let cache = Arc::clone(self);
        Arc::new(move |event: &EventPayload, sub: &Subscription| {
            cache.deliver(scope, &callback, event, sub)
        })
    }

    fn deliver(
        &self,
        scope: u64,
        callback: &EventCallback,
        event: &EventPayload,
        sub: &Subscription,
    ) {
        let Some(fingerprint) = self.policy.fingerprint(event, sub) else {
            callback(event, sub);
            return;
        };
        match self.observe(scope, &fingerprint) {
            Delivery::First => callback(event, sub),
            Delivery::Duplicate => {
                info!(kind = %sub.kind, id = %sub.id, fingerprint = %fingerprint, "deduping event");
                warn!(kind = %sub.kind, "duplicate delivery detected; requesting subscription repair");
                self.repair.request_repair(RepairReason::DuplicateDelivery {
                    kind: sub.kind.clone(),
                    fingerprint,
                });
            }
        }
    }

    /// Record `fingerprint` for `scope`. A hit refreshes the expiry.
    pub fn observe(&self, scope: u64, fingerprint: &str) -> Delivery {
        let now = Instant::now();
        let expires = now + self.window;
        let mut entries = self.lock();
        entries.retain(|_, exp| *exp > now);

        let key = DedupKey {
            scope,
            fingerprint: fingerprint.to_string(),
        };
        match entries.get_mut(&key) {
            Some(exp) => {
                *exp = expires;
                Delivery::Duplicate
            }
            None => {
                entries.insert(key, expires);
                Delivery::First
            }
        }
    }

    /// Entries still inside their window.
    pub fn live_entries(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, exp| *exp > now);
        entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DedupKey, Instant>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
