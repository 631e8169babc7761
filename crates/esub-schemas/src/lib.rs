//! esub-schemas
//!
//! Shared data model for the subscription lifecycle manager: remote
//! subscription records, the notifications the remote service pushes, and the
//! request shape accepted by the ingestion queue.
//!
//! Pure serde types. No IO, no async.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque key-value condition attached to a subscription
/// (e.g. `broadcaster_user_id -> "1234"`). Values are kept as raw JSON so a
/// record with an unexpected value shape still decodes.
pub type Condition = BTreeMap<String, serde_json::Value>;

/// Event payload as delivered by the remote service. Opaque to the core
/// except for the fields used to fingerprint it.
pub type EventPayload = serde_json::Value;

// ---------------------------------------------------------------------------
// SubscriptionStatus
// ---------------------------------------------------------------------------

/// Remote status of a subscription. Only `enabled` is meaningful to the
/// reconciliation engine; every other status is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Enabled,
    Other(String),
}

impl SubscriptionStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, SubscriptionStatus::Enabled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Enabled => "enabled",
            SubscriptionStatus::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for SubscriptionStatus {
    fn from(s: String) -> Self {
        if s == "enabled" {
            SubscriptionStatus::Enabled
        } else {
            SubscriptionStatus::Other(s)
        }
    }
}

impl From<&str> for SubscriptionStatus {
    fn from(s: &str) -> Self {
        SubscriptionStatus::from(s.to_string())
    }
}

impl From<SubscriptionStatus> for String {
    fn from(s: SubscriptionStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A subscription record as held by the remote service.
///
/// The same shape is used for locally tracked subscriptions: the local table
/// stores the record returned by `subscribe` (or adopted from a listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub condition: Condition,
    pub status: SubscriptionStatus,
    /// RFC 3339 creation time as reported by the remote service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        condition: Condition,
        status: SubscriptionStatus,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            condition,
            status,
            created_at: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    /// Short human form used in repair log lines: `type status created_at id`.
    pub fn describe(&self) -> String {
        format!(
            "{} {} {} {}",
            self.kind,
            self.status,
            self.created_at.as_deref().unwrap_or("-"),
            self.id
        )
    }
}

/// Envelope returned by the remote listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub data: Vec<Subscription>,
}

/// Type and condition of a subscription affected by a lost connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAndCondition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub condition: Condition,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Everything the remote service pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// An event delivered for one subscription.
    Event {
        subscription: Subscription,
        event: EventPayload,
    },
    /// The remote service revoked a single subscription.
    Revocation { subscription: Subscription },
    /// The transport dropped; carries the affected subscriptions keyed by id.
    ConnectionLost {
        subscriptions: BTreeMap<String, TypeAndCondition>,
    },
}

impl Notification {
    /// Affected types of a connection-lost signal, sorted and de-duplicated.
    pub fn lost_types(subscriptions: &BTreeMap<String, TypeAndCondition>) -> Vec<String> {
        let mut types: Vec<String> = subscriptions.values().map(|tc| tc.kind.clone()).collect();
        types.sort();
        types.dedup();
        types
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
