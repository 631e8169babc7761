//! esub-remote
//!
//! Boundary to the Remote Subscription Service and to the credential provider.
//!
//! This crate defines **only** the capability traits, their error type and an
//! in-memory [`paper::PaperSubscriptionService`]. The wire format of a real
//! service is not modelled here; a transport adapter implements
//! [`SubscriptionService`] and pushes [`esub_schemas::Notification`] values
//! into the manager.

pub mod paper;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use esub_schemas::{Condition, Subscription, SubscriptionList};
use tokio::sync::Notify;
use tracing::warn;

pub use paper::PaperSubscriptionService;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`SubscriptionService`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or transport failure.
    Transport(String),
    /// The credential was rejected (401-class). The caller asks the
    /// credential provider to refresh; it never refreshes by itself.
    Unauthorized(String),
    /// Any other application-level error (rate limit, 5xx, conflict, ...).
    Api { status: u16, message: String },
    /// A response payload could not be decoded.
    Decode(String),
}

impl RemoteError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Unauthorized(_))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Transport(msg) => write!(f, "transport error: {msg}"),
            RemoteError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            RemoteError::Api { status, message } => {
                write!(f, "remote api error status={status}: {message}")
            }
            RemoteError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Bearer credential handed to every remote call. `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<REDACTED>)")
    }
}

/// Source of the bearer credential. The refresh flow itself is external:
/// `request_refresh` only signals that it should run.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<BearerToken>;

    fn request_refresh(&self, reason: &str);
}

/// Credential cell shared with an external authorization flow.
///
/// The flow waits on [`SharedCredentials::refresh_wanted`], obtains a new
/// token and stores it with [`SharedCredentials::set_token`].
#[derive(Default)]
pub struct SharedCredentials {
    token: RwLock<Option<BearerToken>>,
    refresh_requests: AtomicU64,
    refresh_wanted: Notify,
}

impl SharedCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.map(BearerToken::new)),
            refresh_requests: AtomicU64::new(0),
            refresh_wanted: Notify::new(),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let mut guard = match self.token.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(BearerToken::new(token));
    }

    pub fn clear(&self) {
        let mut guard = match self.token.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }

    pub fn refresh_requests(&self) -> u64 {
        self.refresh_requests.load(Ordering::SeqCst)
    }

    pub fn refresh_wanted(&self) -> &Notify {
        &self.refresh_wanted
    }
}

impl CredentialProvider for SharedCredentials {
    fn bearer_token(&self) -> Option<BearerToken> {
        match self.token.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn request_refresh(&self, reason: &str) {
        self.refresh_requests.fetch_add(1, Ordering::SeqCst);
        warn!(reason, "credential refresh requested; re-authorization required");
        self.refresh_wanted.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Remote service trait
// ---------------------------------------------------------------------------

/// The Remote Subscription Service, as consumed by the core.
///
/// Implementations must be `Send + Sync` so a single instance can be shared
/// between the ingestion worker and the repair worker.
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Human-readable backend name (e.g. `"paper"`).
    fn name(&self) -> &'static str;

    async fn subscribe(
        &self,
        token: &BearerToken,
        kind: &str,
        condition: &Condition,
    ) -> Result<Subscription, RemoteError>;

    async fn unsubscribe(&self, token: &BearerToken, id: &str) -> Result<(), RemoteError>;

    async fn list_subscriptions(&self, token: &BearerToken)
        -> Result<SubscriptionList, RemoteError>;
}
