//! Deterministic in-memory subscription service.
//!
//! Holds subscription records the way the remote service does, including the
//! drift the real service can accumulate (several enabled records of one
//! type). Every call is recorded so tests can count network round-trips, and
//! failures can be injected per call kind.
//!
//! Event delivery follows the remote behaviour that makes drift visible: an
//! event for a type is pushed once per enabled subscription of that type.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use esub_schemas::{
    Condition, EventPayload, Notification, Subscription, SubscriptionList, SubscriptionStatus,
    TypeAndCondition,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{BearerToken, RemoteError, SubscriptionService};

/// One recorded call against the paper service.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PaperCall {
    Subscribe { kind: String },
    Unsubscribe { id: String },
    List,
}

#[derive(Default)]
struct PaperState {
    subscriptions: Vec<Subscription>,
    next_id: u64,
    calls: Vec<PaperCall>,
    fail_subscribes: u32,
    unauthorized_subscribes: u32,
    fail_lists: u32,
    fail_unsubscribe_ids: BTreeSet<String>,
    required_token: Option<String>,
    notify: Option<mpsc::UnboundedSender<Notification>>,
}

#[derive(Default)]
pub struct PaperSubscriptionService {
    state: Mutex<PaperState>,
}

impl PaperSubscriptionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -- seeding / failure injection ------------------------------------------

    /// Insert a record as if it already existed remotely.
    pub fn seed(&self, sub: Subscription) {
        self.lock().subscriptions.push(sub);
    }

    /// Fail the next `n` subscribe calls with a 503.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.lock().fail_subscribes = n;
    }

    /// Reject the next `n` subscribe calls as unauthorized.
    pub fn reject_next_subscribes_unauthorized(&self, n: u32) {
        self.lock().unauthorized_subscribes = n;
    }

    pub fn fail_next_lists(&self, n: u32) {
        self.lock().fail_lists = n;
    }

    /// Every unsubscribe of `id` fails until [`Self::heal_unsubscribe`].
    pub fn fail_unsubscribe_of(&self, id: impl Into<String>) {
        self.lock().fail_unsubscribe_ids.insert(id.into());
    }

    pub fn heal_unsubscribe(&self, id: &str) {
        self.lock().fail_unsubscribe_ids.remove(id);
    }

    /// Only accept calls carrying this bearer token.
    pub fn require_token(&self, token: impl Into<String>) {
        self.lock().required_token = Some(token.into());
    }

    // -- notifications ----------------------------------------------------------

    /// Open the notification stream. A later call replaces the earlier sink.
    pub fn notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().notify = Some(tx);
        rx
    }

    /// Push `event` once per enabled subscription of `kind`. Returns the
    /// number of deliveries made.
    pub fn deliver_event(&self, kind: &str, event: EventPayload) -> usize {
        let st = self.lock();
        let Some(tx) = st.notify.as_ref() else {
            return 0;
        };
        let mut delivered = 0;
        for sub in st
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind && s.is_enabled())
        {
            let n = Notification::Event {
                subscription: sub.clone(),
                event: event.clone(),
            };
            if tx.send(n).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Mark `id` revoked and push a revocation notification.
    pub fn revoke(&self, id: &str) -> bool {
        let mut st = self.lock();
        let Some(sub) = st.subscriptions.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        sub.status = SubscriptionStatus::from("authorization_revoked");
        let revoked = sub.clone();
        if let Some(tx) = st.notify.as_ref() {
            let _ = tx.send(Notification::Revocation {
                subscription: revoked,
            });
        }
        true
    }

    /// Simulate a dropped transport: every enabled record becomes
    /// `websocket_disconnected` and one connection-lost signal carries them.
    pub fn drop_connection(&self) -> usize {
        let mut st = self.lock();
        let mut lost: BTreeMap<String, TypeAndCondition> = BTreeMap::new();
        for sub in st.subscriptions.iter_mut().filter(|s| s.is_enabled()) {
            sub.status = SubscriptionStatus::from("websocket_disconnected");
            lost.insert(
                sub.id.clone(),
                TypeAndCondition {
                    kind: sub.kind.clone(),
                    condition: sub.condition.clone(),
                },
            );
        }
        let count = lost.len();
        if let Some(tx) = st.notify.as_ref() {
            let _ = tx.send(Notification::ConnectionLost {
                subscriptions: lost,
            });
        }
        count
    }

    // -- inspection ---------------------------------------------------------------

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock().subscriptions.clone()
    }

    pub fn enabled_of(&self, kind: &str) -> Vec<Subscription> {
        self.lock()
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind && s.is_enabled())
            .cloned()
            .collect()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.count(|c| matches!(c, PaperCall::Subscribe { .. }))
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.count(|c| matches!(c, PaperCall::Unsubscribe { .. }))
    }

    pub fn list_calls(&self) -> usize {
        self.count(|c| matches!(c, PaperCall::List))
    }

    /// Subscribe + unsubscribe calls.
    pub fn mutation_calls(&self) -> usize {
        self.subscribe_calls() + self.unsubscribe_calls()
    }

    pub fn unsubscribed_ids(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                PaperCall::Unsubscribe { id } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    fn count(&self, pred: impl Fn(&PaperCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn check_token(st: &PaperState, token: &BearerToken) -> Result<(), RemoteError> {
        match st.required_token.as_deref() {
            Some(required) if required != token.as_str() => Err(RemoteError::Unauthorized(
                "invalid bearer token".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SubscriptionService for PaperSubscriptionService {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn subscribe(
        &self,
        token: &BearerToken,
        kind: &str,
        condition: &Condition,
    ) -> Result<Subscription, RemoteError> {
        let mut st = self.lock();
        st.calls.push(PaperCall::Subscribe {
            kind: kind.to_string(),
        });
        Self::check_token(&st, token)?;

        if st.unauthorized_subscribes > 0 {
            st.unauthorized_subscribes -= 1;
            return Err(RemoteError::Unauthorized("token expired".to_string()));
        }
        if st.fail_subscribes > 0 {
            st.fail_subscribes -= 1;
            return Err(RemoteError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }

        st.next_id += 1;
        let mut sub = Subscription::new(
            format!("PAPER-{:06}", st.next_id),
            kind,
            condition.clone(),
            SubscriptionStatus::Enabled,
        );
        sub.created_at = Some(chrono::Utc::now().to_rfc3339());
        st.subscriptions.push(sub.clone());
        debug!(id = %sub.id, kind, "paper subscribe");
        Ok(sub)
    }

    async fn unsubscribe(&self, token: &BearerToken, id: &str) -> Result<(), RemoteError> {
        let mut st = self.lock();
        st.calls.push(PaperCall::Unsubscribe { id: id.to_string() });
        Self::check_token(&st, token)?;

        if st.fail_unsubscribe_ids.contains(id) {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }
        let before = st.subscriptions.len();
        st.subscriptions.retain(|s| s.id != id);
        if st.subscriptions.len() == before {
            return Err(RemoteError::Api {
                status: 404,
                message: format!("subscription {id} not found"),
            });
        }
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        token: &BearerToken,
    ) -> Result<SubscriptionList, RemoteError> {
        let mut st = self.lock();
        st.calls.push(PaperCall::List);
        Self::check_token(&st, token)?;

        if st.fail_lists > 0 {
            st.fail_lists -= 1;
            return Err(RemoteError::Transport("timed out".to_string()));
        }
        Ok(SubscriptionList {
            data: st.subscriptions.clone(),
        })
    }
}
