//! Subscription ingestion queue.
//!
//! Callers enqueue `(type, condition, callback)` and return immediately.
//! A single [`IngestionWorker`] drains the queue one request per tick:
//!
//! 1. empty queue: heat decays, tick is idle
//! 2. request not yet due (bounded retry delay): back to the tail, idle tick
//! 3. callback (first processing only) is wrapped for dedup and registered
//! 4. under the table lock: a tracked type is a conflict and triggers repair;
//!    otherwise subscribe remotely and track the result
//! 5. a failure re-queues at the tail until the retry policy gives up
//!
//! The next tick is scheduled with [`Pacing`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use esub_remote::{CredentialProvider, SubscriptionService};
use esub_schemas::Condition;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dedup::DedupCache;
use crate::pacing::Pacing;
use crate::registry::CallbackRegistry;
use crate::repair::{RepairReason, RepairTrigger};
use crate::retry::RetryPolicy;
use crate::stats::ManagerStats;
use crate::table::SharedTable;
use crate::EventCallback;

// ---------------------------------------------------------------------------
// Pending requests
// ---------------------------------------------------------------------------

pub struct PendingRequest {
    pub kind: String,
    pub condition: Condition,
    /// Taken on first processing; retries never register it again.
    pub callback: Option<EventCallback>,
    /// Failed attempts so far.
    pub attempts: u32,
    pub not_before: Option<Instant>,
}

impl PendingRequest {
    pub fn new(kind: impl Into<String>, condition: Condition, callback: Option<EventCallback>) -> Self {
        Self {
            kind: kind.into(),
            condition,
            callback,
            attempts: 0,
            not_before: None,
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("kind", &self.kind)
            .field("condition", &self.condition)
            .field("has_callback", &self.callback.is_some())
            .field("attempts", &self.attempts)
            .field("not_before", &self.not_before)
            .finish()
    }
}

/// Cloneable FIFO shared by callers, the worker and the reconciler.
#[derive(Clone, Default)]
pub struct QueueHandle {
    pending: Arc<Mutex<VecDeque<PendingRequest>>>,
}

impl QueueHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, kind: impl Into<String>, condition: Condition, callback: Option<EventCallback>) {
        self.push_back(PendingRequest::new(kind, condition, callback));
    }

    pub fn push_back(&self, req: PendingRequest) {
        self.lock().push_back(req);
    }

    pub fn pop_front(&self) -> Option<PendingRequest> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queued types, head first.
    pub fn kinds(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.kind.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingRequest>> {
        match self.pending.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    NotDue { kind: String },
    Subscribed { kind: String, id: String },
    /// Type already tracked; a repair was requested instead.
    Conflict { kind: String },
    /// Failed and re-queued.
    Retrying { kind: String, attempts: u32 },
    /// Failed and dropped by the retry policy.
    Abandoned { kind: String, attempts: u32 },
}

pub struct IngestionWorker {
    queue: QueueHandle,
    pacing: Pacing,
    retry: RetryPolicy,
    table: SharedTable,
    registry: Arc<CallbackRegistry>,
    dedup: Arc<DedupCache>,
    remote: Arc<dyn SubscriptionService>,
    credentials: Arc<dyn CredentialProvider>,
    repair: Arc<dyn RepairTrigger>,
    stats: Arc<ManagerStats>,
}

impl IngestionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: QueueHandle,
        pacing: Pacing,
        retry: RetryPolicy,
        table: SharedTable,
        registry: Arc<CallbackRegistry>,
        dedup: Arc<DedupCache>,
        remote: Arc<dyn SubscriptionService>,
        credentials: Arc<dyn CredentialProvider>,
        repair: Arc<dyn RepairTrigger>,
        stats: Arc<ManagerStats>,
    ) -> Self {
        Self {
            queue,
            pacing,
            retry,
            table,
            registry,
            dedup,
            remote,
            credentials,
            repair,
            stats,
        }
    }

    pub fn heat(&self) -> u32 {
        self.pacing.heat()
    }

    /// Delay before the next tick at the current heat.
    pub fn next_interval(&self) -> Duration {
        self.pacing.interval()
    }

    /// Process at most one request.
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.step().await;
        self.stats.set_heat(self.pacing.heat());
        outcome
    }

    async fn step(&mut self) -> TickOutcome {
        let Some(mut req) = self.queue.pop_front() else {
            self.pacing.on_idle();
            return TickOutcome::Idle;
        };

        if let Some(due) = req.not_before {
            if due > Instant::now() {
                let kind = req.kind.clone();
                self.queue.push_back(req);
                self.pacing.on_idle();
                return TickOutcome::NotDue { kind };
            }
        }

        self.pacing.on_request();

        if let Some(cb) = req.callback.take() {
            let wrapped = self.dedup.wrap(cb);
            self.registry.register(&req.kind, wrapped);
        }

        let mut table = self.table.lock().await;
        if let Some(tracked) = table.get(&req.kind) {
            info!(
                kind = %req.kind,
                tracked_id = %tracked.id,
                "already have a subscription for type; requesting repair instead of subscribing"
            );
            drop(table);
            self.repair.request_repair(RepairReason::DuplicateRegistration {
                kind: req.kind.clone(),
            });
            return TickOutcome::Conflict { kind: req.kind };
        }

        let Some(token) = self.credentials.bearer_token() else {
            drop(table);
            self.credentials
                .request_refresh("no bearer credential available for subscription");
            return self.retry_later(req, "no bearer credential available");
        };

        match self
            .remote
            .subscribe(&token, &req.kind, &req.condition)
            .await
        {
            Ok(sub) => {
                info!(kind = %sub.kind, id = %sub.id, "subscription successful");
                let id = sub.id.clone();
                table.insert(sub);
                TickOutcome::Subscribed { kind: req.kind, id }
            }
            Err(e) => {
                drop(table);
                if e.is_unauthorized() {
                    self.credentials
                        .request_refresh("subscription service rejected the bearer credential");
                }
                let reason = e.to_string();
                self.retry_later(req, &reason)
            }
        }
    }

    fn retry_later(&mut self, mut req: PendingRequest, reason: &str) -> TickOutcome {
        self.stats.record_subscribe_failure();
        req.attempts = req.attempts.saturating_add(1);
        let attempts = req.attempts;

        if self.retry.exhausted(attempts) {
            error!(
                kind = %req.kind,
                attempts,
                error = %reason,
                "giving up on subscription after exhausting retries"
            );
            return TickOutcome::Abandoned {
                kind: req.kind,
                attempts,
            };
        }

        let delay = self.retry.delay_for(attempts);
        req.not_before = if delay.is_zero() {
            None
        } else {
            Some(Instant::now() + delay)
        };
        warn!(
            kind = %req.kind,
            attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %reason,
            "error subscribing; will try again"
        );
        let kind = req.kind.clone();
        self.queue.push_back(req);
        TickOutcome::Retrying { kind, attempts }
    }

    pub async fn run(mut self) {
        loop {
            let outcome = self.tick().await;
            if outcome != TickOutcome::Idle {
                debug!(?outcome, heat = self.pacing.heat(), "ingestion tick");
            }
            tokio::time::sleep(self.pacing.interval()).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
