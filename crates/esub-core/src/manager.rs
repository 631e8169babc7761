//! Subscription manager: wiring and notification routing.
//!
//! [`SubscriptionManager::connect`] builds the remote client through a
//! fallible factory. On failure the manager comes up degraded: it logs,
//! asks the credential flow for a refresh once, and accepts (and discards)
//! every later registration so callers never have to branch.

use std::sync::Arc;
use std::time::Duration;

use esub_config::ManagerSettings;
use esub_remote::{CredentialProvider, SubscriptionService};
use esub_schemas::{Condition, Notification, Subscription};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dedup::DedupCache;
use crate::pacing::Pacing;
use crate::queue::{IngestionWorker, QueueHandle};
use crate::reconcile::{ReconciliationEngine, RepairReport};
use crate::registry::CallbackRegistry;
use crate::repair::{repair_channel, RepairHandle, RepairReason, RepairTrigger, RepairWorker};
use crate::retry::RetryPolicy;
use crate::stats::ManagerStats;
use crate::table::{shared_table, SharedTable};
use crate::EventCallback;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    pub backend: Option<String>,
    pub tracked: Vec<Subscription>,
    pub pending: usize,
    pub heat: u32,
    pub dedup_entries: usize,
    pub subscribe_failures: u64,
    pub repairs_requested: u64,
    pub repair_passes: u64,
    pub last_repair: Option<RepairReport>,
}

// ---------------------------------------------------------------------------
// Active manager
// ---------------------------------------------------------------------------

/// Workers created by [`ActiveManager::assemble`], not yet running.
pub struct Workers {
    pub ingestion: IngestionWorker,
    pub repair: RepairWorker,
}

impl Workers {
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        vec![self.ingestion.spawn(), self.repair.spawn()]
    }
}

pub struct ActiveManager {
    queue: QueueHandle,
    table: SharedTable,
    registry: Arc<CallbackRegistry>,
    dedup: Arc<DedupCache>,
    repair: RepairHandle,
    remote: Arc<dyn SubscriptionService>,
    stats: Arc<ManagerStats>,
    last_report: Arc<Mutex<Option<RepairReport>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ActiveManager {
    /// Build the manager and its workers without starting anything.
    pub fn assemble(
        settings: &ManagerSettings,
        remote: Arc<dyn SubscriptionService>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> (Self, Workers) {
        let stats = Arc::new(ManagerStats::default());
        let (repair, repair_rx) = repair_channel(stats.clone());
        let repair_trigger: Arc<dyn RepairTrigger> = Arc::new(repair.clone());

        let queue = QueueHandle::new();
        let table = shared_table();
        let registry = Arc::new(CallbackRegistry::new());
        let dedup = Arc::new(DedupCache::from_settings(
            &settings.dedup,
            repair_trigger.clone(),
        ));

        let mut engine =
            ReconciliationEngine::new(table.clone(), remote.clone(), credentials.clone());
        if settings.reconcile.requeue_on_recreate_failure {
            engine = engine.with_requeue(queue.clone());
        }
        let last_report = Arc::new(Mutex::new(None));
        let repair_worker = RepairWorker::new(
            repair_rx,
            Arc::new(engine),
            stats.clone(),
            last_report.clone(),
        );

        let ingestion = IngestionWorker::new(
            queue.clone(),
            Pacing::new(Duration::from_millis(settings.queue.base_interval_ms)),
            RetryPolicy::from_settings(&settings.retry),
            table.clone(),
            registry.clone(),
            dedup.clone(),
            remote.clone(),
            credentials,
            repair_trigger,
            stats.clone(),
        );

        let manager = Self {
            queue,
            table,
            registry,
            dedup,
            repair,
            remote,
            stats,
            last_report,
            tasks: std::sync::Mutex::new(Vec::new()),
        };
        (
            manager,
            Workers {
                ingestion,
                repair: repair_worker,
            },
        )
    }

    pub fn queue_subscription(
        &self,
        kind: impl Into<String>,
        condition: Condition,
        callback: Option<EventCallback>,
    ) {
        let kind = kind.into();
        debug!(kind = %kind, "queueing subscription");
        self.queue.enqueue(kind, condition, callback);
    }

    pub fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::Event {
                subscription,
                event,
            } => {
                let delivered = self.registry.dispatch(&event, &subscription);
                if delivered == 0 {
                    debug!(kind = %subscription.kind, "no callbacks registered for event type");
                }
            }
            Notification::Revocation { subscription } => {
                error!(
                    kind = %subscription.kind,
                    id = %subscription.id,
                    status = %subscription.status,
                    "subscription has been revoked"
                );
                self.repair.request_repair(RepairReason::Revocation {
                    id: subscription.id,
                    kind: subscription.kind,
                });
            }
            Notification::ConnectionLost { subscriptions } => {
                let types = Notification::lost_types(&subscriptions);
                info!(
                    types = %types.join(", "),
                    "connection lost for subscription types; repairing"
                );
                self.repair
                    .request_repair(RepairReason::ConnectionLost { types });
            }
        }
    }

    pub fn request_repair(&self, reason: RepairReason) {
        self.repair.request_repair(reason);
    }

    pub fn spawn_notification_pump(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Notification>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(n) = rx.recv().await {
                this.handle_notification(n);
            }
            warn!("notification stream closed");
        })
    }

    pub fn adopt_tasks(&self, handles: Vec<JoinHandle<()>>) {
        self.lock_tasks().extend(handles);
    }

    pub fn shutdown(&self) {
        for h in self.lock_tasks().drain(..) {
            h.abort();
        }
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    pub async fn status(&self) -> ManagerStatus {
        ManagerStatus {
            degraded: false,
            degraded_reason: None,
            backend: Some(self.remote.name().to_string()),
            tracked: self.table.lock().await.snapshot(),
            pending: self.queue.len(),
            heat: self.stats.heat(),
            dedup_entries: self.dedup.live_entries(),
            subscribe_failures: self.stats.subscribe_failures(),
            repairs_requested: self.stats.repairs_requested(),
            repair_passes: self.stats.repair_passes(),
            last_repair: self.last_report.lock().await.clone(),
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

pub enum SubscriptionManager {
    Active(Arc<ActiveManager>),
    /// Remote client failed to initialize; registrations are discarded.
    Degraded { reason: String },
}

impl SubscriptionManager {
    /// Build the remote client and start the workers. Must run inside a
    /// tokio runtime.
    pub fn connect<F>(
        settings: &ManagerSettings,
        credentials: Arc<dyn CredentialProvider>,
        build_remote: F,
    ) -> Self
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn SubscriptionService>>,
    {
        match build_remote() {
            Ok(remote) => {
                info!(backend = remote.name(), "subscription manager starting");
                let (manager, workers) = ActiveManager::assemble(settings, remote, credentials);
                manager.adopt_tasks(workers.spawn());
                SubscriptionManager::Active(Arc::new(manager))
            }
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(
                    error = %reason,
                    "subscription service failed to initialize; the app must be re-authorized and restarted"
                );
                credentials.request_refresh("subscription service failed to initialize");
                SubscriptionManager::Degraded { reason }
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SubscriptionManager::Degraded { .. })
    }

    pub fn active(&self) -> Option<&Arc<ActiveManager>> {
        match self {
            SubscriptionManager::Active(m) => Some(m),
            SubscriptionManager::Degraded { .. } => None,
        }
    }

    /// Never blocks and never fails. A degraded manager drops the request.
    pub fn queue_subscription(
        &self,
        kind: impl Into<String>,
        condition: Condition,
        callback: Option<EventCallback>,
    ) {
        match self {
            SubscriptionManager::Active(m) => m.queue_subscription(kind, condition, callback),
            SubscriptionManager::Degraded { .. } => {
                let kind: String = kind.into();
                debug!(kind = %kind, "subscription manager degraded; ignoring registration");
            }
        }
    }

    pub fn handle_notification(&self, notification: Notification) {
        match self {
            SubscriptionManager::Active(m) => m.handle_notification(notification),
            SubscriptionManager::Degraded { .. } => {
                debug!("subscription manager degraded; ignoring notification");
            }
        }
    }

    /// Returns `false` when there is nothing to repair (degraded).
    pub fn request_repair(&self, reason: RepairReason) -> bool {
        match self {
            SubscriptionManager::Active(m) => {
                m.request_repair(reason);
                true
            }
            SubscriptionManager::Degraded { .. } => false,
        }
    }

    pub fn spawn_notification_pump(
        &self,
        rx: mpsc::UnboundedReceiver<Notification>,
    ) -> Option<JoinHandle<()>> {
        self.active().map(|m| m.spawn_notification_pump(rx))
    }

    pub async fn status(&self) -> ManagerStatus {
        match self {
            SubscriptionManager::Active(m) => m.status().await,
            SubscriptionManager::Degraded { reason } => ManagerStatus {
                degraded: true,
                degraded_reason: Some(reason.clone()),
                backend: None,
                tracked: Vec::new(),
                pending: 0,
                heat: 0,
                dedup_entries: 0,
                subscribe_failures: 0,
                repairs_requested: 0,
                repair_passes: 0,
                last_repair: None,
            },
        }
    }

    pub fn shutdown(&self) {
        if let SubscriptionManager::Active(m) = self {
            m.shutdown();
        }
    }
}
