//! esub-core
//!
//! Subscription lifecycle manager:
//!
//! - [`queue`]: fire-and-forget ingestion queue drained by one worker with
//!   heat-based pacing ([`pacing`]) and a configurable retry policy
//!   ([`retry`]).
//! - [`dedup`]: per-callback at-most-once delivery within a time window;
//!   repeats become repair signals.
//! - [`reconcile`]: drift repair between the local table ([`table`]) and
//!   the remote listing, driven through a repair command channel
//!   ([`repair`]).
//! - [`manager`]: wiring, notification routing and the degraded stub.
//! - [`fanout`]: best-effort broadcast to overlay observers.

pub mod dedup;
pub mod fanout;
pub mod manager;
pub mod pacing;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod repair;
pub mod retry;
pub mod stats;
pub mod table;

use std::sync::Arc;

use esub_schemas::{EventPayload, Subscription};

pub use dedup::{DedupCache, Delivery, FingerprintPolicy};
pub use fanout::{mirror_callback, FanoutSink, ObserverId, WidgetMessage};
pub use manager::{ActiveManager, ManagerStatus, SubscriptionManager, Workers};
pub use pacing::Pacing;
pub use queue::{IngestionWorker, PendingRequest, QueueHandle, TickOutcome};
pub use reconcile::{ReconciliationEngine, RepairReport};
pub use registry::CallbackRegistry;
pub use repair::{repair_channel, RepairHandle, RepairReason, RepairTrigger, RepairWorker};
pub use retry::RetryPolicy;
pub use stats::ManagerStats;
pub use table::{shared_table, SharedTable, SubscriptionTable};

/// Handler invoked with `(event, subscription)` for a delivered event.
pub type EventCallback = Arc<dyn Fn(&EventPayload, &Subscription) + Send + Sync>;

/// Box a closure as an [`EventCallback`].
pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&EventPayload, &Subscription) + Send + Sync + 'static,
{
    Arc::new(f)
}
