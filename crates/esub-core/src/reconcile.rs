//! Drift repair between the local table and the remote listing.
//!
//! A pass holds the table lock from the listing until the last per-type
//! decision, then for every type in `tracked ∪ remote`:
//!
//! - keep the tracked record if it is still enabled remotely
//! - otherwise adopt another enabled record of the type (orphan adoption)
//! - otherwise recreate from the best known condition
//! - unsubscribe every other record of the type (duplicates and stale ones)
//!
//! Remote failures on one type are logged and recorded in the report; they
//! never stop the pass. A pass over converged state makes no mutations.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use esub_remote::{BearerToken, CredentialProvider, RemoteError, SubscriptionService};
use esub_schemas::{Condition, Subscription};
use serde::Serialize;
use tracing::{info, warn};

use crate::queue::QueueHandle;
use crate::table::{SharedTable, SubscriptionTable};

/// What one pass did. Ids are remote subscription ids; `recreated` lists the
/// ids assigned to new records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub types_examined: Vec<String>,
    pub removed_duplicates: Vec<String>,
    pub removed_stale: Vec<String>,
    pub adopted: Vec<String>,
    pub recreated: Vec<String>,
    /// Types handed back to the ingestion queue after a failed recreate.
    pub requeued: Vec<String>,
    pub failures: Vec<String>,
}

impl RepairReport {
    pub fn mutation_count(&self) -> usize {
        self.removed_duplicates.len()
            + self.removed_stale.len()
            + self.adopted.len()
            + self.recreated.len()
    }

    /// Nothing changed and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.mutation_count() == 0 && self.failures.is_empty()
    }
}

pub struct ReconciliationEngine {
    table: SharedTable,
    remote: Arc<dyn SubscriptionService>,
    credentials: Arc<dyn CredentialProvider>,
    requeue: Option<QueueHandle>,
}

impl ReconciliationEngine {
    pub fn new(
        table: SharedTable,
        remote: Arc<dyn SubscriptionService>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            table,
            remote,
            credentials,
            requeue: None,
        }
    }

    /// Hand failed recreates back to `queue` for the ingestion worker.
    pub fn with_requeue(mut self, queue: QueueHandle) -> Self {
        self.requeue = Some(queue);
        self
    }

    /// One full repair pass. Fails only when no pass could start (no
    /// credential, or the remote listing failed).
    pub async fn run_pass(&self) -> Result<RepairReport> {
        let token = self.credentials.bearer_token().ok_or_else(|| {
            self.credentials
                .request_refresh("no bearer credential available for repair");
            anyhow!("no bearer credential available")
        })?;

        let mut table = self.table.lock().await;

        let remote_subs = match self.remote.list_subscriptions(&token).await {
            Ok(list) => list.data,
            Err(e) => {
                self.note_remote_error(&e);
                return Err(e).with_context(|| {
                    format!("listing subscriptions on {}", self.remote.name())
                });
            }
        };

        let mut types: BTreeSet<String> = table.types();
        types.extend(remote_subs.iter().map(|s| s.kind.clone()));

        let mut report = RepairReport {
            types_examined: types.iter().cloned().collect(),
            ..RepairReport::default()
        };
        info!(
            types = %report.types_examined.join(", "),
            remote_records = remote_subs.len(),
            "repairing subscriptions"
        );

        for kind in &types {
            self.repair_type(&token, &mut table, kind, &remote_subs, &mut report)
                .await;
        }

        info!(
            mutations = report.mutation_count(),
            failures = report.failures.len(),
            "subscription repair finished"
        );
        Ok(report)
    }

    async fn repair_type(
        &self,
        token: &BearerToken,
        table: &mut SubscriptionTable,
        kind: &str,
        remote_subs: &[Subscription],
        report: &mut RepairReport,
    ) {
        let all: Vec<&Subscription> = remote_subs.iter().filter(|s| s.kind == kind).collect();

        let tracked = table.get(kind).cloned();
        let existing: Option<&Subscription> = tracked
            .as_ref()
            .and_then(|t| all.iter().copied().find(|s| s.id == t.id));
        let existing_id = existing.map(|s| s.id.as_str());
        let candidate: Option<&Subscription> = all
            .iter()
            .copied()
            .find(|s| s.is_enabled() && Some(s.id.as_str()) != existing_id);
        let candidate_id = candidate.map(|s| s.id.as_str());

        let fallback: Option<Condition> = existing
            .map(|s| s.condition.clone())
            .or_else(|| candidate.map(|s| s.condition.clone()))
            .or_else(|| {
                all.iter()
                    .find(|s| !s.condition.is_empty())
                    .map(|s| s.condition.clone())
            })
            .or_else(|| tracked.as_ref().map(|s| s.condition.clone()));

        for other in all.iter().filter(|s| {
            Some(s.id.as_str()) != existing_id && Some(s.id.as_str()) != candidate_id
        }) {
            info!(
                kind,
                record = %other.describe(),
                "removing duplicate subscription"
            );
            self.unsubscribe(token, other, report, Removal::Duplicate).await;
        }

        if let Some(existing) = existing.filter(|s| s.is_enabled()) {
            if let Some(candidate) = candidate {
                info!(
                    kind,
                    keep = %existing.id,
                    record = %candidate.describe(),
                    "removing duplicate subscription"
                );
                self.unsubscribe(token, candidate, report, Removal::Duplicate)
                    .await;
            }
            return;
        }

        if table.remove(kind).is_some() {
            info!(kind, "dropping stale local subscription entry");
        }
        if let Some(stale) = existing {
            info!(kind, record = %stale.describe(), "removing stale subscription");
            self.unsubscribe(token, stale, report, Removal::Stale).await;
        }

        if let Some(candidate) = candidate {
            info!(kind, id = %candidate.id, "adopting orphan subscription");
            table.insert(candidate.clone());
            report.adopted.push(candidate.id.clone());
            return;
        }

        let Some(condition) = fallback else {
            warn!(kind, "no known condition for type; cannot recreate subscription");
            report
                .failures
                .push(format!("{kind}: no known condition to recreate"));
            return;
        };

        info!(kind, "recreating subscription");
        match self.remote.subscribe(token, kind, &condition).await {
            Ok(sub) => {
                info!(kind, id = %sub.id, "subscription recreated");
                report.recreated.push(sub.id.clone());
                table.insert(sub);
            }
            Err(e) => {
                self.note_remote_error(&e);
                warn!(kind, error = %e, "failed to recreate subscription");
                report.failures.push(format!("{kind}: recreate failed: {e}"));
                if let Some(queue) = &self.requeue {
                    queue.enqueue(kind, condition, None);
                    report.requeued.push(kind.to_string());
                }
            }
        }
    }

    async fn unsubscribe(
        &self,
        token: &BearerToken,
        sub: &Subscription,
        report: &mut RepairReport,
        removal: Removal,
    ) {
        match self.remote.unsubscribe(token, &sub.id).await {
            Ok(()) => match removal {
                Removal::Duplicate => report.removed_duplicates.push(sub.id.clone()),
                Removal::Stale => report.removed_stale.push(sub.id.clone()),
            },
            Err(e) => {
                self.note_remote_error(&e);
                warn!(kind = %sub.kind, id = %sub.id, error = %e, "failed to remove subscription");
                report
                    .failures
                    .push(format!("{}: unsubscribe {} failed: {e}", sub.kind, sub.id));
            }
        }
    }

    fn note_remote_error(&self, e: &RemoteError) {
        if e.is_unauthorized() {
            self.credentials
                .request_refresh("subscription service rejected the bearer credential");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Removal {
    Duplicate,
    Stale,
}
