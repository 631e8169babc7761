//! Repair trigger channel.
//!
//! Every component that notices drift (dedup, queue conflict, revocation,
//! connection loss, operator) sends a [`RepairReason`] through a
//! [`RepairHandle`]. One [`RepairWorker`] owns the receiving end and runs
//! reconciliation passes strictly one at a time. Triggers that arrive while a
//! pass is running are coalesced into a single follow-up pass.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::reconcile::{ReconciliationEngine, RepairReport};
use crate::stats::ManagerStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairReason {
    ConnectionLost { types: Vec<String> },
    Revocation { id: String, kind: String },
    /// A registration found its type already tracked.
    DuplicateRegistration { kind: String },
    /// The same event reached one callback twice inside the dedup window.
    DuplicateDelivery { kind: String, fingerprint: String },
    Manual,
}

impl fmt::Display for RepairReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairReason::ConnectionLost { types } => {
                write!(f, "connection lost for [{}]", types.join(", "))
            }
            RepairReason::Revocation { id, kind } => write!(f, "revocation of {kind} {id}"),
            RepairReason::DuplicateRegistration { kind } => {
                write!(f, "duplicate registration of {kind}")
            }
            RepairReason::DuplicateDelivery { kind, .. } => {
                write!(f, "duplicate delivery of {kind}")
            }
            RepairReason::Manual => write!(f, "manual"),
        }
    }
}

/// Anything that can ask for a repair pass. Never blocks.
pub trait RepairTrigger: Send + Sync {
    fn request_repair(&self, reason: RepairReason);
}

#[derive(Clone)]
pub struct RepairHandle {
    tx: mpsc::UnboundedSender<RepairReason>,
    stats: Arc<ManagerStats>,
}

impl RepairTrigger for RepairHandle {
    fn request_repair(&self, reason: RepairReason) {
        self.stats.record_repair_request();
        if let Err(e) = self.tx.send(reason) {
            warn!(reason = %e.0, "repair worker is gone; dropping repair request");
        }
    }
}

/// Create a repair handle and the receiver a [`RepairWorker`] consumes.
pub fn repair_channel(
    stats: Arc<ManagerStats>,
) -> (RepairHandle, mpsc::UnboundedReceiver<RepairReason>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RepairHandle { tx, stats }, rx)
}

pub struct RepairWorker {
    rx: mpsc::UnboundedReceiver<RepairReason>,
    engine: Arc<ReconciliationEngine>,
    stats: Arc<ManagerStats>,
    last_report: Arc<Mutex<Option<RepairReport>>>,
}

impl RepairWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<RepairReason>,
        engine: Arc<ReconciliationEngine>,
        stats: Arc<ManagerStats>,
        last_report: Arc<Mutex<Option<RepairReport>>>,
    ) -> Self {
        Self {
            rx,
            engine,
            stats,
            last_report,
        }
    }

    /// Wait for triggers until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            let mut reasons = vec![first];
            self.drain_into(&mut reasons);
            self.pass(&reasons).await;
        }
        info!("repair worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run one pass covering every trigger queued right now, if any.
    pub async fn run_pending(&mut self) -> Option<RepairReport> {
        let mut reasons = Vec::new();
        self.drain_into(&mut reasons);
        if reasons.is_empty() {
            return None;
        }
        self.pass(&reasons).await
    }

    fn drain_into(&mut self, reasons: &mut Vec<RepairReason>) {
        while let Ok(r) = self.rx.try_recv() {
            reasons.push(r);
        }
    }

    async fn pass(&self, reasons: &[RepairReason]) -> Option<RepairReport> {
        let summary: Vec<String> = reasons.iter().map(ToString::to_string).collect();
        info!(
            triggers = reasons.len(),
            reasons = %summary.join("; "),
            "starting subscription repair"
        );
        self.stats.record_repair_pass();
        match self.engine.run_pass().await {
            Ok(report) => {
                *self.last_report.lock().await = Some(report.clone());
                Some(report)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "subscription repair failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_counts_requests_and_delivers_reasons() {
        let stats = Arc::new(ManagerStats::default());
        let (handle, mut rx) = repair_channel(stats.clone());
        handle.request_repair(RepairReason::Manual);
        handle.request_repair(RepairReason::DuplicateRegistration {
            kind: "stream.online".to_string(),
        });
        assert_eq!(stats.repairs_requested(), 2);
        assert_eq!(rx.try_recv().unwrap(), RepairReason::Manual);
        assert!(matches!(
            rx.try_recv().unwrap(),
            RepairReason::DuplicateRegistration { .. }
        ));
    }

    #[test]
    fn send_after_worker_gone_does_not_panic() {
        let stats = Arc::new(ManagerStats::default());
        let (handle, rx) = repair_channel(stats);
        drop(rx);
        handle.request_repair(RepairReason::Manual);
    }

    #[test]
    fn reasons_render_for_logs() {
        let r = RepairReason::ConnectionLost {
            types: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(r.to_string(), "connection lost for [a, b]");
    }
}
