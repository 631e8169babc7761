use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Counters published by the workers for status reporting.
#[derive(Debug, Default)]
pub struct ManagerStats {
    heat: AtomicU32,
    subscribe_failures: AtomicU64,
    repairs_requested: AtomicU64,
    repair_passes: AtomicU64,
}

impl ManagerStats {
    pub fn heat(&self) -> u32 {
        self.heat.load(Ordering::Relaxed)
    }

    pub fn set_heat(&self, heat: u32) {
        self.heat.store(heat, Ordering::Relaxed);
    }

    pub fn subscribe_failures(&self) -> u64 {
        self.subscribe_failures.load(Ordering::Relaxed)
    }

    pub fn record_subscribe_failure(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn repairs_requested(&self) -> u64 {
        self.repairs_requested.load(Ordering::Relaxed)
    }

    pub fn record_repair_request(&self) {
        self.repairs_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn repair_passes(&self) -> u64 {
        self.repair_passes.load(Ordering::Relaxed)
    }

    pub fn record_repair_pass(&self) {
        self.repair_passes.fetch_add(1, Ordering::Relaxed);
    }
}
