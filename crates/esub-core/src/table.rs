//! Local table of tracked subscriptions.
//!
//! # Invariant
//! At most one entry per type. The remote service may hold several records of
//! one type (drift); this table never does.
//!
//! The table is shared as [`SharedTable`]. Writers hold the mutex for a whole
//! transaction (queue registration step, or a full repair pass), so
//! overlapping writers cannot lose each other's updates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use esub_schemas::Subscription;
use tokio::sync::Mutex;

pub type SharedTable = Arc<Mutex<SubscriptionTable>>;

pub fn shared_table() -> SharedTable {
    Arc::new(Mutex::new(SubscriptionTable::default()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionTable {
    by_type: BTreeMap<String, Subscription>,
}

impl SubscriptionTable {
    pub fn get(&self, kind: &str) -> Option<&Subscription> {
        self.by_type.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.by_type.contains_key(kind)
    }

    /// Track `sub` under its own type, replacing any previous entry.
    pub fn insert(&mut self, sub: Subscription) -> Option<Subscription> {
        self.by_type.insert(sub.kind.clone(), sub)
    }

    pub fn remove(&mut self, kind: &str) -> Option<Subscription> {
        self.by_type.remove(kind)
    }

    pub fn types(&self) -> BTreeSet<String> {
        self.by_type.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Tracked records ordered by type.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.by_type.values().cloned().collect()
    }
}
