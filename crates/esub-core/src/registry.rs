//! Callbacks registered per subscription type.
//!
//! Registration is cumulative: each request carrying a callback appends to
//! the list for its type, in insertion order. Nothing is ever replaced.

use std::collections::BTreeMap;
use std::sync::RwLock;

use esub_schemas::{EventPayload, Subscription};

use crate::EventCallback;

#[derive(Default)]
pub struct CallbackRegistry {
    by_type: RwLock<BTreeMap<String, Vec<EventCallback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: &str, cb: EventCallback) {
        let mut map = match self.by_type.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(kind.to_string()).or_default().push(cb);
    }

    pub fn count(&self, kind: &str) -> usize {
        let map = match self.by_type.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(kind).map(Vec::len).unwrap_or(0)
    }

    /// Invoke every callback registered for the subscription's type. The
    /// lock is released before any callback runs. Returns the number invoked.
    pub fn dispatch(&self, event: &EventPayload, subscription: &Subscription) -> usize {
        let callbacks: Vec<EventCallback> = {
            let map = match self.by_type.read() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.get(&subscription.kind).cloned().unwrap_or_default()
        };
        for cb in &callbacks {
            cb(event, subscription);
        }
        callbacks.len()
    }
}
