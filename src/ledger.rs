//! Concurrent order ledger bound to one round or period
//!
//! Orders are keyed by a composite id (`"{uid}-{bet_index}"` for crash).
//! Insertion is insert-if-absent so two racing placements of the same id
//! produce exactly one entry.

use crate::errors::ConflictError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct Slot<O> {
    seq: u64,
    order: O,
}

/// Thread-safe store of the orders placed into one round
pub struct OrderLedger<O> {
    orders: DashMap<String, Slot<O>>,
    next_seq: AtomicU64,
}

impl<O: Clone> OrderLedger<O> {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Insert unless the id is already present
    pub fn insert(&self, id: String, order: O) -> Result<(), ConflictError> {
        match self.orders.entry(id) {
            Entry::Occupied(entry) => Err(ConflictError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                entry.insert(Slot { seq, order });
                Ok(())
            }
        }
    }

    /// Insert or overwrite, used when reattaching persisted orders
    pub fn upsert(&self, id: String, order: O) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.orders.insert(id, Slot { seq, order });
    }

    pub fn get(&self, id: &str) -> Option<O> {
        self.orders.get(id).map(|slot| slot.order.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.orders.contains_key(id)
    }

    /// Replace an existing order, returning the previous value
    pub fn replace(&self, id: &str, order: O) -> Option<O> {
        self.orders
            .get_mut(id)
            .map(|mut slot| std::mem::replace(&mut slot.order, order))
    }

    pub fn remove(&self, id: &str) -> Option<O> {
        self.orders.remove(id).map(|(_, slot)| slot.order)
    }

    /// Remove only while the stored order still satisfies `predicate`
    pub fn remove_if<P: Fn(&O) -> bool>(&self, id: &str, predicate: P) -> Option<O> {
        self.orders
            .remove_if(id, |_, slot| predicate(&slot.order))
            .map(|(_, slot)| slot.order)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// All orders in placement order
    pub fn snapshot(&self) -> Vec<O> {
        let mut slots: Vec<(u64, O)> = self
            .orders
            .iter()
            .map(|slot| (slot.seq, slot.order.clone()))
            .collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, order)| order).collect()
    }

    /// Orders matching a predicate, in placement order
    pub fn filter<P: Fn(&O) -> bool>(&self, predicate: P) -> Vec<O> {
        self.snapshot().into_iter().filter(|o| predicate(o)).collect()
    }
}

impl<O: Clone> Default for OrderLedger<O> {
    fn default() -> Self {
        Self::new()
    }
}
