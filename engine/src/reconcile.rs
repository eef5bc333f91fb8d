//! Open/cancelled/filled order set reconciliation.

use crate::types::{CancelEvent, FillEvent, OrderId, RawOrder};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// `all - (cancelled ∪ filled)`, keeping the order of `all`.
pub fn open_orders(all: &[RawOrder], cancelled: &[CancelEvent], filled: &[FillEvent]) -> Vec<RawOrder> {
    let closed: FxHashSet<OrderId> = cancelled
        .iter()
        .map(|c| c.id)
        .chain(filled.iter().map(|f| f.id))
        .collect();
    all.iter().filter(|o| !closed.contains(&o.id)).cloned().collect()
}

/// The three ledger-sourced order sets. Each is append-only and keyed by
/// order id; inserting an id that is already present is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Lists")]
pub struct OrderSets {
    all: Vec<RawOrder>,
    cancelled: Vec<CancelEvent>,
    filled: Vec<FillEvent>,
    #[serde(skip)]
    index: Index,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Index {
    all: FxHashSet<OrderId>,
    cancelled: FxHashSet<OrderId>,
    filled: FxHashSet<OrderId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Lists {
    all: Vec<RawOrder>,
    cancelled: Vec<CancelEvent>,
    filled: Vec<FillEvent>,
}

impl From<Lists> for OrderSets {
    fn from(lists: Lists) -> Self {
        let mut sets = OrderSets::default();
        for o in lists.all {
            sets.insert_order(o);
        }
        for c in lists.cancelled {
            sets.insert_cancel(c);
        }
        for f in lists.filled {
            sets.insert_fill(f);
        }
        sets
    }
}

impl OrderSets {
    pub fn all(&self) -> &[RawOrder] {
        &self.all
    }

    pub fn cancelled(&self) -> &[CancelEvent] {
        &self.cancelled
    }

    pub fn filled(&self) -> &[FillEvent] {
        &self.filled
    }

    pub fn insert_order(&mut self, order: RawOrder) -> bool {
        if !self.index.all.insert(order.id) {
            return false;
        }
        self.all.push(order);
        true
    }

    pub fn insert_cancel(&mut self, cancel: CancelEvent) -> bool {
        if !self.index.cancelled.insert(cancel.id) {
            return false;
        }
        self.cancelled.push(cancel);
        true
    }

    pub fn insert_fill(&mut self, fill: FillEvent) -> bool {
        if !self.index.filled.insert(fill.id) {
            return false;
        }
        self.filled.push(fill);
        true
    }

    pub fn open(&self) -> Vec<RawOrder> {
        open_orders(&self.all, &self.cancelled, &self.filled)
    }

    pub fn is_open(&self, id: OrderId) -> bool {
        self.index.all.contains(&id) && !self.index.cancelled.contains(&id) && !self.index.filled.contains(&id)
    }
}
