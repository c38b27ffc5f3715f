// src/residency/cost_queue.rs
//! The cost-update inbox.
//!
//! `report_cost` can be called from an `Instantiator`'s completion callback,
//! which may run while the manager's `record_lock` is held by the thread
//! that dispatched the instantiation in the first place. Routing cost
//! updates through their own `cost_lock`-guarded inbox instead of the
//! record lock avoids that deadlock; `iterate` drains the inbox under
//! `cost_lock` first, then applies the updates under `record_lock`.

use crate::residency::id::AssetId;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct CostQueue {
    inbox: Mutex<VecDeque<(AssetId, u64)>>,
}

impl CostQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a reported cost. Never blocks on `record_lock`.
    pub fn push(&self, id: AssetId, bytes: u64) {
        self.inbox.lock().push_back((id, bytes));
    }

    /// Drains the inbox into `out`, leaving it empty. Held only for the
    /// duration of the drain.
    pub fn drain_into(&self, out: &mut Vec<(AssetId, u64)>) {
        let mut inbox = self.inbox.lock();
        out.extend(inbox.drain(..));
    }
}
