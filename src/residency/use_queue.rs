// src/residency/use_queue.rs
//! The lock-free use-signal queue.
//!
//! `mark_used` must be callable from any thread, including an
//! `Instantiator` completion callback running while the manager's record
//! lock is held elsewhere — so it cannot take that lock itself. A
//! `SegQueue` gives wait-free producers; `iterate` is the sole consumer and
//! drains it under the record lock before running the policy.

use crate::residency::id::AssetId;
use crossbeam::queue::SegQueue;

#[derive(Debug, Default)]
pub(crate) struct UseQueue {
    queue: SegQueue<AssetId>,
}

impl UseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free push; callable from any thread.
    pub fn push(&self, id: AssetId) {
        self.queue.push(id);
    }

    /// Drains every pending use-signal, calling `f` once per id. Intended to
    /// be called only by `iterate`, which already holds the record lock.
    pub fn drain(&self, mut f: impl FnMut(AssetId)) {
        while let Some(id) = self.queue.pop() {
            f(id);
        }
    }
}
