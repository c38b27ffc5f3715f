// src/residency/instantiator.rs
//! External collaborator: the instantiator.
//!
//! Turns a registered, activated asset into GPU-visible residency. The
//! manager calls `instantiate` synchronously from the task-group task that
//! `iterate` dispatched, after releasing its record lock — so it never
//! blocks registration or use-signalling, but it does occupy that task-group
//! slot until `instantiate` returns. The actual upload work happens on
//! whatever thread the `Instantiator` chooses from there, which later
//! reports back through `ResidencyManager::report_cost`.

use crate::residency::handle::SourceHandle;
use crate::residency::id::AssetId;
use crate::residency::manager::ResidencyManager;
use crate::residency::record::ImageClass;

/// Instantiates activated assets into resident GPU resources.
///
/// Implementations should not block for long inside `instantiate` — it runs
/// on the manager's single task-group task for this iteration, so any real
/// upload work should be deferred to another thread or queued on the GPU
/// and reported back later via `report_cost`. `estimate_cost` is the one
/// exception expected to be cheap and synchronous: the policy calls it
/// inline, under the record lock, to decide whether an activation fits the
/// budget before it commits to it.
pub trait Instantiator: Send + Sync {
    /// Widen any id-indexed side tables the implementation keeps to cover
    /// `count` ids. Called once per registration, with the record table's
    /// new length, and again for every existing id when an `Instantiator`
    /// is (re)bound via `bind_instantiator`.
    fn set_id_bounds(&self, count: u32);

    /// Informs the implementation of a registration's `ImageClass`. No-op
    /// by default — most implementations only need the class at
    /// `instantiate` time, which already carries it.
    #[allow(unused_variables)]
    fn set_image_class(&self, id: AssetId, class: ImageClass) {}

    /// Cheap synchronous cost guess, used by the policy for admission
    /// control before an activation is committed. May read headers but must
    /// not perform the actual upload.
    fn estimate_cost(&self, id: AssetId, source: &SourceHandle) -> u64;

    /// Begin instantiating `id`. `manager` is a cheap-to-clone handle the
    /// implementation may move into a background task and later use to
    /// call `report_cost(id, bytes)` once the upload completes.
    fn instantiate(
        &self,
        id: AssetId,
        source: SourceHandle,
        class: ImageClass,
        manager: ResidencyManager,
    );

    /// Release a previously instantiated asset's GPU resources. Called from
    /// `iterate` when the policy selects `id` for eviction, or from
    /// `shutdown`. Like `instantiate`, must not block.
    fn release(&self, id: AssetId, manager: ResidencyManager);

    /// Publish any work that has completed since the last call — the point
    /// at which a background upload's handle becomes visible to the rest of
    /// the engine. Called exactly once per `iterate`, even when the step
    /// itself is skipped for backpressure.
    fn latch_handles(&self);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Arc;

    /// Records every call it receives and immediately reports a fixed cost,
    /// synchronously, from within `instantiate` itself. Good enough for
    /// tests that don't need to exercise the `Loading` window.
    #[derive(Debug, Default)]
    pub struct ImmediateInstantiator {
        pub cost_per_asset: u64,
        pub instantiated: Arc<Mutex<Vec<AssetId>>>,
        pub released: Arc<Mutex<Vec<AssetId>>>,
        pub latch_calls: AtomicU64,
        pub id_bounds: AtomicU32,
    }

    impl ImmediateInstantiator {
        pub fn new(cost_per_asset: u64) -> Self {
            ImmediateInstantiator {
                cost_per_asset,
                instantiated: Arc::new(Mutex::new(Vec::new())),
                released: Arc::new(Mutex::new(Vec::new())),
                latch_calls: AtomicU64::new(0),
                id_bounds: AtomicU32::new(0),
            }
        }
    }

    impl Instantiator for ImmediateInstantiator {
        fn set_id_bounds(&self, count: u32) {
            self.id_bounds.store(count, Ordering::Relaxed);
        }

        fn estimate_cost(&self, _id: AssetId, _source: &SourceHandle) -> u64 {
            self.cost_per_asset
        }

        fn instantiate(
            &self,
            id: AssetId,
            _source: SourceHandle,
            _class: ImageClass,
            manager: ResidencyManager,
        ) {
            self.instantiated.lock().push(id);
            manager.report_cost(id, self.cost_per_asset);
        }

        fn release(&self, id: AssetId, _manager: ResidencyManager) {
            self.released.lock().push(id);
        }

        fn latch_handles(&self) {
            self.latch_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Instantiator whose estimate (and eventual reported cost) is fixed per
    /// test via a table keyed by id, for scenarios that need distinct asset
    /// sizes rather than one uniform cost.
    #[derive(Debug, Default)]
    pub struct TableInstantiator {
        pub estimates: Mutex<std::collections::HashMap<AssetId, u64>>,
        pub instantiated: Arc<Mutex<Vec<AssetId>>>,
        pub released: Arc<Mutex<Vec<AssetId>>>,
    }

    impl TableInstantiator {
        pub fn with(costs: impl IntoIterator<Item = (AssetId, u64)>) -> Self {
            TableInstantiator {
                estimates: Mutex::new(costs.into_iter().collect()),
                instantiated: Arc::new(Mutex::new(Vec::new())),
                released: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Instantiator for TableInstantiator {
        fn set_id_bounds(&self, _count: u32) {}

        fn estimate_cost(&self, id: AssetId, _source: &SourceHandle) -> u64 {
            *self.estimates.lock().get(&id).unwrap_or(&0)
        }

        fn instantiate(
            &self,
            id: AssetId,
            _source: SourceHandle,
            _class: ImageClass,
            manager: ResidencyManager,
        ) {
            self.instantiated.lock().push(id);
            let cost = *self.estimates.lock().get(&id).unwrap_or(&0);
            manager.report_cost(id, cost);
        }

        fn release(&self, id: AssetId, _manager: ResidencyManager) {
            self.released.lock().push(id);
        }

        fn latch_handles(&self) {}
    }

    /// Records calls but never reports a cost, letting tests hold an asset
    /// in `Loading` deliberately.
    #[derive(Debug, Default)]
    pub struct StallingInstantiator {
        pub instantiated: Arc<Mutex<Vec<AssetId>>>,
        pub released: Arc<Mutex<Vec<AssetId>>>,
    }

    impl Instantiator for StallingInstantiator {
        fn set_id_bounds(&self, _count: u32) {}

        fn estimate_cost(&self, _id: AssetId, _source: &SourceHandle) -> u64 {
            0
        }

        fn instantiate(
            &self,
            id: AssetId,
            _source: SourceHandle,
            _class: ImageClass,
            _manager: ResidencyManager,
        ) {
            self.instantiated.lock().push(id);
        }

        fn release(&self, id: AssetId, _manager: ResidencyManager) {
            self.released.lock().push(id);
        }

        fn latch_handles(&self) {}
    }
}
