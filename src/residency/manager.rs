// src/residency/manager.rs
//! The Coordinator: the crate's public entry point.
//!
//! `ResidencyManager` is a cheap-to-clone `Arc` handle, the same shape as
//! the teacher's `AssetManager::clone_manager`, so it can be captured by a
//! task-group closure or an `Instantiator` callback and used from any
//! thread without lifetime trouble.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use xxhash_rust::xxh3::xxh3_64;

use crate::residency::config::ResidencyConfig;
use crate::residency::cost_queue::CostQueue;
use crate::residency::fence::FenceSignal;
use crate::residency::handle::{FileSystem, SourceHandle};
use crate::residency::id::AssetId;
use crate::residency::instantiator::Instantiator;
use crate::residency::policy;
use crate::residency::record::{AssetRecord, ImageClass, Priority, ResidencyState};
use crate::residency::stats::{format_bytes, ResidencyStats};
use crate::residency::task_group::TaskGroup;
use crate::residency::use_queue::UseQueue;

/// Everything guarded by the single exclusive record lock: the record
/// table, the path-dedup index, the live config, and the per-iteration
/// counters that feed `stats()`.
struct RecordTable {
    records: Vec<AssetRecord>,
    path_index: HashMap<u64, AssetId>,
    config: ResidencyConfig,
    use_clock: u64,
    last_iteration_activated: u64,
    last_iteration_released: u64,
    backpressure_skips: u64,
}

impl RecordTable {
    fn new(config: ResidencyConfig) -> Self {
        RecordTable {
            records: Vec::new(),
            path_index: HashMap::new(),
            config,
            use_clock: 0,
            last_iteration_activated: 0,
            last_iteration_released: 0,
            backpressure_skips: 0,
        }
    }

    fn get(&self, id: AssetId) -> Option<&AssetRecord> {
        if id.is_none() {
            return None;
        }
        self.records.get(id.index())
    }

    fn get_mut(&mut self, id: AssetId) -> Option<&mut AssetRecord> {
        if id.is_none() {
            return None;
        }
        self.records.get_mut(id.index())
    }

    fn total_consumed(&self) -> u64 {
        self.records
            .iter()
            .map(|r| match r.state {
                ResidencyState::Resident => r.consumed,
                ResidencyState::Loading => r.pending_consumed,
                ResidencyState::Absent => 0,
            })
            .sum()
    }

    fn any_loading(&self) -> bool {
        self.records.iter().any(|r| r.state == ResidencyState::Loading)
    }
}

struct Inner {
    table: Mutex<RecordTable>,
    cost_queue: CostQueue,
    use_queue: UseQueue,
    instantiator: Mutex<Option<Arc<dyn Instantiator>>>,
    task_group: Arc<dyn TaskGroup>,
    fence: Arc<dyn FenceSignal>,
    issued_timestamp: AtomicU64,
    /// Count of blocking single-asset instantiations (`iterate_blocking`)
    /// dispatched since the last `iterate`. `iterate` folds this into its
    /// own timestamp advance (§4.4 step 1 / §4.5) and resets it to zero, so
    /// the logical timestamp accounts for every background task dispatched,
    /// not just the ones `iterate` itself issued.
    deferred_timestamp: AtomicU64,
}

/// Public handle to the Asset Residency Manager. Clones share the same
/// underlying state — cloning is an `Arc` bump, matching the teacher's
/// `AssetManager::clone_manager`.
#[derive(Clone)]
pub struct ResidencyManager {
    inner: Arc<Inner>,
}

impl ResidencyManager {
    /// Builds a new manager bound to the given task group and fence signal
    /// — the two external collaborators that must exist before any asset
    /// can be registered.
    pub fn new(config: ResidencyConfig, task_group: Arc<dyn TaskGroup>, fence: Arc<dyn FenceSignal>) -> Self {
        ResidencyManager {
            inner: Arc::new(Inner {
                table: Mutex::new(RecordTable::new(config)),
                cost_queue: CostQueue::new(),
                use_queue: UseQueue::new(),
                instantiator: Mutex::new(None),
                task_group,
                fence,
                issued_timestamp: AtomicU64::new(0),
                deferred_timestamp: AtomicU64::new(0),
            }),
        }
    }

    /// Binds (or replaces) the `Instantiator` used to activate and release
    /// assets. Until one is bound, activations silently no-op
    /// (`NoInstantiator`).
    ///
    /// Swapping a live instantiator for another waits for every in-flight
    /// instantiation to resolve (so no stray `report_cost` from the outgoing
    /// instantiator lands against a record the incoming one doesn't know
    /// about), releases every resident record on the outgoing instantiator,
    /// clears residency, then announces the id bounds and image class of
    /// every existing record to the incoming one — the same bootstrap a
    /// fresh registration would have triggered, replayed for a newly bound
    /// instantiator that missed it.
    #[tracing::instrument(skip(self, instantiator))]
    pub fn bind_instantiator(&self, instantiator: Arc<dyn Instantiator>) {
        loop {
            let mut table = self.inner.table.lock();
            self.apply_cost_updates_locked(&mut table);
            if !table.any_loading() {
                break;
            }
            drop(table);
            std::thread::yield_now();
        }

        let mut table = self.inner.table.lock();
        let resident_ids: Vec<AssetId> = table
            .records
            .iter()
            .filter(|r| r.state == ResidencyState::Resident)
            .map(|r| r.id)
            .collect();
        let announce: Vec<(AssetId, ImageClass)> = table.records.iter().map(|r| (r.id, r.class)).collect();
        for rec in table.records.iter_mut() {
            rec.state = ResidencyState::Absent;
            rec.consumed = 0;
            rec.pending_consumed = 0;
        }
        let count = table.records.len() as u32;
        drop(table);

        let previous = self.inner.instantiator.lock().replace(instantiator.clone());
        if let Some(previous) = previous {
            for id in resident_ids {
                previous.release(id, self.clone());
            }
        }

        instantiator.set_id_bounds(count);
        for (id, class) in announce {
            instantiator.set_image_class(id, class);
        }
    }

    /// Registers an asset whose bytes are already available through an
    /// opaque, embedder-provided handle. Always creates a new record —
    /// handle-based registration carries no path identity to dedup on.
    pub fn register_from_handle(&self, source: SourceHandle, class: ImageClass, priority: Priority) -> AssetId {
        let instantiator = self.inner.instantiator.lock().clone();
        let mut table = self.inner.table.lock();
        let id = AssetId::new(table.records.len() as u32);
        table.records.push(AssetRecord::new(id, source, class, priority, 0));
        let count = table.records.len() as u32;
        drop(table);
        self.announce_registration(instantiator.as_deref(), id, class, count);
        id
    }

    /// Registers an asset from a file path, deduplicating repeat
    /// registrations of the same path against the existing record. Opens
    /// the file via the caller-supplied `FileSystem` outside the record
    /// lock; if the open fails, returns `AssetId::NONE` and creates no
    /// record — the spec's `InvalidSource` behaviour.
    pub fn register_from_path(
        &self,
        path: &Path,
        class: ImageClass,
        priority: Priority,
        fs: &dyn FileSystem,
    ) -> AssetId {
        let path_hash = xxh3_64(path.to_string_lossy().as_bytes());

        {
            let table = self.inner.table.lock();
            if let Some(&existing) = table.path_index.get(&path_hash) {
                return existing;
            }
        }

        let source = match fs.open(path) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "invalid asset source");
                return AssetId::NONE;
            }
        };

        let instantiator = self.inner.instantiator.lock().clone();
        let mut table = self.inner.table.lock();
        if let Some(&existing) = table.path_index.get(&path_hash) {
            // Raced with another registration of the same path; discard our
            // redundant open and hand back the winner.
            return existing;
        }
        let id = AssetId::new(table.records.len() as u32);
        table.records.push(AssetRecord::new(id, source, class, priority, path_hash));
        table.path_index.insert(path_hash, id);
        let count = table.records.len() as u32;
        drop(table);
        self.announce_registration(instantiator.as_deref(), id, class, count);
        id
    }

    fn announce_registration(&self, instantiator: Option<&dyn Instantiator>, id: AssetId, class: ImageClass, count: u32) {
        if let Some(instantiator) = instantiator {
            instantiator.set_id_bounds(count);
            instantiator.set_image_class(id, class);
        }
    }

    /// Signals that `id` was used this frame, bumping its recency. Callable
    /// from any thread, lock-free — safe to call from an `Instantiator`
    /// completion callback. Unknown or sentinel ids are silently ignored.
    pub fn mark_used(&self, id: AssetId) {
        if id.is_none() {
            return;
        }
        self.inner.use_queue.push(id);
    }

    /// Sets (or changes) an asset's residency priority. Returns `false` for
    /// an unknown id.
    pub fn set_residency_priority(&self, id: AssetId, priority: Priority) -> bool {
        let mut table = self.inner.table.lock();
        match table.get_mut(id) {
            Some(rec) => {
                rec.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Sets the hard total image budget, in bytes. Mutates the live config
    /// under the record lock, the same lock `iterate` uses, so a budget
    /// change can never race a policy step.
    pub fn set_image_budget(&self, bytes: u64) {
        self.inner.table.lock().config.image_budget = bytes;
    }

    /// Sets the soft per-iteration activation budget, in bytes.
    pub fn set_image_budget_per_iteration(&self, bytes: u64) {
        self.inner.table.lock().config.image_budget_per_iteration = bytes;
    }

    /// Reports the confirmed resident cost of a previously-activated asset.
    /// Routed through the cost-update inbox rather than the record lock —
    /// safe to call from within an `Instantiator`'s own `instantiate`
    /// callback even while this thread's `iterate` call still holds the
    /// record lock elsewhere.
    pub fn report_cost(&self, id: AssetId, bytes: u64) {
        if id.is_none() {
            return;
        }
        self.inner.cost_queue.push(id, bytes);
    }

    /// Sum of confirmed and reserved-but-unconfirmed bytes across every
    /// registered asset.
    pub fn total_consumed(&self) -> u64 {
        self.inner.table.lock().total_consumed()
    }

    /// A read-only snapshot of the manager's current state.
    pub fn stats(&self) -> ResidencyStats {
        let table = self.inner.table.lock();
        let mut resident = 0;
        let mut loading = 0;
        let mut absent = 0;
        for rec in &table.records {
            match rec.state {
                ResidencyState::Resident => resident += 1,
                ResidencyState::Loading => loading += 1,
                ResidencyState::Absent => absent += 1,
            }
        }
        ResidencyStats {
            resident,
            loading,
            absent,
            total_consumed_bytes: table.total_consumed(),
            last_iteration_activated: table.last_iteration_activated,
            last_iteration_released: table.last_iteration_released,
            backpressure_skips: table.backpressure_skips,
        }
    }

    /// Runs one residency-policy step. Dispatches at most one task onto the
    /// bound task group per call; skips dispatch entirely
    /// (`BackpressureSkip`) if the gap between timestamps already handed
    /// out and the fence's completed count exceeds `fence_slack`. Either way,
    /// `latch_handles` is called exactly once so completed uploads become
    /// visible even on a skipped step.
    #[tracing::instrument(skip(self))]
    pub fn iterate(&self) {
        let slack = self.inner.table.lock().config.fence_slack as u64;
        let issued = self.inner.issued_timestamp.load(Ordering::Acquire);
        let completed = self.inner.fence.completed();

        if issued > completed + slack {
            self.inner.table.lock().backpressure_skips += 1;
            tracing::warn!(issued, completed, slack, "iterate skipped: fence backpressure");
            if let Some(instantiator) = self.inner.instantiator.lock().clone() {
                instantiator.latch_handles();
            }
            return;
        }

        // §4.4 step 1: advance by the one task this call is about to
        // dispatch, plus every blocking single-asset instantiation
        // `iterate_blocking` issued since the last `iterate` and deferred
        // onto this counter (§4.5).
        let deferred = self.inner.deferred_timestamp.swap(0, Ordering::AcqRel);
        self.inner.issued_timestamp.fetch_add(1 + deferred, Ordering::AcqRel);

        let manager = self.clone();
        self.inner.task_group.spawn(Box::new(move || {
            manager.run_policy_pass();
            manager.inner.fence.signal();
        }));
    }

    /// Forces a single asset into residency immediately, bypassing the
    /// queue and budget bookkeeping `iterate` applies. Returns `false` for
    /// an unknown id (`UnknownId`) or if no instantiator is bound
    /// (`NoInstantiator`); otherwise marks the asset used and returns
    /// `true`, whether it was already resident, already loading, or just
    /// newly dispatched.
    ///
    /// Per §4.5, a newly-dispatched instantiation is started the same way
    /// `iterate` starts one: as a background task on the bound task group,
    /// bound to the same fence signal, reserving `pending_consumed` against
    /// the estimate up front. The dispatch is counted on a deferred counter
    /// rather than `issued_timestamp` directly — the next `iterate` folds it
    /// into its own timestamp advance, keeping the fence math consistent
    /// without this call touching that counter itself.
    #[tracing::instrument(skip(self))]
    pub fn iterate_blocking(&self, id: AssetId) -> bool {
        if id.is_none() {
            return false;
        }

        let instantiator = match self.inner.instantiator.lock().clone() {
            Some(inst) => inst,
            None => return false,
        };

        let mut table = self.inner.table.lock();
        self.apply_cost_updates_locked(&mut table);
        let mut use_signals = Vec::new();
        self.inner.use_queue.drain(|id| use_signals.push(id));
        for used in use_signals {
            table.use_clock += 1;
            let clock = table.use_clock;
            if let Some(rec) = table.get_mut(used) {
                rec.last_used = clock;
            }
        }

        table.use_clock += 1;
        let clock = table.use_clock;
        let (source, class, already_active) = match table.get_mut(id) {
            Some(rec) => {
                rec.last_used = clock;
                match rec.state {
                    ResidencyState::Absent => (rec.source.clone(), rec.class, false),
                    _ => (rec.source.clone(), rec.class, true),
                }
            }
            None => return false,
        };

        if !already_active {
            let estimate = instantiator.estimate_cost(id, &source);
            if let Some(rec) = table.get_mut(id) {
                rec.state = ResidencyState::Loading;
                rec.pending_consumed = estimate;
            }
        }
        drop(table);

        if !already_active {
            self.inner.deferred_timestamp.fetch_add(1, Ordering::AcqRel);
            let manager = self.clone();
            self.inner.task_group.spawn(Box::new(move || {
                instantiator.instantiate(id, source, class, manager.clone());
                manager.inner.fence.signal();
            }));
        }
        true
    }

    /// Applies every queued cost update against the record table, refreshing
    /// `last_used` so a freshly-confirmed asset isn't an immediate eviction
    /// candidate (§4.3's "deliberately refreshes recency" clause). Shared by
    /// the normal policy pass, `iterate_blocking`, and the instantiator-swap
    /// drain loop.
    fn apply_cost_updates_locked(&self, table: &mut MutexGuard<'_, RecordTable>) {
        let mut cost_updates = Vec::new();
        self.inner.cost_queue.drain_into(&mut cost_updates);
        for (id, bytes) in cost_updates {
            table.use_clock += 1;
            let clock = table.use_clock;
            match table.get_mut(id) {
                Some(rec) => {
                    rec.state = ResidencyState::Resident;
                    rec.consumed = bytes;
                    rec.pending_consumed = 0;
                    rec.last_used = clock;
                    tracing::debug!(id = %id, bytes = %format_bytes(bytes), "asset resident");
                }
                None => {
                    tracing::warn!(id = %id, "report_cost for an id with no record");
                }
            }
        }
    }

    /// Drains the use queue and cost queue, runs the policy, and applies
    /// its decisions against the bound instantiator. Invoked from the task
    /// the corresponding `iterate` call dispatched.
    fn run_policy_pass(&self) {
        let instantiator = self.inner.instantiator.lock().clone();

        let mut use_signals = Vec::new();
        self.inner.use_queue.drain(|id| use_signals.push(id));

        let mut table = self.inner.table.lock();
        self.apply_cost_updates_locked(&mut table);

        for id in use_signals {
            table.use_clock += 1;
            let clock = table.use_clock;
            if let Some(rec) = table.get_mut(id) {
                rec.last_used = clock;
            }
        }

        let total_consumed = table.total_consumed();
        let config = table.config.clone();
        let inst_for_estimate = instantiator.clone();
        let (outcome, _new_total) = policy::run(&mut table.records, &config, total_consumed, |rec| {
            match &inst_for_estimate {
                Some(inst) => inst.estimate_cost(rec.id, &rec.source),
                None => 0,
            }
        });

        table.last_iteration_activated = outcome.activations.len() as u64;
        table.last_iteration_released = outcome.releases.len() as u64;

        let mut to_instantiate = Vec::new();
        for id in &outcome.activations {
            if let Some(rec) = table.get(*id) {
                to_instantiate.push((*id, rec.source.clone(), rec.class));
            }
        }

        let mut to_release = Vec::new();
        for id in &outcome.releases {
            if let Some(rec) = table.get_mut(*id) {
                rec.state = ResidencyState::Absent;
                rec.consumed = 0;
                rec.pending_consumed = 0;
                to_release.push(*id);
            }
        }

        drop(table);

        if let Some(instantiator) = instantiator {
            for (id, source, class) in to_instantiate {
                tracing::debug!(id = %id, "activating asset");
                instantiator.instantiate(id, source, class, self.clone());
            }
            for id in to_release {
                tracing::debug!(id = %id, "releasing asset");
                instantiator.release(id, self.clone());
            }
            instantiator.latch_handles();
        } else {
            tracing::trace!("policy pass ran with no instantiator bound; decisions discarded");
        }
    }

    /// Winds the manager down: waits for every in-flight instantiation to
    /// resolve, then releases every still-resident record through the bound
    /// instantiator. A no-op if no instantiator is bound. Spins rather than
    /// blocking on a real condvar — matching the spec's "no cancellation of
    /// an in-flight instantiation", the only way forward is for the
    /// outstanding work to actually finish and report its cost.
    pub fn shutdown(&self) {
        loop {
            let mut table = self.inner.table.lock();
            self.apply_cost_updates_locked(&mut table);
            if !table.any_loading() {
                break;
            }
            drop(table);
            std::thread::yield_now();
        }

        let instantiator = self.inner.instantiator.lock().clone();
        let Some(instantiator) = instantiator else {
            return;
        };

        let mut table = self.inner.table.lock();
        let resident_ids: Vec<AssetId> = table
            .records
            .iter()
            .filter(|r| r.state == ResidencyState::Resident)
            .map(|r| r.id)
            .collect();
        for rec in table.records.iter_mut() {
            if rec.state == ResidencyState::Resident {
                rec.state = ResidencyState::Absent;
                rec.consumed = 0;
            }
        }
        drop(table);

        for id in resident_ids {
            instantiator.release(id, self.clone());
        }
    }
}
