// src/residency/record.rs
//! The per-asset record and the small value types that make it up.

use crate::residency::handle::SourceHandle;
use crate::residency::id::AssetId;

/// Coarse classification the `Instantiator` uses to decide how to upload an
/// asset; the policy itself treats it as opaque metadata and never sorts or
/// evicts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageClass {
    Texture2D,
    Texture3D,
    Cubemap,
    RenderTarget,
}

/// Residency priority. Ordinary priorities are small integers compared
/// numerically (higher activates first, lower releases first);
/// `PERSISTENT` is a sentinel above any numeric priority that the policy
/// never selects for release, even above the hard budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    /// Never evicted by the policy. May push total consumption above the
    /// hard `image_budget`.
    pub const PERSISTENT: Priority = Priority(u8::MAX);

    #[inline]
    pub fn new(level: u8) -> Self {
        // Reserve the top value for PERSISTENT so ordinary priorities can
        // never accidentally alias it.
        Priority(level.min(u8::MAX - 1))
    }

    #[inline]
    pub fn is_persistent(self) -> bool {
        self == Self::PERSISTENT
    }

    #[inline]
    pub(crate) fn raw(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::new(0)
    }
}

/// Lifecycle state of an `AssetRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidencyState {
    /// Registered, not resident, no instantiation in flight.
    Absent,
    /// An instantiation task has been dispatched; `pending_consumed` holds
    /// the provisional cost reserved against the budget.
    Loading,
    /// Instantiated; `consumed` holds the confirmed cost reported by
    /// `report_cost`.
    Resident,
}

/// The record the manager keeps for every registered asset.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub id: AssetId,
    pub source: SourceHandle,
    pub class: ImageClass,
    pub priority: Priority,
    pub state: ResidencyState,
    /// Monotonic use-signal timestamp; `mark_used` bumps this, the policy
    /// sorts descending on it as the LRU tiebreak.
    pub last_used: u64,
    /// Confirmed resident cost in bytes, set by `report_cost`, zeroed on
    /// release.
    pub consumed: u64,
    /// Cost reserved for an in-flight instantiation, before `report_cost`
    /// confirms it. Zero outside the `Loading` state.
    pub pending_consumed: u64,
    /// Path hash used to deduplicate `register_from_path` calls against the
    /// same underlying file. `0` for handle-based registrations, which
    /// carry no path identity to dedup on.
    pub(crate) path_hash: u64,
}

impl AssetRecord {
    pub(crate) fn new(
        id: AssetId,
        source: SourceHandle,
        class: ImageClass,
        priority: Priority,
        path_hash: u64,
    ) -> Self {
        AssetRecord {
            id,
            source,
            class,
            priority,
            state: ResidencyState::Absent,
            last_used: 0,
            consumed: 0,
            pending_consumed: 0,
            path_hash,
        }
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.state == ResidencyState::Resident
    }

    #[inline]
    pub fn total_cost(&self) -> u64 {
        match self.state {
            ResidencyState::Loading => self.pending_consumed,
            ResidencyState::Resident => self.consumed,
            ResidencyState::Absent => 0,
        }
    }
}
