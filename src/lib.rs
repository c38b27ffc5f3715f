// src/lib.rs
//! Asset Residency Manager: decides which image assets are resident in a
//! constrained GPU-visible memory budget, activates assets the application
//! has signalled interest in, and evicts others to stay within budget.
//!
//! See [`residency`] for the manager itself and the external-collaborator
//! traits (`Instantiator`, `TaskGroup`, `FenceSignal`, `FileSystem`) it is
//! built against.

pub mod error;
pub mod residency;

pub use error::{ResidencyError, Result};
pub use residency::{
    AssetId, CountingFence, FenceSignal, FileSystem, ImageClass, Instantiator, Priority,
    ResidencyConfig, ResidencyConfigBuilder, ResidencyManager, ResidencyState, ResidencyStats,
    SourceHandle, Task, TaskGroup,
};
