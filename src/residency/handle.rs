// src/residency/handle.rs
//! External collaborator: the file system.
//!
//! The manager never touches a file descriptor itself. `register_from_path`
//! defers to a caller-supplied `FileSystem` implementation, the same way
//! the teacher's `AssetSourceManager` abstracts over where bytes actually
//! come from (disk, archive, network) instead of hard-coding `std::fs`.

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// An opaque, already-opened source for an asset's bytes. The manager only
/// ever stores and forwards this value to the `Instantiator`; it never
/// inspects it.
pub type SourceHandle = Arc<dyn Any + Send + Sync>;

/// Opens a path into a `SourceHandle`, owned by the embedder.
///
/// A real implementation might memory-map the file, hand back a packed
/// archive entry, or wrap a `std::fs::File`. The manager's own
/// `register_from_path` only needs to know whether the open succeeded.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &Path) -> std::io::Result<SourceHandle>;
}

impl fmt::Debug for dyn FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn FileSystem")
    }
}
