// src/residency/task_group.rs
//! External collaborator: the task group.
//!
//! `iterate` dispatches at most one task per call onto a caller-supplied
//! task group, matching the spec's "iterate may enqueue one task per call."
//! The task drains the manager's use/cost queues and runs the residency
//! policy off the calling thread; its completion signals the bound
//! `FenceSignal`.

/// A unit of deferred work the manager hands to the embedder's job system.
pub trait Task: Send {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Task for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Runs `Task`s on whatever scheduler the embedder already has (a thread
/// pool, a fiber system, an async executor bridged via `block_in_place`).
/// The manager never spawns its own threads; it only ever calls `spawn`.
pub trait TaskGroup: Send + Sync {
    fn spawn(&self, task: Box<dyn Task>);
}
