use thiserror::Error;

use crate::handle::TaskId;
use crate::slot::PARAM_MAX;

// -----------------------------------------------------------------------------
// Error

/// Why a spawn was rejected. All variants are caller errors; the scheduler
/// itself never fails a spawn (transient full-pool and full-deque states are
/// drained internally).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpawnError {
    /// The erased payload (function pointer plus parameter) does not fit the
    /// slot's inline parameter area.
    #[error("task payload of {size} bytes exceeds the {PARAM_MAX}-byte inline area")]
    PayloadTooLarge { size: usize },

    /// The parent handle is stale: its task already completed and the slot
    /// has been reused (or the handle belongs to no slot of this scheduler).
    #[error("parent task {0:?} is no longer live")]
    StaleParent(TaskId),
}
