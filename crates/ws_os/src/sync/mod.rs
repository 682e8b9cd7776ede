//! Synchronization primitives the runtime needs but the standard library
//! does not provide directly.

// -----------------------------------------------------------------------------
// Modules

mod semaphore;

// -----------------------------------------------------------------------------
// Exports

pub use semaphore::Semaphore;
