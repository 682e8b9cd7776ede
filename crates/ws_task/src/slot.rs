#![expect(unsafe_code, reason = "inline task payloads are erased to raw bytes")]

//! The per-worker task slab.
//!
//! Every worker owns a fixed array of [`TaskSlot`]s sized so the whole pool
//! fits one L1 data cache (32 KiB). A slot is free exactly when its active
//! count is zero; allocation is single-writer (only the owning worker
//! allocates from its pool), so claiming a slot is a relaxed store, not a
//! CAS. Other threads touch only the atomic fields: the active count
//! (completion cascade) and the stored handle word (stale-handle checks).

use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::handle::TaskId;
use crate::scheduler::TaskContext;

// -----------------------------------------------------------------------------
// Config

/// Size of a task's inline parameter area, in bytes.
///
/// A task's erased payload — its function pointer plus its parameter value —
/// must fit here; there is no spill path.
pub const PARAM_MAX: usize = 96;

/// One slot spans two cache lines: a 32-byte header and the parameter area.
pub(crate) const SLOT_BYTES: usize = 128;

/// Slots per worker pool: one L1 data cache worth of slots.
pub(crate) const SLOT_COUNT: usize = 32 * 1024 / SLOT_BYTES;

/// The erased entry point stored in a slot. `data` points at the slot's
/// parameter area, which holds whatever the matching spawn wrote there.
pub(crate) type RawTaskFn = unsafe fn(&TaskContext<'_>, *const u8);

// -----------------------------------------------------------------------------
// TaskSlot

/// One entry of a worker's slab.
///
/// Field protocol:
/// - `invoke`, `parent` and the parameter area are written by the owning
///   worker before the task is pushed, and read by whichever worker executes
///   it. The deque's release/acquire discipline orders those accesses.
/// - `active` and `handle` are shared: the completion cascade decrements
///   `active` from arbitrary workers, and stale-handle checks read `handle`
///   from arbitrary workers.
/// - `generation` is owner-only.
#[repr(C, align(64))]
pub(crate) struct TaskSlot {
    invoke: Cell<Option<RawTaskFn>>,
    parent: Cell<Option<TaskId>>,
    handle: AtomicU64,
    active: AtomicU32,
    generation: Cell<u32>,
    param: UnsafeCell<[MaybeUninit<u8>; PARAM_MAX]>,
}

const _: () = assert!(size_of::<TaskSlot>() == SLOT_BYTES);
const _: () = assert!(align_of::<TaskSlot>() == 64);

// SAFETY: the non-`Sync` fields follow the single-writer/publication
// protocol described on the struct; cross-thread visibility is carried by
// the deque (payload fields) or by the fields' own atomicity.
unsafe impl Sync for TaskSlot {}
// SAFETY: as above; a slot never moves between threads by value anyway (it
// lives in the pool's boxed slab).
unsafe impl Send for TaskSlot {}

impl TaskSlot {
    fn new() -> Self {
        Self {
            invoke: Cell::new(None),
            parent: Cell::new(None),
            handle: AtomicU64::new(0),
            active: AtomicU32::new(0),
            generation: Cell::new(0),
            param: UnsafeCell::new([MaybeUninit::uninit(); PARAM_MAX]),
        }
    }

    /// Fills the payload fields of a freshly allocated slot.
    ///
    /// Owner-only, and only before the task is pushed.
    pub(crate) fn prepare(&self, invoke: RawTaskFn, parent: Option<TaskId>) {
        self.invoke.set(Some(invoke));
        self.parent.set(parent);
    }

    /// Copies `payload` into the parameter area.
    ///
    /// Owner-only, and only before the task is pushed. The caller has
    /// checked `size_of::<T>() <= PARAM_MAX`; `T` is `Copy`, so the bytes
    /// need no destructor.
    pub(crate) fn write_param<T: Copy>(&self, payload: T) {
        const { assert!(!core::mem::needs_drop::<T>()) };
        debug_assert!(size_of::<T>() <= PARAM_MAX);

        // SAFETY: the area is PARAM_MAX bytes and the size was checked; the
        // slot is owned by the calling worker and not yet published, so no
        // other thread reads it. Unaligned: the area is only 8-aligned.
        unsafe {
            self.param
                .get()
                .cast::<T>()
                .write_unaligned(payload);
        }
    }

    /// Copies raw payload bytes into the parameter area.
    ///
    /// Owner-only, and only before the task is pushed. The bytes are a
    /// previously erased payload image, at most `PARAM_MAX` long.
    pub(crate) fn write_param_bytes(&self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= PARAM_MAX);

        // SAFETY: the area is PARAM_MAX bytes and the length was checked at
        // erasure time; the slot is owned by the calling worker and not yet
        // published.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.param.get().cast::<u8>(),
                bytes.len(),
            );
        }
    }

    /// The erased entry point. Valid on a scheduled task (publication via
    /// the deque ordered it after [`prepare`](Self::prepare)).
    pub(crate) fn invoke(&self) -> RawTaskFn {
        match self.invoke.get() {
            Some(invoke) => invoke,
            // a scheduled task always has its entry point installed
            None => unreachable!(),
        }
    }

    /// The parent link. Stable for the whole scheduled life of the task.
    pub(crate) fn parent(&self) -> Option<TaskId> {
        self.parent.get()
    }

    /// Pointer to the parameter area, for handing to [`RawTaskFn`].
    pub(crate) fn param_ptr(&self) -> *const u8 {
        self.param.get().cast()
    }

    /// The active count: `1` for the task itself plus one per live
    /// descendant; `0` means the slot is free.
    pub(crate) fn active(&self) -> &AtomicU32 {
        &self.active
    }

    /// The handle word this slot last minted (`0` before first use).
    pub(crate) fn handle_bits(&self) -> u64 {
        self.handle.load(Ordering::Relaxed)
    }
}

// -----------------------------------------------------------------------------
// TaskPool

/// A worker's slab of [`SLOT_COUNT`] slots plus the round-robin allocation
/// cursor.
pub(crate) struct TaskPool {
    slots: Box<[TaskSlot]>,
    cursor: Cell<usize>,
}

impl TaskPool {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| TaskSlot::new()).collect(),
            cursor: Cell::new(0),
        }
    }

    /// Claims a free slot, refreshes its generation and mints its handle.
    ///
    /// Owner-only. Scans at most one full round from the cursor; `None`
    /// means the pool is momentarily exhausted and the caller should drain
    /// a task and retry.
    pub(crate) fn allocate(&self, worker: usize) -> Option<TaskId> {
        for _ in 0..SLOT_COUNT {
            let offset = self.cursor.get() % SLOT_COUNT;
            self.cursor.set(self.cursor.get().wrapping_add(1));

            let slot = &self.slots[offset];
            if slot.active.load(Ordering::Relaxed) != 0 {
                continue;
            }
            // Single-writer: only this worker allocates here.
            slot.active.store(1, Ordering::Relaxed);

            let mut generation = slot.generation.get().wrapping_add(1);
            if generation & 0xff == 0 {
                generation = generation.wrapping_add(1);
            }
            slot.generation.set(generation);

            let id = TaskId::pack(worker, (generation & 0xff) as u8, offset);
            slot.handle.store(id.to_bits(), Ordering::Relaxed);
            return Some(id);
        }
        None
    }

    /// The slot at `offset`. The caller pairs this with a handle or active
    /// count check as appropriate.
    pub(crate) fn slot(&self, offset: usize) -> &TaskSlot {
        &self.slots[offset]
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{SLOT_COUNT, TaskPool};
    use core::sync::atomic::Ordering;

    #[test]
    fn allocates_every_slot_then_fails() {
        let pool = TaskPool::new();
        for _ in 0..SLOT_COUNT {
            assert!(pool.allocate(0).is_some());
        }
        assert!(pool.allocate(0).is_none());
    }

    #[test]
    fn released_slot_is_reused_with_fresh_generation() {
        let pool = TaskPool::new();
        let first = pool.allocate(0).unwrap();
        pool.slot(first.offset()).active().store(0, Ordering::Relaxed);

        let mut second = None;
        for _ in 0..SLOT_COUNT {
            let id = pool.allocate(0).unwrap();
            if id.offset() == first.offset() {
                second = Some(id);
                break;
            }
            pool.slot(id.offset()).active().store(0, Ordering::Relaxed);
        }

        let second = second.expect("freed slot should come around again");
        assert_ne!(first, second);
        assert_eq!(pool.slot(first.offset()).handle_bits(), second.to_bits());
    }

    #[test]
    fn generation_skips_zero() {
        let pool = TaskPool::new();
        let offset = pool.allocate(0).unwrap().offset();
        let slot = pool.slot(offset);
        for _ in 0..300 {
            slot.active().store(0, Ordering::Relaxed);
            let mut id = pool.allocate(0).unwrap();
            while id.offset() != offset {
                pool.slot(id.offset()).active().store(0, Ordering::Relaxed);
                id = pool.allocate(0).unwrap();
            }
            assert_ne!(id.generation(), 0);
        }
    }
}
