#![expect(unsafe_code, reason = "erased task entry points carry raw payload pointers")]

//! The scheduler: worker lifecycle, spawning, joining, stealing.
//!
//! The constructing thread is co-opted as worker 0 and can spawn and join
//! immediately; `threads - 1` additional OS threads run the worker loop.
//! Every worker owns a task pool and a deque; work moves between workers
//! only by stealing.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::debug;
use ws_os::utils::Backoff;

use crate::deque::Deque;
use crate::erased::{ErasedTask, Payload, trampoline};
use crate::error::SpawnError;
use crate::handle::{MAX_WORKERS, TaskId};
use crate::idle::IdleGate;
use crate::slot::{PARAM_MAX, RawTaskFn, SLOT_COUNT, TaskPool, TaskSlot};
use crate::xor_shift::XorShift64Star;

// -----------------------------------------------------------------------------
// Config

/// A scheduler always has at least two workers; with one there would be
/// nobody to steal from and `join` could not make progress on foreign work.
const MIN_WORKERS: usize = 2;

/// The signature of a task body: the context of the executing worker and
/// the parameter the spawn supplied.
pub type TaskFn<P> = fn(&TaskContext<'_>, &P);

// -----------------------------------------------------------------------------
// Worker

/// Per-worker state. The pool, deque bottom and RNG are owner-only; the
/// deque top, the close flag and the slots' shared fields are for everyone.
struct Worker {
    pool: TaskPool,
    deque: Deque,
    rng: XorShift64Star,
    close: AtomicBool,
}

// SAFETY: the non-`Sync` interior (pool cursor, slot payload cells, RNG
// state) is only ever touched by the worker the record belongs to; shared
// access goes through the atomic fields.
unsafe impl Sync for Worker {}
// SAFETY: as above.
unsafe impl Send for Worker {}

impl Worker {
    fn new() -> Self {
        Self {
            pool: TaskPool::new(),
            deque: Deque::new(),
            rng: XorShift64Star::fixed(),
            close: AtomicBool::new(false),
        }
    }
}

// -----------------------------------------------------------------------------
// Shared

/// The state all workers share.
struct Shared {
    workers: Box<[Worker]>,
    idle: IdleGate,
}

// -----------------------------------------------------------------------------
// Thread binding

/// Which scheduler the current thread works for, and as which worker.
struct Bound {
    shared: Cell<*const Shared>,
    index: Cell<usize>,
}

thread_local! {
    static BOUND: Bound = const {
        Bound {
            shared: Cell::new(ptr::null()),
            index: Cell::new(0),
        }
    };
}

fn bind(shared: &Arc<Shared>, index: usize) {
    BOUND.with(|bound| {
        bound.shared.set(Arc::as_ptr(shared));
        bound.index.set(index);
    });
}

fn bound_index(shared: &Shared) -> Option<usize> {
    BOUND.with(|bound| {
        ptr::eq(bound.shared.get(), shared).then(|| bound.index.get())
    })
}

// -----------------------------------------------------------------------------
// Core operations

/// Resolves a handle to its slot, or `None` if the handle is stale (the
/// slot has minted a newer generation) or foreign.
fn deref(shared: &Shared, id: TaskId) -> Option<&TaskSlot> {
    if id.worker() >= shared.workers.len() || id.offset() >= SLOT_COUNT {
        return None;
    }
    let slot = shared.workers[id.worker()].pool.slot(id.offset());
    (slot.handle_bits() == id.to_bits()).then_some(slot)
}

/// Drops one reference from `slot`'s active count and cascades up the
/// parent chain on every count that reaches zero.
fn finish(shared: &Shared, slot: &TaskSlot) {
    let mut slot = slot;
    loop {
        // Read the parent link before the decrement: the moment the count
        // hits zero the owning worker may recycle the slot.
        let parent = slot.parent();
        if slot.active().fetch_sub(1, Ordering::AcqRel) != 1 {
            break;
        }
        match parent {
            Some(parent) => {
                slot = shared.workers[parent.worker()].pool.slot(parent.offset());
            }
            None => break,
        }
    }
}

/// Runs the task `id`, which the caller has just popped or stolen.
fn execute(shared: &Shared, worker: usize, id: TaskId) {
    let slot = shared.workers[id.worker()].pool.slot(id.offset());
    let cx = TaskContext {
        shared,
        worker,
        id,
        _not_send: PhantomData,
    };
    // SAFETY: the entry point was installed together with its payload by the
    // matching spawn; the deque's release/acquire pair ordered those writes
    // before this call.
    unsafe { (slot.invoke())(&cx, slot.param_ptr()) };
    finish(shared, slot);
}

/// Obtains one task — own deque first, then steal attempts over the other
/// workers from a random starting point — and runs it. Returns whether
/// anything was run.
fn run_next(shared: &Shared, worker: usize) -> bool {
    let me = &shared.workers[worker];
    let id = me.deque.pop().or_else(|| {
        let count = shared.workers.len();
        let start = me.rng.next_usize(count);
        (0..count)
            .map(|k| (start + k) % count)
            .filter(|&victim| victim != worker)
            .find_map(|victim| shared.workers[victim].deque.steal())
    });

    match id {
        Some(id) => {
            execute(shared, worker, id);
            true
        }
        None => false,
    }
}

/// Allocates a slot, installs the entry point and payload, links the
/// parent, publishes the task and signals a sleeper. The slow paths (full
/// pool, full deque) drain one task and retry; progress is guaranteed as
/// long as some task in the system is runnable.
fn spawn_commit(
    shared: &Shared,
    worker: usize,
    parent: Option<TaskId>,
    invoke: RawTaskFn,
    fill: impl FnOnce(&TaskSlot),
) -> Result<TaskId, SpawnError> {
    if let Some(parent) = parent {
        if deref(shared, parent).is_none() {
            return Err(SpawnError::StaleParent(parent));
        }
    }

    let me = &shared.workers[worker];
    let id = loop {
        match me.pool.allocate(worker) {
            Some(id) => break id,
            // Pool exhausted: drain one task and retry.
            None => {
                run_next(shared, worker);
            }
        }
    };

    let slot = me.pool.slot(id.offset());
    slot.prepare(invoke, parent);
    fill(slot);

    if let Some(parent) = parent {
        // The caller keeps the parent live (it is the parent, or holds an
        // ancestor of it), so the slot cannot recycle under us. The push
        // below publishes with release ordering.
        shared.workers[parent.worker()]
            .pool
            .slot(parent.offset())
            .active()
            .fetch_add(1, Ordering::Relaxed);
    }

    while me.deque.push(id).is_err() {
        // Deque full: drain one task and retry.
        run_next(shared, worker);
    }

    shared.idle.signal();
    Ok(id)
}

fn spawn_inner<P>(
    shared: &Shared,
    worker: usize,
    parent: Option<TaskId>,
    f: TaskFn<P>,
    param: P,
) -> Result<TaskId, SpawnError>
where
    P: Copy + Send + 'static,
{
    if size_of::<Payload<P>>() > PARAM_MAX {
        return Err(SpawnError::PayloadTooLarge {
            size: size_of::<Payload<P>>(),
        });
    }
    spawn_commit(shared, worker, parent, trampoline::<P>, |slot| {
        slot.write_param(Payload { f, param });
    })
}

fn join_inner(shared: &Shared, worker: usize, id: TaskId) {
    let mut backoff = Backoff::new();
    loop {
        // Re-dereference every round: the handle goes stale the moment the
        // slot recycles, and stale means the subtree completed.
        let Some(slot) = deref(shared, id) else { return };
        if slot.active().load(Ordering::Acquire) == 0 {
            return;
        }

        // Never sleeps: the joiner may be the transitive parent of what it
        // waits for, so it must keep executing.
        if run_next(shared, worker) {
            backoff = Backoff::new();
        } else {
            backoff.snooze();
        }
    }
}

// -----------------------------------------------------------------------------
// Worker loop

fn worker_loop(shared: Arc<Shared>, index: usize) {
    bind(&shared, index);
    let worker = &shared.workers[index];
    worker.rng.reseed();

    while !worker.close.load(Ordering::Acquire) {
        if !run_next(&shared, index) {
            shared.idle.wait();
        }
    }
}

// -----------------------------------------------------------------------------
// SchedulerBuilder

/// Builder for a [`Scheduler`].
///
/// ```
/// use ws_task::Scheduler;
///
/// let scheduler = Scheduler::builder()
///     .thread_num(4)
///     .thread_name(String::from("compute"))
///     .build();
/// assert_eq!(scheduler.thread_num(), 4);
/// ```
#[derive(Default)]
#[must_use]
pub struct SchedulerBuilder {
    /// Number of workers including the constructing thread. If `None`, uses
    /// the logical core count.
    thread_num: Option<usize>,
    /// Custom stack size for the spawned workers.
    stack_size: Option<usize>,
    /// Thread name prefix; workers are named `<prefix> (<index>)`.
    thread_name: Option<String>,
}

impl SchedulerBuilder {
    /// Creates a new [`SchedulerBuilder`].
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            thread_num: None,
            stack_size: None,
            thread_name: None,
        }
    }

    /// Sets the number of workers, counting the constructing thread.
    ///
    /// Clamped to `[2, MAX_WORKERS]` at build time.
    #[inline]
    pub fn thread_num(mut self, thread_num: usize) -> Self {
        self.thread_num = Some(thread_num);
        self
    }

    /// Overrides the stack size of the spawned worker threads.
    #[inline]
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Sets the worker thread name prefix. Default: `workshare`.
    #[inline]
    pub fn thread_name(mut self, thread_name: String) -> Self {
        self.thread_name = Some(thread_name);
        self
    }

    /// Builds the scheduler, co-opting the calling thread as worker 0.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to create a worker thread; a scheduler that
    /// cannot reach its fixed pool size cannot run.
    pub fn build(self) -> Scheduler {
        let requested = self.thread_num.unwrap_or_else(|| {
            thread::available_parallelism().map_or(MIN_WORKERS, |n| n.get())
        });
        let count = requested.clamp(MIN_WORKERS, MAX_WORKERS);

        let shared = Arc::new(Shared {
            workers: (0..count).map(|_| Worker::new()).collect(),
            idle: IdleGate::new(),
        });

        // Worker 0 is the constructing thread; it never runs the worker
        // loop, it only drains tasks inside spawn and join.
        bind(&shared, 0);
        shared.workers[0].rng.reseed();

        let prefix = self.thread_name.as_deref().unwrap_or("workshare");
        let threads: Box<[JoinHandle<()>]> = (1..count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                let mut builder = thread::Builder::new().name(format!("{prefix} ({index})"));
                if let Some(stack_size) = self.stack_size {
                    builder = builder.stack_size(stack_size);
                }
                builder
                    .spawn(move || worker_loop(shared, index))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!("scheduler started with {count} workers");
        Scheduler { shared, threads }
    }
}

// -----------------------------------------------------------------------------
// Scheduler

/// A fixed pool of worker threads executing spawned tasks.
///
/// The thread that builds the scheduler becomes worker 0: it can spawn and
/// join immediately, and it is the only thread allowed to drop the
/// scheduler — the drop joins every spawned worker, which a worker cannot
/// do to itself. `Drop` asserts this.
///
/// Spawning and joining are only legal from the pool's own threads — worker
/// 0 or a task body. Hand a [`SchedulerHandle`] to anything that needs to
/// submit from elsewhere in the ownership graph but still calls from pool
/// threads.
///
/// Dropping the scheduler does not drain outstanding tasks; join everything
/// you spawned first, and drop anything whose own cleanup joins a task —
/// the proactor does — before the scheduler, while the workers still run.
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Box<[JoinHandle<()>]>,
}

impl Scheduler {
    /// Creates a scheduler with `threads` workers (clamped to `[2, 256]`),
    /// counting the calling thread.
    pub fn new(threads: usize) -> Self {
        Self::builder().thread_num(threads).build()
    }

    /// Returns a [`SchedulerBuilder`].
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Returns a cloneable submission handle to this scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The number of workers, including worker 0.
    #[inline]
    pub fn thread_num(&self) -> usize {
        self.shared.workers.len()
    }

    /// Spawns a task.
    ///
    /// `param` is copied into the task's inline parameter area; together
    /// with the function pointer it must fit [`PARAM_MAX`] bytes. If
    /// `parent` is given, the new task becomes part of the parent's
    /// completion tree: joining the parent waits for this task too.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not part of this scheduler's pool.
    pub fn spawn<P>(
        &self,
        parent: Option<TaskId>,
        f: TaskFn<P>,
        param: P,
    ) -> Result<TaskId, SpawnError>
    where
        P: Copy + Send + 'static,
    {
        spawn_inner(&self.shared, self.bound_worker(), parent, f, param)
    }

    /// Waits until `id` and all of its descendants have finished, executing
    /// other tasks meanwhile. A stale handle returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not part of this scheduler's pool.
    pub fn join(&self, id: TaskId) {
        join_inner(&self.shared, self.bound_worker(), id);
    }

    fn bound_worker(&self) -> usize {
        match bound_index(&self.shared) {
            Some(index) => index,
            None => panic!("calling thread is not part of this scheduler's pool"),
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.shared.workers.len())
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        debug!("scheduler shutting down");

        let panicking = thread::panicking();
        // Destruction runs on worker 0 only: the spawned workers are joined
        // below and a worker cannot join itself. Suppressed while unwinding
        // so a wrong-thread drop cannot turn a panic into an abort.
        if !panicking {
            assert_eq!(
                bound_index(&self.shared),
                Some(0),
                "scheduler must be dropped on the thread that built it",
            );
        }

        for worker in &self.shared.workers {
            worker.close.store(true, Ordering::Release);
        }
        // Flush every possible sleeper past the semaphore so each observes
        // the close flag.
        self.shared.idle.flush(self.shared.workers.len());

        for handle in mem::take(&mut self.threads) {
            let joined = handle.join();
            if !panicking {
                joined.expect("worker thread panicked");
            }
        }

        BOUND.with(|bound| {
            if ptr::eq(bound.shared.get(), Arc::as_ptr(&self.shared)) {
                bound.shared.set(ptr::null());
            }
        });
    }
}

// -----------------------------------------------------------------------------
// SchedulerHandle

/// A cloneable handle for spawning onto and joining on a [`Scheduler`].
///
/// The handle keeps the shared state alive but does not own the workers;
/// like [`Scheduler::spawn`], its methods must be called from a pool
/// thread. The proactor holds one of these to join its loop task at
/// shutdown.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// As [`Scheduler::spawn`].
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not part of the scheduler's pool.
    pub fn spawn<P>(
        &self,
        parent: Option<TaskId>,
        f: TaskFn<P>,
        param: P,
    ) -> Result<TaskId, SpawnError>
    where
        P: Copy + Send + 'static,
    {
        spawn_inner(&self.shared, self.bound_worker(), parent, f, param)
    }

    /// As [`Scheduler::join`].
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not part of the scheduler's pool.
    pub fn join(&self, id: TaskId) {
        join_inner(&self.shared, self.bound_worker(), id);
    }

    fn bound_worker(&self) -> usize {
        match bound_index(&self.shared) {
            Some(index) => index,
            None => panic!("calling thread is not part of this scheduler's pool"),
        }
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SchedulerHandle")
    }
}

// -----------------------------------------------------------------------------
// TaskContext

/// The executing task's view of the scheduler.
///
/// Passed to every task body; spawning through it is cheaper than through
/// the scheduler (no thread-binding lookup) and is the only way a task can
/// name itself as a parent via [`id`](TaskContext::id).
pub struct TaskContext<'a> {
    shared: &'a Shared,
    worker: usize,
    id: TaskId,
    // The context describes *this* worker's stack; it must not leak to
    // other threads.
    _not_send: PhantomData<*const ()>,
}

impl TaskContext<'_> {
    /// The handle of the running task.
    #[inline(always)]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// As [`Scheduler::spawn`], from inside a task body.
    pub fn spawn<P>(
        &self,
        parent: Option<TaskId>,
        f: TaskFn<P>,
        param: P,
    ) -> Result<TaskId, SpawnError>
    where
        P: Copy + Send + 'static,
    {
        spawn_inner(self.shared, self.worker, parent, f, param)
    }

    /// As [`Scheduler::join`], from inside a task body.
    pub fn join(&self, id: TaskId) {
        join_inner(self.shared, self.worker, id);
    }

    pub(crate) fn spawn_erased_inner(
        &self,
        parent: Option<TaskId>,
        task: &ErasedTask,
    ) -> Result<TaskId, SpawnError> {
        spawn_commit(self.shared, self.worker, parent, task.invoke(), |slot| {
            slot.write_param_bytes(task.payload());
        })
    }
}

impl fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("worker", &self.worker)
            .field("id", &self.id)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Scheduler, TaskContext};
    use crate::error::SpawnError;
    use crate::slot::SLOT_COUNT;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::thread;

    #[derive(Clone, Copy)]
    struct OutPtr(*mut u64);
    // SAFETY: test-only; every use joins the task before the pointee leaves
    // scope.
    unsafe impl Send for OutPtr {}

    #[test]
    fn runs_a_task_to_completion() {
        static X: AtomicU32 = AtomicU32::new(0);

        let scheduler = Scheduler::new(4);
        let task = scheduler
            .spawn(None, |_, _: &()| {
                X.store(42, Ordering::Relaxed);
            }, ())
            .unwrap();
        scheduler.join(task);
        assert_eq!(X.load(Ordering::Relaxed), 42);
    }

    #[test]
    fn join_covers_every_descendant() {
        static DONE: AtomicU32 = AtomicU32::new(0);

        fn fan_out(cx: &TaskContext<'_>, depth: &u32) {
            if *depth == 0 {
                DONE.fetch_add(1, Ordering::Relaxed);
                return;
            }
            // Children are *not* joined here; only the completion tree
            // keeps the root's join honest.
            for _ in 0..4 {
                cx.spawn(Some(cx.id()), fan_out, *depth - 1).unwrap();
            }
        }

        DONE.store(0, Ordering::Relaxed);
        let scheduler = Scheduler::new(4);
        let root = scheduler.spawn(None, fan_out, 4u32).unwrap();
        scheduler.join(root);

        // 4^4 leaves.
        assert_eq!(DONE.load(Ordering::Relaxed), 256);
    }

    #[test]
    fn fibonacci_by_recursive_tasks() {
        fn fib(cx: &TaskContext<'_>, arg: &(u32, OutPtr)) {
            let (n, out) = *arg;
            if n < 2 {
                // SAFETY: the spawner joins this task before `out` dies.
                unsafe { *out.0 = n as u64 };
                return;
            }
            let mut a = 0u64;
            let mut b = 0u64;
            let ta = cx
                .spawn(Some(cx.id()), fib, (n - 1, OutPtr(&mut a)))
                .unwrap();
            let tb = cx
                .spawn(Some(cx.id()), fib, (n - 2, OutPtr(&mut b)))
                .unwrap();
            cx.join(ta);
            cx.join(tb);
            // SAFETY: as above.
            unsafe { *out.0 = a + b };
        }

        let scheduler = Scheduler::new(4);
        let mut result = 0u64;
        let root = scheduler
            .spawn(None, fib, (20u32, OutPtr(&mut result)))
            .unwrap();
        scheduler.join(root);
        assert_eq!(result, 6765);
    }

    #[test]
    fn stale_handle_joins_immediately() {
        static HITS: AtomicU32 = AtomicU32::new(0);

        fn bump(_: &TaskContext<'_>, _: &()) {
            HITS.fetch_add(1, Ordering::Relaxed);
        }

        let scheduler = Scheduler::new(2);
        let early = scheduler.spawn(None, bump, ()).unwrap();
        scheduler.join(early);

        // Roll worker 0's pool all the way around so the slot recycles.
        for _ in 0..SLOT_COUNT {
            let id = scheduler.spawn(None, bump, ()).unwrap();
            scheduler.join(id);
        }

        // Either stale (slot reused) or long finished: returns at once and
        // touches nothing.
        scheduler.join(early);
        assert_eq!(HITS.load(Ordering::Relaxed), 1 + SLOT_COUNT as u32);
    }

    #[test]
    fn spawn_join_storm_terminates() {
        static CHILDREN: AtomicU64 = AtomicU64::new(0);

        fn child(_: &TaskContext<'_>, _: &()) {
            CHILDREN.fetch_add(1, Ordering::Relaxed);
        }

        fn parent(cx: &TaskContext<'_>, _: &()) {
            let id = cx.spawn(None, child, ()).unwrap();
            cx.join(id);
        }

        CHILDREN.store(0, Ordering::Relaxed);
        let scheduler = Scheduler::new(4);
        let mut pending = Vec::new();
        for _ in 0..2_000 {
            pending.push(scheduler.spawn(None, parent, ()).unwrap());
            if pending.len() >= 64 {
                for id in pending.drain(..) {
                    scheduler.join(id);
                }
            }
        }
        for id in pending {
            scheduler.join(id);
        }
        assert_eq!(CHILDREN.load(Ordering::Relaxed), 2_000);
        // The drop below hangs if any worker misses its wakeup.
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let scheduler = Scheduler::new(2);
        let err = scheduler
            .spawn(None, |_, _: &[u8; 128]| {}, [0u8; 128])
            .unwrap_err();
        assert!(matches!(err, SpawnError::PayloadTooLarge { .. }));
    }

    #[test]
    fn stale_parent_is_rejected() {
        let scheduler = Scheduler::new(2);
        let done = scheduler.spawn(None, |_, _: &()| {}, ()).unwrap();
        scheduler.join(done);

        // Roll the pool so the handle is guaranteed stale.
        for _ in 0..SLOT_COUNT {
            let id = scheduler.spawn(None, |_, _: &()| {}, ()).unwrap();
            scheduler.join(id);
        }

        let err = scheduler.spawn(Some(done), |_, _: &()| {}, ()).unwrap_err();
        assert_eq!(err, SpawnError::StaleParent(done));
    }

    #[test]
    fn thread_count_is_clamped() {
        let scheduler = Scheduler::new(0);
        assert_eq!(scheduler.thread_num(), 2);
    }

    #[test]
    fn foreign_thread_cannot_spawn() {
        let scheduler = Scheduler::new(2);

        let hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = thread::scope(|scope| {
            scope
                .spawn(|| scheduler.spawn(None, |_, _: &()| {}, ()))
                .join()
        });
        std::panic::set_hook(hook);

        assert!(result.is_err());
    }

    #[test]
    fn drop_off_worker_zero_is_rejected() {
        let scheduler = Scheduler::new(2);

        let hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = thread::scope(|scope| scope.spawn(move || drop(scheduler)).join());
        std::panic::set_hook(hook);

        // The drop asserts before joining anything, so the wrong thread
        // panics instead of deadlocking on its own join handle.
        assert!(result.is_err());
    }

    #[test]
    fn handle_spawns_from_pool_thread() {
        static X: AtomicU32 = AtomicU32::new(0);

        let scheduler = Scheduler::new(2);
        let handle = scheduler.handle();
        let id = handle
            .spawn(None, |_, _: &()| {
                X.store(7, Ordering::Relaxed);
            }, ())
            .unwrap();
        handle.join(id);
        assert_eq!(X.load(Ordering::Relaxed), 7);
    }
}
