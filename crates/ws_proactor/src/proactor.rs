#![expect(unsafe_code, reason = "the loop task carries its state as a raw pointer")]

//! The producer-side handle.
//!
//! [`Proactor::new`] spawns the event loop as an ordinary task and keeps
//! only the producer half of the control channel; every method is a framed
//! command over that channel, so submissions return immediately and take
//! effect on the loop's next round. Dropping the handle closes the channel,
//! which the loop observes as EOF and shuts down; the drop then joins the
//! loop task.

use core::sync::atomic::{AtomicU32, Ordering};
use std::io;
use std::num::NonZeroU32;
use std::os::fd::RawFd;
use std::sync::{Mutex, PoisonError};

use ws_os::net::{Stream, socket_pair};
use ws_os::time::now_ms;
use ws_task::{ErasedTask, Scheduler, SchedulerHandle, SpawnError, TaskContext, TaskFn, TaskId};

use crate::channel::{FrameWriter, Opcode};
use crate::reactor::Reactor;

// -----------------------------------------------------------------------------
// TimerId

/// A stable, nonzero identifier for a registered timer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerId(NonZeroU32);

impl TimerId {
    fn new(raw: u32) -> Self {
        match NonZeroU32::new(raw) {
            Some(raw) => Self(raw),
            // the allocator skips zero
            None => unreachable!(),
        }
    }

    /// The raw id value.
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

// -----------------------------------------------------------------------------
// Proactor

/// Handle to a running I/O proactor.
///
/// The proactor multiplexes timers and socket readiness on a single event
/// loop that runs as one ordinary task, occupying one worker for its whole
/// life — size the scheduler with a worker to spare. All registration and
/// cancellation calls are nonblocking; their effects become visible after
/// the loop's next control-channel round-trip.
///
/// Timeout semantics: a *timed* watcher pairs an I/O task with a timeout
/// task, and whichever side fires first neutralises the other. The fired
/// side's task still runs to completion; the loser never runs.
///
/// Drop order matters: the proactor must be dropped *before* its
/// [`Scheduler`], and from one of the pool's threads. Its `Drop` closes the
/// control channel and then joins the loop task, which needs the workers to
/// still be running; once the scheduler has shut down, that join can never
/// finish.
pub struct Proactor {
    control: Mutex<Option<Stream>>,
    scheduler: SchedulerHandle,
    task: TaskId,
    next_timer_id: AtomicU32,
}

impl Proactor {
    /// Starts a proactor on `scheduler`, optionally as a child of `parent`.
    ///
    /// Note that a parent's `join` will then not return until this proactor
    /// is destroyed, since the loop task only finishes at shutdown.
    pub fn new(scheduler: &Scheduler, parent: Option<TaskId>) -> io::Result<Self> {
        let (producer, consumer) = socket_pair()?;

        let reactor = Box::into_raw(Box::new(Reactor::new(consumer)));
        let task = match scheduler.spawn(parent, reactor_entry, ReactorPtr(reactor)) {
            Ok(task) => task,
            Err(err) => {
                // The loop never started; reclaim its state.
                // SAFETY: `reactor` came from `Box::into_raw` above and was
                // handed to nobody.
                drop(unsafe { Box::from_raw(reactor) });
                return Err(io::Error::new(io::ErrorKind::InvalidInput, err));
            }
        };

        Ok(Self {
            control: Mutex::new(Some(producer)),
            scheduler: scheduler.handle(),
            task,
            next_timer_id: AtomicU32::new(1),
        })
    }

    // -------------------------------------------------------------------------
    // Timers

    /// Schedules `f` to be spawned in `timeout_ms` milliseconds, and — if
    /// `repeat_ms` is nonzero — every `repeat_ms` milliseconds after that.
    pub fn add_timer<P>(
        &self,
        timeout_ms: u32,
        repeat_ms: u32,
        parent: Option<TaskId>,
        f: TaskFn<P>,
        param: P,
    ) -> Result<TimerId, SpawnError>
    where
        P: Copy + Send + 'static,
    {
        let task = ErasedTask::new(f, param)?;
        let id = self.allocate_timer_id();

        let mut frame = FrameWriter::new(Opcode::AddTimer);
        write_timer(
            &mut frame,
            now_ms() + timeout_ms as u64,
            id,
            parent,
            repeat_ms,
            &task,
        );
        self.send(frame.finish());

        Ok(TimerId::new(id))
    }

    /// Cancels a timer. Unknown and already-fired ids are silently ignored.
    pub fn cancel_timer(&self, id: TimerId) {
        let mut frame = FrameWriter::new(Opcode::CancelTimer);
        frame.put_u32(id.get());
        self.send(frame.finish());
    }

    /// Moves a pending timer to fire in `timeout_ms` milliseconds with a
    /// new repeat period. Unknown ids are silently ignored.
    pub fn update_timer(&self, id: TimerId, timeout_ms: u32, repeat_ms: u32) {
        let mut frame = FrameWriter::new(Opcode::UpdateTimer);
        frame.put_u32(id.get());
        frame.put_u64(now_ms() + timeout_ms as u64);
        frame.put_u32(repeat_ms);
        self.send(frame.finish());
    }

    // -------------------------------------------------------------------------
    // Watchers

    /// Schedules `f` to be spawned once `fd` becomes readable (or reports
    /// an error or hangup). One shot: the watcher disarms as it fires.
    ///
    /// Arming a second receive watcher on the same descriptor while one is
    /// armed is a contract violation.
    pub fn add_recv_watcher<P>(
        &self,
        fd: RawFd,
        parent: Option<TaskId>,
        f: TaskFn<P>,
        param: P,
    ) -> Result<(), SpawnError>
    where
        P: Copy + Send + 'static,
    {
        self.add_watcher(Opcode::AddRecvWatcher, fd, parent, f, param)
    }

    /// As [`add_recv_watcher`](Self::add_recv_watcher), for writability.
    pub fn add_send_watcher<P>(
        &self,
        fd: RawFd,
        parent: Option<TaskId>,
        f: TaskFn<P>,
        param: P,
    ) -> Result<(), SpawnError>
    where
        P: Copy + Send + 'static,
    {
        self.add_watcher(Opcode::AddSendWatcher, fd, parent, f, param)
    }

    /// A receive watcher with a timeout: `io_f` is spawned if `fd` becomes
    /// readable within `timeout_ms` milliseconds, otherwise `timeout_f` is.
    /// Exactly one of the two runs; both receive `param`.
    pub fn add_timed_recv_watcher<P>(
        &self,
        fd: RawFd,
        timeout_ms: u32,
        parent: Option<TaskId>,
        io_f: TaskFn<P>,
        timeout_f: TaskFn<P>,
        param: P,
    ) -> Result<(), SpawnError>
    where
        P: Copy + Send + 'static,
    {
        self.add_timed_watcher(
            Opcode::AddRecvTimedWatcher,
            fd,
            timeout_ms,
            parent,
            io_f,
            timeout_f,
            param,
        )
    }

    /// As [`add_timed_recv_watcher`](Self::add_timed_recv_watcher), for
    /// writability.
    pub fn add_timed_send_watcher<P>(
        &self,
        fd: RawFd,
        timeout_ms: u32,
        parent: Option<TaskId>,
        io_f: TaskFn<P>,
        timeout_f: TaskFn<P>,
        param: P,
    ) -> Result<(), SpawnError>
    where
        P: Copy + Send + 'static,
    {
        self.add_timed_watcher(
            Opcode::AddSendTimedWatcher,
            fd,
            timeout_ms,
            parent,
            io_f,
            timeout_f,
            param,
        )
    }

    /// Disarms the receive watcher on `fd`, tombstoning its timeout timer
    /// if it was timed. Unknown descriptors are silently ignored.
    pub fn cancel_recv_watcher(&self, fd: RawFd) {
        let mut frame = FrameWriter::new(Opcode::CancelRecvWatcher);
        frame.put_i32(fd);
        self.send(frame.finish());
    }

    /// As [`cancel_recv_watcher`](Self::cancel_recv_watcher), for the send
    /// watcher.
    pub fn cancel_send_watcher(&self, fd: RawFd) {
        let mut frame = FrameWriter::new(Opcode::CancelSendWatcher);
        frame.put_i32(fd);
        self.send(frame.finish());
    }

    // -------------------------------------------------------------------------
    // Internals

    fn add_watcher<P>(
        &self,
        opcode: Opcode,
        fd: RawFd,
        parent: Option<TaskId>,
        f: TaskFn<P>,
        param: P,
    ) -> Result<(), SpawnError>
    where
        P: Copy + Send + 'static,
    {
        let task = ErasedTask::new(f, param)?;

        let mut frame = FrameWriter::new(opcode);
        write_watcher(&mut frame, fd, parent, &task);
        self.send(frame.finish());
        Ok(())
    }

    fn add_timed_watcher<P>(
        &self,
        opcode: Opcode,
        fd: RawFd,
        timeout_ms: u32,
        parent: Option<TaskId>,
        io_f: TaskFn<P>,
        timeout_f: TaskFn<P>,
        param: P,
    ) -> Result<(), SpawnError>
    where
        P: Copy + Send + 'static,
    {
        let io_task = ErasedTask::new(io_f, param)?;
        let timeout_task = ErasedTask::new(timeout_f, param)?;
        let id = self.allocate_timer_id();

        let mut frame = FrameWriter::new(opcode);
        write_watcher(&mut frame, fd, parent, &io_task);
        write_timer(
            &mut frame,
            now_ms() + timeout_ms as u64,
            id,
            parent,
            0,
            &timeout_task,
        );
        self.send(frame.finish());
        Ok(())
    }

    fn allocate_timer_id(&self) -> u32 {
        loop {
            let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn send(&self, frame: &[u8]) {
        let control = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = control.as_ref() {
            // A torn or failed frame would desynchronise the loop for good.
            stream
                .send_all(frame)
                .expect("proactor control channel write failed");
        }
    }
}

impl Drop for Proactor {
    fn drop(&mut self) {
        // Closing the producer half surfaces EOF on the loop's control
        // descriptor; the loop processes the shutdown and its task ends.
        let stream = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(stream);

        self.scheduler.join(self.task);
    }
}

impl core::fmt::Debug for Proactor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Proactor").field("task", &self.task).finish()
    }
}

// -----------------------------------------------------------------------------
// Loop task

#[derive(Clone, Copy)]
struct ReactorPtr(*mut Reactor);

// SAFETY: the pointer is handed to exactly one task, which becomes the sole
// owner of the reactor.
unsafe impl Send for ReactorPtr {}

fn reactor_entry(cx: &TaskContext<'_>, ptr: &ReactorPtr) {
    // SAFETY: `Proactor::new` leaked this box into the task; ownership ends
    // here, and the reactor is dropped when the loop returns.
    let mut reactor = unsafe { Box::from_raw(ptr.0) };
    reactor.run(cx);
}

// -----------------------------------------------------------------------------
// Wire encoding

fn write_timer(
    frame: &mut FrameWriter,
    deadline: u64,
    id: u32,
    parent: Option<TaskId>,
    repeat: u32,
    task: &ErasedTask,
) {
    frame.put_u64(deadline);
    frame.put_u64(task.invoke_bits());
    frame.put_u32(id);
    frame.put_u64(parent.map_or(0, TaskId::to_bits));
    frame.put_u32(repeat);
    frame.put_u8(task.payload().len() as u8);
    frame.put_bytes(task.payload());
}

fn write_watcher(frame: &mut FrameWriter, fd: RawFd, parent: Option<TaskId>, task: &ErasedTask) {
    frame.put_i32(fd);
    frame.put_u64(parent.map_or(0, TaskId::to_bits));
    frame.put_u64(task.invoke_bits());
    frame.put_u8(task.payload().len() as u8);
    frame.put_bytes(task.payload());
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::Proactor;
    use std::io;
    use std::os::fd::AsRawFd;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};
    use ws_os::net::{Stream, socket_pair};
    use ws_os::time::now_ms;
    use ws_task::Scheduler;

    /// Polls `done` for up to `limit_ms`, sleeping between probes.
    fn wait_until(limit_ms: u64, done: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(limit_ms) {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    /// Discards everything currently readable on a nonblocking endpoint.
    fn drain(stream: &Stream) {
        let mut sink = [0u8; 64];
        loop {
            match stream.recv(&mut sink) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => panic!("drain failed: {err}"),
            }
        }
    }

    #[test]
    fn one_shot_timer_fires_after_its_delay() {
        static FIRED_AT: AtomicU64 = AtomicU64::new(0);

        let scheduler = Scheduler::new(4);
        let proactor = Proactor::new(&scheduler, None).unwrap();

        let start = now_ms();
        proactor
            .add_timer(50, 0, None, |_, _: &()| {
                FIRED_AT.store(now_ms(), Ordering::Relaxed);
            }, ())
            .unwrap();

        assert!(wait_until(2_000, || FIRED_AT.load(Ordering::Relaxed) != 0));
        let delay = FIRED_AT.load(Ordering::Relaxed) - start;
        assert!(delay >= 50, "fired early: {delay} ms");
        assert!(delay <= 500, "fired far too late: {delay} ms");
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        static ORDER: Mutex<Vec<u32>> = Mutex::new(Vec::new());

        fn record(_: &ws_task::TaskContext<'_>, label: &u32) {
            ORDER.lock().unwrap().push(*label);
        }

        let scheduler = Scheduler::new(4);
        let proactor = Proactor::new(&scheduler, None).unwrap();

        proactor.add_timer(120, 0, None, record, 1u32).unwrap();
        proactor.add_timer(20, 0, None, record, 2u32).unwrap();
        proactor.add_timer(70, 0, None, record, 3u32).unwrap();

        assert!(wait_until(2_000, || ORDER.lock().unwrap().len() == 3));
        assert_eq!(*ORDER.lock().unwrap(), vec![2, 3, 1]);
    }

    #[test]
    fn repeat_timer_keeps_firing_until_cancelled() {
        static TICKS: AtomicU64 = AtomicU64::new(0);

        let scheduler = Scheduler::new(4);
        let proactor = Proactor::new(&scheduler, None).unwrap();

        let id = proactor
            .add_timer(20, 25, None, |_, _: &()| {
                TICKS.fetch_add(1, Ordering::Relaxed);
            }, ())
            .unwrap();

        thread::sleep(Duration::from_millis(280));
        proactor.cancel_timer(id);

        // ~(280 - 20) / 25 + 1 ≈ 11 in a quiet run; leave slack for CI.
        let ticks = TICKS.load(Ordering::Relaxed);
        assert!((2..=15).contains(&ticks), "unexpected tick count {ticks}");

        thread::sleep(Duration::from_millis(120));
        let after = TICKS.load(Ordering::Relaxed);
        assert!(after <= ticks + 1, "cancel did not stop the timer");
    }

    #[test]
    fn update_timer_reschedules() {
        static FIRED: AtomicU64 = AtomicU64::new(0);

        let scheduler = Scheduler::new(4);
        let proactor = Proactor::new(&scheduler, None).unwrap();

        let id = proactor
            .add_timer(600_000, 0, None, |_, _: &()| {
                FIRED.store(1, Ordering::Relaxed);
            }, ())
            .unwrap();
        proactor.update_timer(id, 30, 0);

        assert!(wait_until(2_000, || FIRED.load(Ordering::Relaxed) != 0));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        static FIRED: AtomicU64 = AtomicU64::new(0);

        let scheduler = Scheduler::new(4);
        let proactor = Proactor::new(&scheduler, None).unwrap();

        let id = proactor
            .add_timer(80, 0, None, |_, _: &()| {
                FIRED.store(1, Ordering::Relaxed);
            }, ())
            .unwrap();
        proactor.cancel_timer(id);

        thread::sleep(Duration::from_millis(250));
        assert_eq!(FIRED.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn recv_watcher_fires_on_data() {
        static GOT: AtomicU64 = AtomicU64::new(0);

        let scheduler = Scheduler::new(4);
        let (tx, rx) = socket_pair().unwrap();
        let proactor = Proactor::new(&scheduler, None).unwrap();

        proactor
            .add_recv_watcher(rx.as_raw_fd(), None, |_, _: &()| {
                GOT.fetch_add(1, Ordering::Relaxed);
            }, ())
            .unwrap();

        tx.send_all(b"!").unwrap();
        assert!(wait_until(2_000, || GOT.load(Ordering::Relaxed) == 1));

        // One shot: no refire without rearming.
        thread::sleep(Duration::from_millis(80));
        assert_eq!(GOT.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn cancelled_watcher_never_fires() {
        static GOT: AtomicU64 = AtomicU64::new(0);

        let scheduler = Scheduler::new(4);
        let (tx, rx) = socket_pair().unwrap();
        let proactor = Proactor::new(&scheduler, None).unwrap();

        proactor
            .add_recv_watcher(rx.as_raw_fd(), None, |_, _: &()| {
                GOT.fetch_add(1, Ordering::Relaxed);
            }, ())
            .unwrap();
        proactor.cancel_recv_watcher(rx.as_raw_fd());

        thread::sleep(Duration::from_millis(50));
        tx.send_all(b"!").unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(GOT.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn timed_watcher_exactly_one_side_fires() {
        static IO: AtomicU64 = AtomicU64::new(0);
        static TIMEOUT: AtomicU64 = AtomicU64::new(0);

        fn io_side(_: &ws_task::TaskContext<'_>, _: &()) {
            IO.fetch_add(1, Ordering::Relaxed);
        }
        fn timeout_side(_: &ws_task::TaskContext<'_>, _: &()) {
            TIMEOUT.fetch_add(1, Ordering::Relaxed);
        }

        let scheduler = Scheduler::new(4);
        let (tx, rx) = socket_pair().unwrap();
        let proactor = Proactor::new(&scheduler, None).unwrap();

        let rounds = 30u64;
        for round in 0..rounds {
            drain(&rx);
            let io_wins = round % 2 == 0;
            let before_io = IO.load(Ordering::Relaxed);

            // A generous timeout when the data side should win keeps the
            // race one-sided even on a stalled CI machine.
            let timeout_ms = if io_wins { 2_000 } else { 25 };
            proactor
                .add_timed_recv_watcher(
                    rx.as_raw_fd(),
                    timeout_ms,
                    None,
                    io_side,
                    timeout_side,
                    (),
                )
                .unwrap();

            if io_wins {
                tx.send_all(b"x").unwrap();
            }

            assert!(
                wait_until(3_000, || {
                    IO.load(Ordering::Relaxed) + TIMEOUT.load(Ordering::Relaxed) == round + 1
                }),
                "round {round} never resolved",
            );
            assert_eq!(
                IO.load(Ordering::Relaxed) == before_io + 1,
                io_wins,
                "wrong side fired in round {round}",
            );
        }

        // Let any stray loser surface, then check exclusivity held.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(IO.load(Ordering::Relaxed) + TIMEOUT.load(Ordering::Relaxed), rounds);
    }

    #[test]
    fn shutdown_with_live_watchers_exits_cleanly() {
        static GOT: AtomicU64 = AtomicU64::new(0);

        let scheduler = Scheduler::new(4);
        let (tx, rx) = socket_pair().unwrap();
        let proactor = Proactor::new(&scheduler, None).unwrap();

        proactor
            .add_recv_watcher(rx.as_raw_fd(), None, |_, _: &()| {
                GOT.fetch_add(1, Ordering::Relaxed);
            }, ())
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        drop(proactor);

        // The loop is gone; nothing fires even if data arrives now.
        tx.send_all(b"!").unwrap();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(GOT.load(Ordering::Relaxed), 0);
    }
}
