#![expect(unsafe_code, reason = "wire payloads are rebuilt into erased tasks")]

//! The event loop.
//!
//! The reactor runs as one ordinary task and owns every piece of its state;
//! the only way in is the framed command channel. Each round it fires due
//! timers (earliest first, from the tail of the timer table), sleeps in the
//! multiplexer until the next deadline or a readiness event, then drains
//! the control channel and fires ready watchers. Work leaves the reactor
//! solely as freshly spawned tasks.

use std::io;

use log::{debug, warn};

use ws_os::net::Stream;
use ws_os::poll::{Events, poll};
use ws_os::time::now_ms;
use ws_task::{ErasedTask, TaskContext, TaskId};

use crate::channel::{CONTROL_BUF, FRAME_MAX, FrameReader, Opcode};
use crate::timer::{Timer, TimerTable};
use crate::watcher::{Direction, PollSet, Watcher};

// -----------------------------------------------------------------------------
// Reactor

pub(crate) struct Reactor {
    /// The consumer half of the control channel (nonblocking).
    control: Stream,
    timers: TimerTable,
    set: PollSet,
    buf: [u8; CONTROL_BUF],
    filled: usize,
}

impl Reactor {
    pub(crate) fn new(control: Stream) -> Self {
        use std::os::fd::AsRawFd;

        let control_fd = control.as_raw_fd();
        Self {
            control,
            timers: TimerTable::new(),
            set: PollSet::new(control_fd),
            buf: [0u8; CONTROL_BUF],
            filled: 0,
        }
    }

    /// The loop. Returns when the producer half of the control channel has
    /// closed and the shutdown has been processed.
    pub(crate) fn run(&mut self, cx: &TaskContext<'_>) {
        debug!("proactor event loop started");
        while !self.set.is_empty() {
            let now = now_ms();
            self.fire_due_timers(cx, now);

            let timeout = match self.timers.next_deadline() {
                // Remaining deadlines are strictly in the future.
                Some(deadline) => (deadline - now).min(i32::MAX as u64) as i32,
                None => -1,
            };

            let ready = self.poll_set(timeout);
            if ready > 0 {
                self.dispatch(cx, ready);
            }
        }
        debug!("proactor event loop stopped");
    }

    // -------------------------------------------------------------------------
    // Timers

    fn fire_due_timers(&mut self, cx: &TaskContext<'_>, now: u64) {
        while let Some(mut timer) = self.timers.pop_due(now) {
            self.submit(cx, timer.parent, &timer.task);

            if let Some((fd, direction)) = timer.watcher {
                // The timeout won the race; the watcher must not fire too.
                self.set.cancel(fd, direction);
            }

            if timer.repeat != 0 {
                timer.deadline = now + timer.repeat as u64;
                self.timers.insert(timer);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Polling

    fn poll_set(&mut self, timeout: i32) -> usize {
        for fd in self.set.fds_mut() {
            fd.clear_revents();
        }

        let mut range = self.set.len();
        loop {
            match poll(&mut self.set.fds_mut()[..range], timeout) {
                Ok(n) => return n,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue;
                }
                // Transient kernel memory pressure: retry over half the set.
                Err(err) if is_out_of_memory(&err) && range > 1 => {
                    range /= 2;
                }
                Err(err) => panic!("poll failed: {err}"),
            }
        }
    }

    fn dispatch(&mut self, cx: &TaskContext<'_>, mut ready: usize) {
        let mut at = 0;
        while at < self.set.len() && ready > 0 {
            let revents = self.set.revents(at);
            if revents.is_empty() {
                at += 1;
                continue;
            }
            ready -= 1;

            if at == 0 {
                self.drain_control();
                if self.set.is_empty() {
                    // Shutdown processed.
                    return;
                }
                at += 1;
                continue;
            }

            if !self.fire_ready_watchers(cx, at, revents) {
                at += 1;
            }
            // On removal the tail entry was swapped into `at`; look at it
            // again. Level-triggered polling catches anything missed here
            // on the next round.
        }
    }

    /// Fires the armed-and-ready directions of the entry at `at`. Returns
    /// whether the entry was removed.
    fn fire_ready_watchers(&mut self, cx: &TaskContext<'_>, at: usize, revents: Events) -> bool {
        for direction in [Direction::Recv, Direction::Send] {
            let armed = self.set.events(at).contains(direction.interest());
            if armed && revents.intersects(direction.ready_mask()) {
                if let Some(watcher) = self.set.disarm(at, direction) {
                    self.submit(cx, watcher.parent, &watcher.task);
                    if let Some(timer_id) = watcher.timer {
                        // The I/O won the race; the timeout must not fire.
                        self.timers.cancel(timer_id);
                    }
                }
            }
        }
        self.set.remove_if_idle(at)
    }

    // -------------------------------------------------------------------------
    // Control channel

    fn drain_control(&mut self) {
        loop {
            let read = match self.control.recv(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    // Producer half closed: shut down.
                    assert!(self.filled == 0, "control channel closed mid-frame");
                    let live = self.set.watcher_count();
                    if live > 0 {
                        warn!("proactor shutting down with {live} armed watchers");
                    }
                    self.set.clear();
                    return;
                }
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => panic!("control channel read failed: {err}"),
            };

            self.filled += read;
            self.process_frames();
        }
    }

    fn process_frames(&mut self) {
        let mut pos = 0;
        while pos + 2 <= self.filled {
            let len = self.buf[pos + 1] as usize;
            assert!(len >= 2, "malformed control frame");
            if pos + len > self.filled {
                break;
            }

            let opcode = match Opcode::from_u8(self.buf[pos]) {
                Some(opcode) => opcode,
                None => panic!("unknown control opcode {}", self.buf[pos]),
            };

            // Detach the payload from the read buffer so handlers can
            // borrow the rest of the reactor freely.
            let mut frame = [0u8; FRAME_MAX];
            frame[..len - 2].copy_from_slice(&self.buf[pos + 2..pos + len]);
            self.handle_command(opcode, &frame[..len - 2]);

            pos += len;
        }

        if pos > 0 {
            self.buf.copy_within(pos..self.filled, 0);
            self.filled -= pos;
        }
    }

    fn handle_command(&mut self, opcode: Opcode, payload: &[u8]) {
        let mut reader = FrameReader::new(payload);
        match opcode {
            Opcode::AddTimer => {
                let timer = read_timer(&mut reader);
                self.timers.insert(timer);
            }
            Opcode::CancelTimer => {
                let id = reader.u32();
                self.timers.cancel(id);
            }
            Opcode::UpdateTimer => {
                let id = reader.u32();
                let deadline = reader.u64();
                let repeat = reader.u32();
                self.timers.update(id, deadline, repeat);
            }
            Opcode::AddRecvWatcher => self.add_watcher(&mut reader, Direction::Recv),
            Opcode::AddSendWatcher => self.add_watcher(&mut reader, Direction::Send),
            Opcode::AddRecvTimedWatcher => {
                self.add_timed_watcher(&mut reader, Direction::Recv);
            }
            Opcode::AddSendTimedWatcher => {
                self.add_timed_watcher(&mut reader, Direction::Send);
            }
            Opcode::CancelRecvWatcher => self.cancel_watcher(&mut reader, Direction::Recv),
            Opcode::CancelSendWatcher => self.cancel_watcher(&mut reader, Direction::Send),
        }
    }

    fn add_watcher(&mut self, reader: &mut FrameReader<'_>, direction: Direction) {
        let (fd, watcher) = read_watcher(reader);
        self.set.arm(fd, direction, watcher);
    }

    fn add_timed_watcher(&mut self, reader: &mut FrameReader<'_>, direction: Direction) {
        let (fd, mut watcher) = read_watcher(reader);
        let mut timer = read_timer(reader);

        // Cross-link so whichever side fires first neutralises the other.
        timer.watcher = Some((fd, direction));
        watcher.timer = Some(timer.id);

        self.set.arm(fd, direction, watcher);
        self.timers.insert(timer);
    }

    fn cancel_watcher(&mut self, reader: &mut FrameReader<'_>, direction: Direction) {
        let fd = reader.i32();
        if let Some(watcher) = self.set.cancel(fd, direction) {
            if let Some(timer_id) = watcher.timer {
                self.timers.cancel(timer_id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Submission

    fn submit(&self, cx: &TaskContext<'_>, parent: Option<TaskId>, task: &ErasedTask) {
        if let Err(err) = cx.spawn_erased(parent, task) {
            // A stale parent means that subtree already completed; the
            // registration is dropped, matching a cancel that arrived late.
            warn!("proactor dropped a task: {err}");
        }
    }
}

// -----------------------------------------------------------------------------
// Wire parsing

fn read_timer(reader: &mut FrameReader<'_>) -> Timer {
    let deadline = reader.u64();
    let invoke = reader.u64();
    let id = reader.u32();
    let parent = TaskId::from_bits(reader.u64());
    let repeat = reader.u32();
    let len = reader.u8() as usize;
    let payload = reader.bytes(len);

    // SAFETY: the producer side of this process encoded these from a live
    // `ErasedTask`.
    let task = unsafe { ErasedTask::from_raw_parts(invoke, payload) };

    Timer {
        deadline,
        id,
        repeat,
        parent,
        task,
        watcher: None,
    }
}

fn read_watcher(reader: &mut FrameReader<'_>) -> (i32, Watcher) {
    let fd = reader.i32();
    let parent = TaskId::from_bits(reader.u64());
    let invoke = reader.u64();
    let len = reader.u8() as usize;
    let payload = reader.bytes(len);

    // SAFETY: as in `read_timer`.
    let task = unsafe { ErasedTask::from_raw_parts(invoke, payload) };

    (
        fd,
        Watcher {
            parent,
            task,
            timer: None,
        },
    )
}

fn is_out_of_memory(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENOMEM) | Some(libc::ENOBUFS)
    )
}
