//! The loop's readiness watchers.
//!
//! One [`PollSet`] entry per watched descriptor, with up to two watchers
//! (receive and send) riding on it; the poll-fd array and the watcher array
//! stay parallel. Index 0 is the control channel and never carries
//! watchers. Entries whose directions are both disarmed are removed by
//! swapping with the last entry — timers reference watchers by descriptor
//! and direction, so nothing dangles.

use std::os::fd::RawFd;

use ws_os::poll::{Events, PollFd};
use ws_task::{ErasedTask, TaskId};

// -----------------------------------------------------------------------------
// Direction

/// Which readiness a watcher is armed for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Direction {
    Recv,
    Send,
}

impl Direction {
    /// The poll bit this direction arms.
    pub(crate) fn interest(self) -> Events {
        match self {
            Self::Recv => Events::IN,
            Self::Send => Events::OUT,
        }
    }

    /// The reported bits that count as "fire". Errors and hangups wake the
    /// receive side so it can observe the failure with a read.
    pub(crate) fn ready_mask(self) -> Events {
        match self {
            Self::Recv => Events::IN.union(Events::ERR).union(Events::HUP),
            Self::Send => Events::OUT.union(Events::ERR),
        }
    }
}

// -----------------------------------------------------------------------------
// Watcher

pub(crate) struct Watcher {
    /// Parent for the submitted task.
    pub(crate) parent: Option<TaskId>,
    /// The task to submit on readiness.
    pub(crate) task: ErasedTask,
    /// The timeout timer guarding this watcher, if any. When the watcher
    /// wins the race, that timer is cancelled.
    pub(crate) timer: Option<u32>,
}

#[derive(Default)]
struct WatcherPair {
    recv: Option<Watcher>,
    send: Option<Watcher>,
}

impl WatcherPair {
    fn slot(&mut self, direction: Direction) -> &mut Option<Watcher> {
        match direction {
            Direction::Recv => &mut self.recv,
            Direction::Send => &mut self.send,
        }
    }
}

// -----------------------------------------------------------------------------
// PollSet

pub(crate) struct PollSet {
    fds: Vec<PollFd>,
    watchers: Vec<WatcherPair>,
}

impl PollSet {
    /// A fresh set watching only the control descriptor.
    pub(crate) fn new(control: RawFd) -> Self {
        Self {
            fds: vec![PollFd::new(control, Events::IN)],
            watchers: vec![WatcherPair::default()],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.fds.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// The poll-fd array, for handing to the multiplexer.
    pub(crate) fn fds_mut(&mut self) -> &mut [PollFd] {
        &mut self.fds
    }

    pub(crate) fn events(&self, at: usize) -> Events {
        self.fds[at].events()
    }

    pub(crate) fn revents(&self, at: usize) -> Events {
        self.fds[at].revents()
    }

    /// Arms `direction` on `fd`, adding a poll entry if the descriptor is
    /// new.
    ///
    /// # Panics
    ///
    /// Panics if that direction is already armed on `fd`; double-arming is
    /// a caller contract violation.
    pub(crate) fn arm(&mut self, fd: RawFd, direction: Direction, watcher: Watcher) {
        let at = match self.find(fd) {
            Some(at) => at,
            None => {
                self.fds.push(PollFd::new(fd, Events::empty()));
                self.watchers.push(WatcherPair::default());
                self.fds.len() - 1
            }
        };

        let armed = self.fds[at].events();
        assert!(
            !armed.contains(direction.interest()),
            "fd {fd} already has a {direction:?} watcher armed",
        );
        self.fds[at].set_events(armed | direction.interest());
        *self.watchers[at].slot(direction) = Some(watcher);
    }

    /// Clears `direction` on the entry at `at` and takes its watcher. The
    /// entry itself stays; pair with [`remove_if_idle`](Self::remove_if_idle).
    pub(crate) fn disarm(&mut self, at: usize, direction: Direction) -> Option<Watcher> {
        let armed = self.fds[at].events();
        self.fds[at].set_events(armed.difference(direction.interest()));
        self.watchers[at].slot(direction).take()
    }

    /// Swap-removes the entry at `at` if nothing is armed on it any more.
    /// Returns whether it was removed.
    pub(crate) fn remove_if_idle(&mut self, at: usize) -> bool {
        if !self.fds[at].events().is_empty() {
            return false;
        }
        self.fds.swap_remove(at);
        self.watchers.swap_remove(at);
        true
    }

    /// Disarms `direction` on `fd` and removes the entry if idle. Unknown
    /// descriptors and unarmed directions are a quiet no-op.
    pub(crate) fn cancel(&mut self, fd: RawFd, direction: Direction) -> Option<Watcher> {
        let at = self.find(fd)?;
        if !self.fds[at].events().contains(direction.interest()) {
            return None;
        }
        let watcher = self.disarm(at, direction);
        self.remove_if_idle(at);
        watcher
    }

    /// Drops everything, control entry included. Shutdown only.
    pub(crate) fn clear(&mut self) {
        self.fds.clear();
        self.watchers.clear();
    }

    /// How many watchers are currently armed.
    pub(crate) fn watcher_count(&self) -> usize {
        self.watchers
            .iter()
            .map(|pair| pair.recv.is_some() as usize + pair.send.is_some() as usize)
            .sum()
    }

    fn find(&self, fd: RawFd) -> Option<usize> {
        (1..self.fds.len()).find(|&at| self.fds[at].fd() == fd)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Direction, PollSet, Watcher};
    use ws_os::poll::Events;
    use ws_task::ErasedTask;

    fn watcher() -> Watcher {
        Watcher {
            parent: None,
            task: ErasedTask::new(|_, _: &()| {}, ()).unwrap(),
            timer: None,
        }
    }

    #[test]
    fn arms_both_directions_on_one_entry() {
        let mut set = PollSet::new(0);
        set.arm(7, Direction::Recv, watcher());
        set.arm(7, Direction::Send, watcher());

        assert_eq!(set.len(), 2);
        assert_eq!(set.events(1), Events::IN | Events::OUT);
        assert_eq!(set.watcher_count(), 2);
    }

    #[test]
    #[should_panic(expected = "already has")]
    fn double_arm_is_rejected() {
        let mut set = PollSet::new(0);
        set.arm(7, Direction::Recv, watcher());
        set.arm(7, Direction::Recv, watcher());
    }

    #[test]
    fn cancel_removes_idle_entries() {
        let mut set = PollSet::new(0);
        set.arm(7, Direction::Recv, watcher());
        set.arm(8, Direction::Send, watcher());
        assert_eq!(set.len(), 3);

        assert!(set.cancel(7, Direction::Recv).is_some());
        assert_eq!(set.len(), 2);

        // 8 swapped into 7's place; still armed.
        assert!(set.cancel(8, Direction::Send).is_some());
        assert_eq!(set.len(), 1);
        assert_eq!(set.watcher_count(), 0);
    }

    #[test]
    fn cancel_unknown_is_ignored() {
        let mut set = PollSet::new(0);
        assert!(set.cancel(99, Direction::Recv).is_none());
        set.arm(7, Direction::Recv, watcher());
        assert!(set.cancel(7, Direction::Send).is_none());
        assert_eq!(set.len(), 2);
    }
}
