//! The loop's timer table.
//!
//! Timers sit in a vector kept in *descending* deadline order, so the
//! earliest-due timer is at the tail and firing it is a pop. Insertion is a
//! binary search plus a shift; the table is owned by the loop alone, so
//! nothing here is synchronised. Timers reference the watcher they guard by
//! descriptor and direction, never by position, which keeps reordering
//! trivial.

use std::os::fd::RawFd;

use ws_task::{ErasedTask, TaskId};

use crate::watcher::Direction;

// -----------------------------------------------------------------------------
// Timer

pub(crate) struct Timer {
    /// Absolute due time, monotonic milliseconds. Never zero.
    pub(crate) deadline: u64,
    /// The producer-allocated stable id. Never zero.
    pub(crate) id: u32,
    /// Repeat period in milliseconds; zero for one-shot.
    pub(crate) repeat: u32,
    /// Parent for the submitted task.
    pub(crate) parent: Option<TaskId>,
    /// The task to submit on fire.
    pub(crate) task: ErasedTask,
    /// The timed watcher this timer guards, if any. When the timer wins the
    /// race, that watcher is disarmed.
    pub(crate) watcher: Option<(RawFd, Direction)>,
}

// -----------------------------------------------------------------------------
// TimerTable

pub(crate) struct TimerTable {
    /// Descending by deadline; the earliest-due timer is last.
    timers: Vec<Timer>,
}

impl TimerTable {
    pub(crate) fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Inserts in deadline order. Among equal deadlines the newcomer lands
    /// farther from the tail, so existing timers fire first.
    pub(crate) fn insert(&mut self, timer: Timer) {
        let at = self
            .timers
            .partition_point(|t| t.deadline > timer.deadline);
        self.timers.insert(at, timer);
    }

    /// Removes and returns the timer with `id`. Unknown ids — already
    /// fired, already cancelled — are a quiet no-op.
    pub(crate) fn cancel(&mut self, id: u32) -> Option<Timer> {
        let at = self.timers.iter().position(|t| t.id == id)?;
        Some(self.timers.remove(at))
    }

    /// Re-deadlines the timer with `id`. Unknown ids are a quiet no-op.
    pub(crate) fn update(&mut self, id: u32, deadline: u64, repeat: u32) {
        if let Some(mut timer) = self.cancel(id) {
            timer.deadline = deadline;
            timer.repeat = repeat;
            self.insert(timer);
        }
    }

    /// The earliest deadline, if any timer is pending.
    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.timers.last().map(|t| t.deadline)
    }

    /// Pops the earliest-due timer if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: u64) -> Option<Timer> {
        if self.timers.last()?.deadline <= now {
            self.timers.pop()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Timer, TimerTable};
    use ws_task::ErasedTask;

    fn timer(id: u32, deadline: u64) -> Timer {
        Timer {
            deadline,
            id,
            repeat: 0,
            parent: None,
            task: ErasedTask::new(|_, _: &()| {}, ()).unwrap(),
            watcher: None,
        }
    }

    #[test]
    fn pops_in_deadline_order() {
        let mut table = TimerTable::new();
        table.insert(timer(1, 60));
        table.insert(timer(2, 20));
        table.insert(timer(3, 40));

        assert_eq!(table.next_deadline(), Some(20));
        assert_eq!(table.pop_due(100).unwrap().id, 2);
        assert_eq!(table.pop_due(100).unwrap().id, 3);
        assert_eq!(table.pop_due(100).unwrap().id, 1);
        assert!(table.pop_due(100).is_none());
    }

    #[test]
    fn due_respects_now() {
        let mut table = TimerTable::new();
        table.insert(timer(1, 50));
        assert!(table.pop_due(49).is_none());
        assert!(table.pop_due(50).is_some());
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut table = TimerTable::new();
        table.insert(timer(1, 30));
        table.insert(timer(2, 30));
        table.insert(timer(3, 30));

        assert_eq!(table.pop_due(30).unwrap().id, 1);
        assert_eq!(table.pop_due(30).unwrap().id, 2);
        assert_eq!(table.pop_due(30).unwrap().id, 3);
    }

    #[test]
    fn cancel_unknown_is_ignored() {
        let mut table = TimerTable::new();
        table.insert(timer(1, 10));
        assert!(table.cancel(99).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn update_moves_the_deadline() {
        let mut table = TimerTable::new();
        table.insert(timer(1, 500));
        table.insert(timer(2, 100));

        table.update(1, 10, 0);
        assert_eq!(table.pop_due(50).unwrap().id, 1);
        assert_eq!(table.next_deadline(), Some(100));
    }
}
