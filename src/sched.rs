//! Single-threaded timer queue driven by the host's monotonic clock.
//!
//! Nothing here sleeps or spawns. The host pumps [`Scheduler::pop_due`]
//! with the current time and dispatches whatever comes out; the virtual
//! clock jumps to each task's due time so handlers observe the instant
//! they were scheduled for, not the instant the host got around to them.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::util::pool::{Pool, SlotId};

/// Milliseconds on the engine's monotonic clock.
pub type Millis = u64;

/// Cancel token for a scheduled task. Cheap to copy; stale handles are
/// harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(SlotId);

struct Entry<T> {
    due: Millis,
    task: T,
}

pub struct Scheduler<T> {
    now: Millis,
    tasks: Pool<Entry<T>>,
    /// (due, sequence, slot). Cancelled slots stay here until popped.
    queue: BinaryHeap<Reverse<(Millis, u64, SlotId)>>,
    seq: u64,
}

impl<T> Scheduler<T> {
    pub fn new(start: Millis) -> Self {
        Self {
            now: start,
            tasks: Pool::with_capacity(16),
            queue: BinaryHeap::with_capacity(16),
            seq: 0,
        }
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn schedule_in(&mut self, delay: Millis, task: T) -> TaskHandle {
        self.schedule_at(self.now.saturating_add(delay), task)
    }

    /// Schedule at an absolute time. Times in the past fire on the next pump.
    pub fn schedule_at(&mut self, due: Millis, task: T) -> TaskHandle {
        let due = due.max(self.now);
        let id = self.tasks.alloc(Entry { due, task });
        self.queue.push(Reverse((due, self.seq, id)));
        self.seq += 1;
        TaskHandle(id)
    }

    /// Cancel a task. Returns whether anything was actually pending; calling
    /// it on a fired or already-cancelled handle is a no-op.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.tasks.free(handle.0).is_some()
    }

    /// Take the handle out of `slot` and cancel it.
    pub fn cancel_slot(&mut self, slot: &mut Option<TaskHandle>) -> bool {
        match slot.take() {
            Some(handle) => self.cancel(handle),
            None => false,
        }
    }

    pub fn is_scheduled(&self, handle: TaskHandle) -> bool {
        self.tasks.contains(handle.0)
    }

    /// Remove and return the earliest task due at or before `until`. Ties
    /// fire in scheduling order.
    pub fn pop_due(&mut self, until: Millis) -> Option<(TaskHandle, T)> {
        loop {
            let Reverse((due, _, id)) = *self.queue.peek()?;
            if due > until {
                return None;
            }
            self.queue.pop();
            if let Some(entry) = self.tasks.free(id) {
                self.now = self.now.max(entry.due);
                return Some((TaskHandle(id), entry.task));
            }
        }
    }

    pub fn advance_to(&mut self, until: Millis) {
        self.now = self.now.max(until);
    }

    /// Due time of the earliest live task. Drops cancelled entries it meets.
    pub fn next_due(&mut self) -> Option<Millis> {
        while let Some(Reverse((due, _, id))) = self.queue.peek().copied() {
            if self.tasks.contains(id) {
                return Some(due);
            }
            self.queue.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_due_then_schedule_order() {
        let mut sched = Scheduler::new(0);
        sched.schedule_in(20, "late");
        sched.schedule_in(10, "first");
        sched.schedule_in(10, "second");

        let order: Vec<_> = std::iter::from_fn(|| sched.pop_due(100).map(|(_, t)| t)).collect();
        assert_eq!(order, vec!["first", "second", "late"]);
        assert_eq!(sched.now(), 20);
    }

    #[test]
    fn clock_jumps_to_each_due_time() {
        let mut sched = Scheduler::new(1_000);
        sched.schedule_in(500, ());
        assert!(sched.pop_due(1_200).is_none());
        assert!(sched.pop_due(5_000).is_some());
        assert_eq!(sched.now(), 1_500);
        sched.advance_to(5_000);
        assert_eq!(sched.now(), 5_000);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut sched = Scheduler::new(0);
        let handle = sched.schedule_in(10, ());
        assert!(sched.cancel(handle));
        assert!(!sched.cancel(handle));
        assert!(!sched.is_scheduled(handle));
        assert!(sched.pop_due(100).is_none());
        assert_eq!(sched.next_due(), None);

        let mut slot = None;
        assert!(!sched.cancel_slot(&mut slot));
    }

    #[test]
    fn fired_handle_cannot_cancel_its_successor() {
        let mut sched = Scheduler::new(0);
        let old = sched.schedule_in(10, 1);
        let (fired, _) = sched.pop_due(10).unwrap();
        assert_eq!(fired, old);

        let fresh = sched.schedule_in(10, 2);
        assert!(!sched.cancel(old));
        assert!(sched.is_scheduled(fresh));
        assert_eq!(sched.pop_due(19), None);
        assert_eq!(sched.pop_due(20), Some((fresh, 2)));
    }
}
