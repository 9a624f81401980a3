//! Ready queues and the scheduling-point selection rule.

use std::collections::VecDeque;

use abi::{Priority, ThreadId};

/// Four genuine FIFO queues, one per priority band. Kept as real queues
/// (rather than a scan over the whole thread table) so that "enqueue order
/// equals dequeue order" holds unconditionally for threads of equal
/// priority.
#[derive(Default)]
pub struct ReadyQueues {
    high: VecDeque<ThreadId>,
    normal: VecDeque<ThreadId>,
    low: VecDeque<ThreadId>,
    idle: VecDeque<ThreadId>,
}

impl ReadyQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, priority: Priority, id: ThreadId) {
        self.queue_mut(priority).push_back(id);
    }

    fn queue_mut(&mut self, priority: Priority) -> &mut VecDeque<ThreadId> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
            Priority::Idle => &mut self.idle,
        }
    }

    /// Pops the head of the highest-priority non-empty queue. `Priority`'s
    /// `ALL` is already ordered HIGH..IDLE, so the first hit wins.
    pub fn pop_front_highest(&mut self) -> Option<(Priority, ThreadId)> {
        for &priority in Priority::ALL.iter() {
            if let Some(id) = self.queue_mut(priority).pop_front() {
                return Some((priority, id));
            }
        }
        None
    }

    /// Like `pop_front_highest`, but leaves the queue untouched. Used to
    /// decide who *would* run next without committing to the switch --
    /// popping unconditionally and pushing the candidate back on a decline
    /// would rotate it behind other same-priority threads it arrived ahead
    /// of.
    pub fn peek_front_highest(&self) -> Option<(Priority, ThreadId)> {
        for &priority in Priority::ALL.iter() {
            if let Some(&id) = self.queue(priority).front() {
                return Some((priority, id));
            }
        }
        None
    }

    fn queue(&self, priority: Priority) -> &VecDeque<ThreadId> {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
            Priority::Idle => &self.idle,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty() && self.low.is_empty() && self.idle.is_empty()
    }

    /// Removes `id` from whichever queue it's sitting in, if any. Used when
    /// a ready thread is deleted out from under the scheduler.
    pub fn remove(&mut self, id: ThreadId) {
        for &priority in Priority::ALL.iter() {
            self.queue_mut(priority).retain(|&x| x != id);
        }
    }
}

/// The next-thread selection rule, given the current candidates. Returns the
/// thread that *would* run next along with its priority, or `None` if
/// nothing is runnable (which should only happen before the idle thread is
/// created). Non-mutating: the caller decides whether a switch actually
/// happens before removing the candidate from wherever it came from.
///
/// 1. If `memory_waiter` is `Some` (a thread waits on memory and a section
///    is free), it is selected outright.
/// 2. Otherwise the head of the highest non-empty ready queue wins.
pub fn select_next(
    memory_waiter: Option<(Priority, ThreadId)>,
    ready: &ReadyQueues,
) -> Option<(Priority, ThreadId)> {
    memory_waiter.or_else(|| ready.peek_front_highest())
}

/// Decides whether a just-selected candidate should preempt the thread
/// presently RUNNING.
///
/// `current` is `None` when the running thread is leaving RUNNING
/// voluntarily (it moved to WAITING or DEAD) -- in that case a switch
/// always happens, by construction of the caller. When `current` is
/// `Some`, the candidate only preempts if it is strictly more important;
/// equal priority never preempts (ties let the running thread keep going,
/// and in particular stop the idle thread from being preempted by another
/// idle-priority thread).
pub fn should_preempt(candidate: Priority, current: Option<Priority>) -> bool {
    match current {
        None => true,
        Some(running) => candidate.is_more_important_than(running),
    }
}
