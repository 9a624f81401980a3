//! The thread table: per-thread state, lifecycle, and the small
//! `NextThread` hint type used to thread scheduling decisions back up
//! through the call stack.

use abi::{MutexId, Priority, ThreadId};

/// A guest thread's entry point. Takes a single opaque argument, the way
/// the machine's `context_create` primitive expects it; the runtime never
/// inspects or dereferences `arg`; it is round-tripped to the machine
/// layer verbatim.
pub type ThreadEntry = fn(usize);

/// How long a thread blocked on a mutex is willing to wait, as recorded on
/// the `WaitingForMutex` state variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MutexTimeout {
    Infinite,
    Ticks(u32),
}

/// Per-thread finite-state machine. Unlike a flat `enum` status plus
/// free-floating counters, each blocking reason carries exactly the data it
/// needs and no other variant can see it -- a sleeping thread has no mutex
/// timeout to misread, a mutex waiter has no sleep counter to forget to
/// clear.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// Never activated, or terminated and not yet deleted.
    Dead,
    /// Present in a ready queue, eligible for selection.
    Ready,
    /// The single thread currently executing.
    Running,
    /// Blocked in `Sleep`, counting down to zero.
    Sleeping { ticks_remaining: u32 },
    /// Blocked in `MutexAcquire`.
    WaitingForMutex {
        mutex: MutexId,
        timeout: MutexTimeout,
    },
    /// Blocked waiting for a free shared-memory section.
    WaitingForMemory,
    /// Blocked waiting for a machine I/O callback to fire.
    WaitingForIo,
}

impl Default for ThreadState {
    fn default() -> Self {
        ThreadState::Dead
    }
}

/// In-memory thread record. `C` is the machine's opaque saved-context type:
/// the runtime stores it but never looks inside.
#[derive(Debug)]
pub struct Thread<C> {
    pub priority: Priority,
    pub state: ThreadState,
    /// Mutexes currently owned by this thread. Termination must release
    /// all of them.
    pub owned_mutexes: Vec<MutexId>,
    pub entry: ThreadEntry,
    pub arg: usize,
    pub stack_size: usize,
    /// `None` until the thread is activated for the first time.
    pub context: Option<C>,
}

impl<C> Thread<C> {
    pub fn new(priority: Priority, entry: ThreadEntry, arg: usize, stack_size: usize) -> Self {
        Thread {
            priority,
            state: ThreadState::Dead,
            owned_mutexes: Vec::new(),
            entry,
            arg,
            stack_size,
            context: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.state, ThreadState::Dead)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ThreadState::Ready)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ThreadState::Running)
    }
}

/// Dense table of thread records, indexed by `ThreadId`. Identities are
/// never reused within a run: deleting a thread tombstones its slot rather
/// than freeing the index for reuse, so a stale `ThreadId` reliably reads
/// back as "doesn't exist" instead of aliasing a later thread.
#[derive(Default)]
pub struct ThreadTable<C> {
    threads: Vec<Option<Thread<C>>>,
}

impl<C> ThreadTable<C> {
    pub fn new() -> Self {
        ThreadTable {
            threads: Vec::new(),
        }
    }

    pub fn insert(&mut self, thread: Thread<C>) -> ThreadId {
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(Some(thread));
        id
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread<C>> {
        self.threads.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread<C>> {
        self.threads.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.get(id).is_some()
    }

    /// Tombstones `id`'s slot. The stack and context are dropped with it.
    pub fn remove(&mut self, id: ThreadId) {
        if let Some(slot) = self.threads.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &Thread<C>)> {
        self.threads
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|t| (ThreadId(i as u32), t)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ThreadId, &mut Thread<C>)> {
        self.threads
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|t| (ThreadId(i as u32), t)))
    }
}

/// Return value for operations that can have scheduling implications.
/// `#[must_use]` because forgetting to actually run the scheduler after an
/// operation that requires it would leave a higher-priority thread parked
/// past its turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextThread {
    /// Fine to keep running whatever thread we were just running.
    Same,
    /// A switch is needed, but this routine hasn't concluded which thread
    /// should run next; the scheduler needs to figure it out.
    Other,
    /// A switch is needed, and the caller already knows who should run
    /// next.
    Specific(ThreadId),
}

impl NextThread {
    pub fn combine(self, other: Self) -> Self {
        use NextThread::*;
        match (self, other) {
            (x, y) if x == y => x,
            (Specific(_), Specific(_)) => Other,
            (Specific(x), _) | (_, Specific(x)) => Specific(x),
            (Other, _) | (_, Other) => Other,
            (Same, Same) => Same,
        }
    }
}
