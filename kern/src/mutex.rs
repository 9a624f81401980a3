//! Binary mutexes with FIFO waiters and priority-aware handoff.
//!
//! This module only knows about mutex records; it never touches a
//! `Thread`. Callers (`vmcalls`) are responsible for moving a thread in or
//! out of a ready queue and updating its `owned_mutexes` set based on the
//! outcome returned here.

use std::collections::VecDeque;

use abi::{MutexId, Timeout, ThreadId};

use crate::err::{VmError, VmResult};

/// A single binary mutex.
#[derive(Debug)]
pub struct Mutex {
    pub locked: bool,
    /// Meaningful only while `locked`.
    pub owner: Option<ThreadId>,
    pub waiters: VecDeque<ThreadId>,
}

impl Mutex {
    fn new() -> Self {
        Mutex {
            locked: false,
            owner: None,
            waiters: VecDeque::new(),
        }
    }
}

/// Result of attempting to acquire a mutex.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquireOutcome {
    /// The caller now owns the mutex.
    Acquired,
    /// The caller must park and retry once woken (infinite wait, or a
    /// finite wait whose timeout hasn't expired).
    Block,
    /// The caller did not get the mutex and should not retry (immediate
    /// timeout denied, or a finite wait that expired).
    Failed,
}

/// Dense table of mutex records, indexed by `MutexId`. Identities are never
/// reused, mirroring `task::ThreadTable`.
#[derive(Default)]
pub struct MutexTable {
    mutexes: Vec<Option<Mutex>>,
}

impl MutexTable {
    pub fn new() -> Self {
        MutexTable {
            mutexes: Vec::new(),
        }
    }

    pub fn create(&mut self) -> MutexId {
        let id = MutexId(self.mutexes.len() as u32);
        self.mutexes.push(Some(Mutex::new()));
        id
    }

    pub fn get(&self, id: MutexId) -> Option<&Mutex> {
        self.mutexes.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: MutexId) -> Option<&mut Mutex> {
        self.mutexes.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn delete(&mut self, id: MutexId) -> VmResult<()> {
        match self.get(id) {
            None => Err(VmError::InvalidId),
            Some(m) if m.locked => Err(VmError::InvalidState),
            Some(_) => {
                self.mutexes[id.0 as usize] = None;
                Ok(())
            }
        }
    }

    pub fn query(&self, id: MutexId) -> VmResult<Option<ThreadId>> {
        self.get(id).map(|m| m.owner).ok_or(VmError::InvalidId)
    }
}

/// First attempt to acquire `id` on behalf of `caller`.
///
/// Asymmetric by design: an `Immediate` timeout only succeeds if the mutex
/// is unlocked *and* no other thread is already queued for it, while
/// `Infinite`/finite timeouts take an unlocked mutex immediately without
/// checking the waiter queue. Priority-inversion handling is out of scope,
/// so that asymmetry is left as-is rather than patched over.
pub fn begin_acquire(
    table: &mut MutexTable,
    id: MutexId,
    caller: ThreadId,
    timeout: Timeout,
) -> VmResult<AcquireOutcome> {
    let mutex = table.get_mut(id).ok_or(VmError::InvalidId)?;
    match timeout {
        Timeout::Immediate => {
            if !mutex.locked && mutex.waiters.is_empty() {
                mutex.locked = true;
                mutex.owner = Some(caller);
                Ok(AcquireOutcome::Acquired)
            } else {
                Ok(AcquireOutcome::Failed)
            }
        }
        Timeout::Infinite | Timeout::Ticks(_) => {
            if !mutex.locked {
                mutex.locked = true;
                mutex.owner = Some(caller);
                Ok(AcquireOutcome::Acquired)
            } else {
                mutex.waiters.push_back(caller);
                Ok(AcquireOutcome::Block)
            }
        }
    }
}

/// Resumes a thread that blocked with a finite timeout and whose timeout
/// has now expired. Scrubs the caller from the waiter list unconditionally
/// (it may or may not still be in it, depending on whether a concurrent
/// release already popped it), then re-tests ownership.
///
/// This can still observe the mutex unlocked with other threads already
/// queued ahead of the caller -- that must fail, not panic; it is a real,
/// reachable outcome of a timeout racing a release.
pub fn finish_timed_out_wait(
    table: &mut MutexTable,
    id: MutexId,
    caller: ThreadId,
) -> VmResult<AcquireOutcome> {
    let mutex = table.get_mut(id).ok_or(VmError::InvalidId)?;
    mutex.waiters.retain(|&w| w != caller);
    if !mutex.locked && mutex.waiters.is_empty() {
        mutex.locked = true;
        mutex.owner = Some(caller);
        Ok(AcquireOutcome::Acquired)
    } else {
        Ok(AcquireOutcome::Failed)
    }
}

/// Releases `id` on behalf of `caller`, who must be the current owner.
///
/// On success, returns the thread that was handed ownership (if the
/// waiter queue was non-empty) so the caller can make it Ready and decide
/// whether to preempt.
pub fn release(table: &mut MutexTable, id: MutexId, caller: ThreadId) -> VmResult<Option<ThreadId>> {
    let mutex = table.get_mut(id).ok_or(VmError::InvalidId)?;
    if mutex.owner != Some(caller) {
        return Err(VmError::InvalidState);
    }
    match mutex.waiters.pop_front() {
        None => {
            mutex.locked = false;
            mutex.owner = None;
            Ok(None)
        }
        Some(next) => {
            mutex.owner = Some(next);
            Ok(Some(next))
        }
    }
}

/// Scrubs a thread from a mutex's waiter queue without otherwise touching
/// the mutex, for use when a waiting thread is deleted out from under the
/// mutex manager.
pub fn remove_waiter(table: &mut MutexTable, id: MutexId, thread: ThreadId) {
    if let Some(mutex) = table.get_mut(id) {
        mutex.waiters.retain(|&w| w != thread);
    }
}
