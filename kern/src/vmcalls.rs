//! The guest-visible VM call surface. Every operation that can fail returns
//! `abi::VMStatus`; values are handed back through an out-parameter the
//! same way a C ABI would, since a guest call can only report one thing
//! across the boundary. `userlib` wraps these into ergonomic Rust
//! functions over `&mut Runtime`.
//!
//! Every call starts by draining machine completions (`pump_completions`):
//! the scheduler drains the channel at every VM-call entry, not just on
//! the tick alarm.

use abi::{
    DateTime, MutexId, OpenFlags, SeekWhence, ThreadId, Timeout, VMMutexStatus, VMStatus,
    VMThreadState, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO,
};

use crate::err::{status_of, VmError, VmResult};
use crate::file;
use crate::machine::{IoResult, Machine};
use crate::mutex::{self, AcquireOutcome};
use crate::runtime::Runtime;
use crate::task::{MutexTimeout, ThreadEntry, ThreadState};

fn thread_state_of(state: &ThreadState) -> VMThreadState {
    match state {
        ThreadState::Dead => VMThreadState::Dead,
        ThreadState::Ready => VMThreadState::Ready,
        ThreadState::Running => VMThreadState::Running,
        ThreadState::Sleeping { .. }
        | ThreadState::WaitingForMutex { .. }
        | ThreadState::WaitingForMemory
        | ThreadState::WaitingForIo => VMThreadState::Waiting,
    }
}

fn current_thread<M: Machine>(rt: &Runtime<M>) -> VmResult<ThreadId> {
    rt.current_thread().ok_or(VmError::InvalidState)
}

// -- Time ---------------------------------------------------------------

pub fn vm_tick_ms<M: Machine>(rt: &Runtime<M>) -> u32 {
    rt.tick_ms()
}

pub fn vm_tick_count<M: Machine>(rt: &Runtime<M>) -> u64 {
    rt.tick_count().into()
}

pub fn vm_date_time() -> DateTime {
    crate::time::now()
}

// -- Threads --------------------------------------------------------------

pub fn vm_thread_create<M: Machine>(
    rt: &mut Runtime<M>,
    priority: abi::Priority,
    entry: ThreadEntry,
    arg: usize,
    stack_size: usize,
    out_id: &mut ThreadId,
) -> VMStatus {
    rt.pump_completions();
    status_of(rt.create_thread(priority, entry, arg, stack_size).map(|id| {
        *out_id = id;
    }))
}

pub fn vm_thread_activate<M: Machine>(rt: &mut Runtime<M>, id: ThreadId) -> VMStatus {
    rt.pump_completions();
    let result = rt.activate_thread(id);
    rt.run_scheduler();
    status_of(result)
}

pub fn vm_thread_terminate<M: Machine>(rt: &mut Runtime<M>, id: ThreadId) -> VMStatus {
    rt.pump_completions();
    let result = rt.terminate_thread(id);
    rt.run_scheduler();
    status_of(result)
}

pub fn vm_thread_delete<M: Machine>(rt: &mut Runtime<M>, id: ThreadId) -> VMStatus {
    rt.pump_completions();
    status_of(rt.delete_thread(id))
}

pub fn vm_thread_sleep<M: Machine>(rt: &mut Runtime<M>, ticks: u32) -> VMStatus {
    rt.pump_completions();
    status_of(rt.sleep_current(ticks))
}

pub fn vm_thread_id<M: Machine>(rt: &Runtime<M>, out_id: &mut ThreadId) -> VMStatus {
    match rt.current_thread() {
        Some(id) => {
            *out_id = id;
            VMStatus::Success
        }
        None => VMStatus::ErrorInvalidState,
    }
}

pub fn vm_thread_state<M: Machine>(rt: &Runtime<M>, id: ThreadId, out: &mut VMThreadState) -> VMStatus {
    match rt.threads.get(id) {
        Some(t) => {
            *out = thread_state_of(&t.state);
            VMStatus::Success
        }
        None => VMStatus::ErrorInvalidId,
    }
}

// -- Mutexes --------------------------------------------------------------

pub fn vm_mutex_create<M: Machine>(rt: &mut Runtime<M>, out_id: &mut MutexId) -> VMStatus {
    rt.pump_completions();
    *out_id = rt.mutexes.create();
    VMStatus::Success
}

pub fn vm_mutex_delete<M: Machine>(rt: &mut Runtime<M>, id: MutexId) -> VMStatus {
    rt.pump_completions();
    status_of(rt.mutexes.delete(id))
}

/// Attempts to acquire `id` on behalf of the current thread. On a
/// finite/infinite timeout that must block, parks the caller and drives the
/// scheduler until the caller either acquires the mutex or its timeout
/// expires. There is no other thread to run this loop concurrently with in
/// the hosted model's tests; `run_scheduler`/`on_tick` calls here stand in
/// for however many ticks actually elapse in a real deployment.
pub fn vm_mutex_acquire<M: Machine>(rt: &mut Runtime<M>, id: MutexId, timeout: Timeout) -> VMStatus {
    rt.pump_completions();
    let caller = match current_thread(rt) {
        Ok(id) => id,
        Err(e) => return e.into_status(),
    };

    let outcome = match mutex::begin_acquire(&mut rt.mutexes, id, caller, timeout) {
        Ok(o) => o,
        Err(e) => return e.into_status(),
    };

    match outcome {
        AcquireOutcome::Acquired => {
            if let Some(t) = rt.threads.get_mut(caller) {
                t.owned_mutexes.push(id);
            }
            VMStatus::Success
        }
        AcquireOutcome::Failed => VMStatus::Failure,
        AcquireOutcome::Block => {
            if let Some(t) = rt.threads.get_mut(caller) {
                t.state = ThreadState::WaitingForMutex {
                    mutex: id,
                    timeout: match timeout {
                        Timeout::Ticks(n) => MutexTimeout::Ticks(n),
                        _ => MutexTimeout::Infinite,
                    },
                };
            }
            rt.current = None;
            rt.run_scheduler();

            loop {
                match rt.threads.get(caller).map(|t| t.state.clone()) {
                    Some(ThreadState::WaitingForMutex { .. }) => {
                        rt.on_tick();
                    }
                    Some(ThreadState::Running) | Some(ThreadState::Ready) => {
                        return if rt
                            .threads
                            .get(caller)
                            .map(|t| t.owned_mutexes.contains(&id))
                            .unwrap_or(false)
                        {
                            VMStatus::Success
                        } else {
                            VMStatus::Failure
                        };
                    }
                    _ => return VMStatus::Failure,
                }
            }
        }
    }
}

pub fn vm_mutex_release<M: Machine>(rt: &mut Runtime<M>, id: MutexId) -> VMStatus {
    rt.pump_completions();
    let caller = match current_thread(rt) {
        Ok(id) => id,
        Err(e) => return e.into_status(),
    };
    match mutex::release(&mut rt.mutexes, id, caller) {
        Ok(next) => {
            if let Some(t) = rt.threads.get_mut(caller) {
                t.owned_mutexes.retain(|&m| m != id);
            }
            if let Some(next_owner) = next {
                if let Some(t) = rt.threads.get_mut(next_owner) {
                    t.owned_mutexes.push(id);
                    t.state = ThreadState::Ready;
                    let priority = t.priority;
                    rt.ready.push_back(priority, next_owner);
                }
            }
            rt.run_scheduler();
            VMStatus::Success
        }
        Err(e) => e.into_status(),
    }
}

pub fn vm_mutex_query<M: Machine>(rt: &Runtime<M>, id: MutexId, out: &mut VMMutexStatus) -> VMStatus {
    match rt.mutexes.query(id) {
        Ok(owner) => {
            *out = VMMutexStatus {
                locked: owner.is_some(),
                owner,
            };
            VMStatus::Success
        }
        Err(e) => e.into_status(),
    }
}

// -- Files ------------------------------------------------------------------

fn is_console_fd(fd: i32) -> bool {
    fd == STDIN_FILENO || fd == STDOUT_FILENO || fd == STDERR_FILENO
}

pub fn vm_file_open<M: Machine>(
    rt: &mut Runtime<M>,
    name: &str,
    flags: OpenFlags,
    out_fd: &mut i32,
) -> VMStatus {
    rt.pump_completions();
    if name.len() > 12 {
        return VMStatus::ErrorInvalidParameter;
    }
    let thread = match current_thread(rt) {
        Ok(id) => id,
        Err(e) => return e.into_status(),
    };
    let now = crate::time::now();
    status_of(file::open(rt, thread, name, flags, now).map(|fd| *out_fd = fd))
}

pub fn vm_file_close<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> VMStatus {
    rt.pump_completions();
    let thread = match current_thread(rt) {
        Ok(id) => id,
        Err(e) => return e.into_status(),
    };
    if is_console_fd(fd) {
        return status_of(
            match rt.issue_close(thread, fd) {
                IoResult::Closed => Ok(()),
                _ => Err(VmError::Failure),
            },
        );
    }
    let now = crate::time::now();
    status_of(file::close(rt, thread, fd, now))
}

pub fn vm_file_read<M: Machine>(rt: &mut Runtime<M>, fd: i32, len: usize, out: &mut Vec<u8>) -> VMStatus {
    rt.pump_completions();
    let thread = match current_thread(rt) {
        Ok(id) => id,
        Err(e) => return e.into_status(),
    };
    if is_console_fd(fd) {
        return status_of(match rt.issue_read(thread, fd, len) {
            IoResult::Read(data) => {
                *out = data;
                Ok(())
            }
            _ => Err(VmError::Failure),
        });
    }
    status_of(file::read(rt, thread, fd, len).map(|data| *out = data))
}

pub fn vm_file_write<M: Machine>(rt: &mut Runtime<M>, fd: i32, data: &[u8], out_len: &mut usize) -> VMStatus {
    rt.pump_completions();
    let thread = match current_thread(rt) {
        Ok(id) => id,
        Err(e) => return e.into_status(),
    };
    if is_console_fd(fd) {
        return status_of(match rt.issue_write(thread, fd, data.to_vec()) {
            IoResult::Wrote(n) => {
                *out_len = n;
                Ok(())
            }
            _ => Err(VmError::Failure),
        });
    }
    status_of(file::write(rt, thread, fd, data).map(|n| *out_len = n))
}

pub fn vm_file_seek<M: Machine>(
    rt: &mut Runtime<M>,
    fd: i32,
    offset: i32,
    whence: SeekWhence,
    out_pos: &mut i32,
) -> VMStatus {
    rt.pump_completions();
    let thread = match current_thread(rt) {
        Ok(id) => id,
        Err(e) => return e.into_status(),
    };
    if is_console_fd(fd) {
        return status_of(match rt.issue_seek(thread, fd, offset, whence) {
            IoResult::Sought(pos) => {
                *out_pos = pos;
                Ok(())
            }
            _ => Err(VmError::Failure),
        });
    }
    status_of(file::seek(rt, fd, offset, whence).map(|pos| *out_pos = pos))
}

// -- Directories ------------------------------------------------------------

pub fn vm_directory_open<M: Machine>(rt: &mut Runtime<M>, path: &str, out_fd: &mut i32) -> VMStatus {
    rt.pump_completions();
    status_of(file::dir_open(rt, path).map(|fd| *out_fd = fd))
}

pub fn vm_directory_close<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> VMStatus {
    rt.pump_completions();
    status_of(file::dir_close(rt, fd))
}

pub fn vm_directory_read<M: Machine>(
    rt: &mut Runtime<M>,
    fd: i32,
    out: &mut Option<crate::fat::DirEntryRecord>,
) -> VMStatus {
    rt.pump_completions();
    match file::dir_read(rt, fd) {
        Ok(Some(entry)) => {
            *out = Some(entry);
            VMStatus::Success
        }
        Ok(None) => VMStatus::Failure,
        Err(e) => e.into_status(),
    }
}

pub fn vm_directory_rewind<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> VMStatus {
    rt.pump_completions();
    status_of(file::dir_rewind(rt, fd))
}

pub fn vm_directory_current() -> &'static str {
    "/"
}

pub fn vm_directory_change<M: Machine>(_rt: &mut Runtime<M>, _path: &str) -> VMStatus {
    VMStatus::Failure
}
