//! High-level guest interface.
//!
//! This is intended to provide a more ergonomic interface than the raw VM
//! calls in `kern::vmcalls`: `Result`s instead of out-parameters, and a
//! `VMStatus` that already knows how to become an `Err`.

use abi::{
    DateTime, MutexId, OpenFlags, Priority, SeekWhence, ThreadId, Timeout, VMMutexStatus,
    VMStatus, VMThreadState,
};
use kern::fat::DirEntryRecord;
use kern::machine::Machine;
use kern::runtime::Runtime;
use kern::task::ThreadEntry;
use kern::vmcalls;

fn ok_or(status: VMStatus) -> Result<(), VMStatus> {
    if status.is_success() {
        Ok(())
    } else {
        Err(status)
    }
}

// -- Time -------------------------------------------------------------------

pub fn tick_ms<M: Machine>(rt: &Runtime<M>) -> u32 {
    vmcalls::vm_tick_ms(rt)
}

pub fn tick_count<M: Machine>(rt: &Runtime<M>) -> u64 {
    vmcalls::vm_tick_count(rt)
}

pub fn date_time() -> DateTime {
    vmcalls::vm_date_time()
}

// -- Threads ------------------------------------------------------------------

/// Creates a new thread at `priority` running `entry(arg)`, and returns its
/// id. The thread starts dead; call [`activate`] to make it ready.
pub fn thread_create<M: Machine>(
    rt: &mut Runtime<M>,
    priority: Priority,
    entry: ThreadEntry,
    arg: usize,
    stack_size: usize,
) -> Result<ThreadId, VMStatus> {
    let mut out_id = ThreadId(0);
    let status = vmcalls::vm_thread_create(rt, priority, entry, arg, stack_size, &mut out_id);
    ok_or(status).map(|_| out_id)
}

pub fn activate<M: Machine>(rt: &mut Runtime<M>, id: ThreadId) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_thread_activate(rt, id))
}

pub fn terminate<M: Machine>(rt: &mut Runtime<M>, id: ThreadId) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_thread_terminate(rt, id))
}

pub fn delete<M: Machine>(rt: &mut Runtime<M>, id: ThreadId) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_thread_delete(rt, id))
}

/// Puts the calling thread to sleep for `ticks` ticks. There is no calling
/// thread outside of a VM call context, so this always operates on whichever
/// thread the runtime currently considers current.
pub fn sleep<M: Machine>(rt: &mut Runtime<M>, ticks: u32) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_thread_sleep(rt, ticks))
}

pub fn current_thread_id<M: Machine>(rt: &Runtime<M>) -> Result<ThreadId, VMStatus> {
    let mut out_id = ThreadId(0);
    let status = vmcalls::vm_thread_id(rt, &mut out_id);
    ok_or(status).map(|_| out_id)
}

pub fn thread_state<M: Machine>(rt: &Runtime<M>, id: ThreadId) -> Result<VMThreadState, VMStatus> {
    let mut out = VMThreadState::Dead;
    let status = vmcalls::vm_thread_state(rt, id, &mut out);
    ok_or(status).map(|_| out)
}

// -- Mutexes ------------------------------------------------------------------

pub fn mutex_create<M: Machine>(rt: &mut Runtime<M>) -> MutexId {
    let mut out_id = MutexId(0);
    let _ = vmcalls::vm_mutex_create(rt, &mut out_id);
    out_id
}

pub fn mutex_delete<M: Machine>(rt: &mut Runtime<M>, id: MutexId) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_mutex_delete(rt, id))
}

/// Acquires `id`, blocking the calling thread according to `timeout` if it is
/// already held. See `kern::vmcalls::vm_mutex_acquire` for what "blocking"
/// means in this single-threaded, test-driven runtime.
pub fn mutex_acquire<M: Machine>(
    rt: &mut Runtime<M>,
    id: MutexId,
    timeout: Timeout,
) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_mutex_acquire(rt, id, timeout))
}

pub fn mutex_release<M: Machine>(rt: &mut Runtime<M>, id: MutexId) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_mutex_release(rt, id))
}

pub fn mutex_query<M: Machine>(rt: &Runtime<M>, id: MutexId) -> Result<VMMutexStatus, VMStatus> {
    let mut out = VMMutexStatus {
        locked: false,
        owner: None,
    };
    let status = vmcalls::vm_mutex_query(rt, id, &mut out);
    ok_or(status).map(|_| out)
}

/// Runs `body` while holding `id`, releasing it afterward regardless of
/// whether `body` returned an error. Mirrors the guard pattern a real guest
/// would build over `mutex_acquire`/`mutex_release` by hand.
pub fn with_mutex<M: Machine, T>(
    rt: &mut Runtime<M>,
    id: MutexId,
    timeout: Timeout,
    body: impl FnOnce(&mut Runtime<M>) -> T,
) -> Result<T, VMStatus> {
    mutex_acquire(rt, id, timeout)?;
    let result = body(rt);
    mutex_release(rt, id)?;
    Ok(result)
}

// -- Files --------------------------------------------------------------------

pub fn file_open<M: Machine>(
    rt: &mut Runtime<M>,
    name: &str,
    flags: OpenFlags,
) -> Result<i32, VMStatus> {
    let mut out_fd = 0;
    let status = vmcalls::vm_file_open(rt, name, flags, &mut out_fd);
    ok_or(status).map(|_| out_fd)
}

pub fn file_close<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_file_close(rt, fd))
}

pub fn file_read<M: Machine>(rt: &mut Runtime<M>, fd: i32, len: usize) -> Result<Vec<u8>, VMStatus> {
    let mut out = Vec::new();
    let status = vmcalls::vm_file_read(rt, fd, len, &mut out);
    ok_or(status).map(|_| out)
}

pub fn file_write<M: Machine>(rt: &mut Runtime<M>, fd: i32, data: &[u8]) -> Result<usize, VMStatus> {
    let mut out_len = 0;
    let status = vmcalls::vm_file_write(rt, fd, data, &mut out_len);
    ok_or(status).map(|_| out_len)
}

pub fn file_seek<M: Machine>(
    rt: &mut Runtime<M>,
    fd: i32,
    offset: i32,
    whence: SeekWhence,
) -> Result<i32, VMStatus> {
    let mut out_pos = 0;
    let status = vmcalls::vm_file_seek(rt, fd, offset, whence, &mut out_pos);
    ok_or(status).map(|_| out_pos)
}

// -- Directories ----------------------------------------------------------------

pub fn directory_open<M: Machine>(rt: &mut Runtime<M>, path: &str) -> Result<i32, VMStatus> {
    let mut out_fd = 0;
    let status = vmcalls::vm_directory_open(rt, path, &mut out_fd);
    ok_or(status).map(|_| out_fd)
}

pub fn directory_close<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_directory_close(rt, fd))
}

/// Reads the next root-directory entry, or `None` once enumeration is
/// exhausted -- the underlying call's "repeated Read eventually fails" is
/// surfaced here as the end of an iterator rather than an error the caller
/// has to match on.
pub fn directory_read<M: Machine>(
    rt: &mut Runtime<M>,
    fd: i32,
) -> Result<Option<DirEntryRecord>, VMStatus> {
    let mut out = None;
    match vmcalls::vm_directory_read(rt, fd, &mut out) {
        VMStatus::Success => Ok(out),
        VMStatus::Failure => Ok(None),
        status => Err(status),
    }
}

pub fn directory_rewind<M: Machine>(rt: &mut Runtime<M>, fd: i32) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_directory_rewind(rt, fd))
}

pub fn directory_current() -> &'static str {
    vmcalls::vm_directory_current()
}

pub fn directory_change<M: Machine>(rt: &mut Runtime<M>, path: &str) -> Result<(), VMStatus> {
    ok_or(vmcalls::vm_directory_change(rt, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::Priority;
    use kern::config::RuntimeConfig;
    use kern::machine::sim::SimMachine;

    fn fresh_image() -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        use byteorder::{ByteOrder, LittleEndian};
        LittleEndian::write_u16(&mut sector[11..13], 512);
        sector[13] = 1;
        LittleEndian::write_u16(&mut sector[14..16], 1);
        sector[16] = 1;
        LittleEndian::write_u16(&mut sector[17..19], 16);
        LittleEndian::write_u16(&mut sector[19..21], 100);
        LittleEndian::write_u16(&mut sector[22..24], 1);

        let mut image = sector;
        image.resize(512 * 20, 0);
        image
    }

    fn boot() -> Runtime<SimMachine> {
        let _ = env_logger::try_init();
        let config = RuntimeConfig {
            image_path: "disk.img".into(),
            tick_ms: 10,
            shared_memory_sections: 4,
        };
        Runtime::start(config, SimMachine::new(fresh_image())).unwrap()
    }

    fn noop_entry(_arg: usize) {}

    #[test]
    fn thread_lifecycle_round_trips() {
        let mut rt = boot();
        let id = thread_create(&mut rt, Priority::Normal, noop_entry, 0, 256).unwrap();
        assert_eq!(thread_state(&rt, id).unwrap(), VMThreadState::Dead);
        activate(&mut rt, id).unwrap();
        assert_ne!(thread_state(&rt, id).unwrap(), VMThreadState::Dead);
        terminate(&mut rt, id).unwrap();
        assert_eq!(thread_state(&rt, id).unwrap(), VMThreadState::Dead);
        delete(&mut rt, id).unwrap();
        assert!(thread_state(&rt, id).is_err());
    }

    #[test]
    fn mutex_guard_releases_on_the_way_out() {
        let mut rt = boot();
        let m = mutex_create(&mut rt);
        let seen = with_mutex(&mut rt, m, Timeout::Immediate, |_rt| 42).unwrap();
        assert_eq!(seen, 42);
        let status = mutex_query(&rt, m).unwrap();
        assert!(!status.locked);
    }

    #[test]
    fn file_write_then_read_round_trips() {
        let mut rt = boot();
        let fd = file_open(&mut rt, "HELLO.TXT", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
        let n = file_write(&mut rt, fd, b"hi there").unwrap();
        assert_eq!(n, 8);
        file_seek(&mut rt, fd, 0, SeekWhence::Set).unwrap();
        let data = file_read(&mut rt, fd, 8).unwrap();
        assert_eq!(&data, b"hi there");
        file_close(&mut rt, fd).unwrap();
    }

    #[test]
    fn directory_read_stops_returning_entries_once_exhausted() {
        let mut rt = boot();
        let fd = directory_open(&mut rt, "/").unwrap();
        let mut count = 0;
        while directory_read(&mut rt, fd).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 0);
        directory_rewind(&mut rt, fd).unwrap();
        directory_close(&mut rt, fd).unwrap();
    }
}
