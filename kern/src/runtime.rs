//! The `Runtime` aggregate: owns every piece of mutable state a running VM
//! instance needs, gathered into one value so tests can build independent
//! instances instead of fighting shared statics.

use std::collections::HashMap;

use abi::{OpenFlags, Priority, SeekWhence, ThreadId};
use log::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::err::{VmError, VmResult};
use crate::fat::FatState;
use crate::file::OpenFile;
use crate::io::IoBridge;
use crate::machine::{IoResult, IoToken, Machine};
use crate::memory::MemoryPool;
use crate::mutex::MutexTable;
use crate::scheduler::{self, ReadyQueues};
use crate::task::{Thread, ThreadEntry, ThreadState, ThreadTable};
use crate::time::Tick;

/// The idle thread's body: it must exist and must run only when nothing
/// else is ready. It never returns and never blocks.
fn idle_entry(_: usize) {}

/// Placeholder body for the synthesized main thread. The real entry point
/// comes from the binary loader (out of scope here); this stands in for it
/// so bootstrap can still synthesize a thread record and context to run as.
fn main_entry(_: usize) {}

pub struct Runtime<M: Machine> {
    pub(crate) machine: M,
    pub(crate) threads: ThreadTable<M::Context>,
    pub(crate) ready: ReadyQueues,
    pub(crate) current: Option<ThreadId>,
    pub(crate) idle: ThreadId,
    pub(crate) mutexes: MutexTable,
    pub(crate) pool: MemoryPool,
    pub(crate) io: IoBridge,
    pub(crate) io_results: HashMap<ThreadId, IoResult>,
    pub(crate) tick: Tick,
    pub(crate) image_fd: Option<i32>,
    pub(crate) fat: Option<FatState>,
    pub(crate) open_files: Vec<Option<OpenFile>>,
    pub(crate) config: RuntimeConfig,
}

impl<M: Machine> Runtime<M> {
    /// Brings up a runtime against `machine`: carves the shared-memory
    /// pool, creates and activates the idle thread, arms the alarm, mounts
    /// the configured image, and seeds descriptors 0/1/2 as reserved
    /// console slots. Does not load or invoke a guest module -- that
    /// belongs to the binary loader (out of scope).
    pub fn start(config: RuntimeConfig, machine: M) -> VmResult<Self> {
        let mut rt = Runtime {
            machine,
            threads: ThreadTable::new(),
            ready: ReadyQueues::new(),
            current: None,
            idle: ThreadId(0),
            mutexes: MutexTable::new(),
            pool: MemoryPool::new(config.shared_memory_sections),
            io: IoBridge::new(),
            io_results: HashMap::new(),
            tick: Tick::zero(),
            image_fd: None,
            fat: None,
            open_files: vec![None, None, None],
            config: config.clone(),
        };

        let idle = rt.create_thread(Priority::Idle, idle_entry, 0, 256)?;
        rt.activate_thread(idle)?;
        rt.idle = idle;

        // Bootstrap synthesizes a main thread at NORMAL marked RUNNING,
        // distinct from (and before) invoking the guest entry point -- the
        // latter is the out-of-scope loader's job, but the thread record
        // itself is this runtime's own bookkeeping. The idle thread stays
        // behind in the IDLE ready queue; main becomes RUNNING outright
        // rather than going through the ready queue, since nothing else can
        // possibly outrank it this early.
        let main = rt.create_thread(Priority::Normal, main_entry, 0, 256)?;
        rt.activate_thread(main)?;
        rt.ready.remove(main);
        if let Some(t) = rt.threads.get_mut(main) {
            t.state = ThreadState::Running;
        }
        rt.current = Some(main);

        rt.machine.request_alarm(config.tick_ms);

        rt.mount(&config.image_path)?;

        debug!("runtime started, tick_ms={}", config.tick_ms);
        Ok(rt)
    }

    /// Shuts the runtime down: closes the mounted image and tells the
    /// machine to terminate.
    pub fn shutdown(&mut self) -> VmResult<()> {
        if let Some(fd) = self.image_fd.take() {
            let thread = self.current.unwrap_or(self.idle);
            let result = self.issue_close(thread, fd);
            if !matches!(result, IoResult::Closed) {
                warn!("image close failed during shutdown");
            }
        }
        self.machine.terminate();
        Ok(())
    }

    pub fn tick_count(&self) -> Tick {
        self.tick
    }

    pub fn tick_ms(&self) -> u32 {
        self.config.tick_ms
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.current
    }

    // -- Thread lifecycle -------------------------------------------------

    pub fn create_thread(
        &mut self,
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
        stack_size: usize,
    ) -> VmResult<ThreadId> {
        if stack_size == 0 {
            return Err(VmError::InvalidParameter);
        }
        Ok(self
            .threads
            .insert(Thread::new(priority, entry, arg, stack_size)))
    }

    /// Allocates the thread's context and places it READY. Only legal on
    /// a DEAD thread.
    pub fn activate_thread(&mut self, id: ThreadId) -> VmResult<()> {
        let thread = self.threads.get_mut(id).ok_or(VmError::InvalidId)?;
        if !thread.is_dead() {
            return Err(VmError::InvalidState);
        }
        let context = self
            .machine
            .context_create(thread.entry, thread.arg, thread.stack_size);
        thread.context = Some(context);
        thread.state = ThreadState::Ready;
        let priority = thread.priority;
        self.ready.push_back(priority, id);
        Ok(())
    }

    /// Puts the current thread to sleep for `ticks`, or fails for a
    /// forbidden sentinel. A zero-tick sleep still yields once.
    pub fn sleep_current(&mut self, ticks: u32) -> VmResult<()> {
        let id = self.current.ok_or(VmError::InvalidState)?;
        let thread = self.threads.get_mut(id).ok_or(VmError::InvalidId)?;
        thread.state = ThreadState::Sleeping {
            ticks_remaining: ticks,
        };
        self.run_scheduler();
        Ok(())
    }

    pub fn terminate_thread(&mut self, id: ThreadId) -> VmResult<()> {
        let (owned, waiting_on) = {
            let thread = self.threads.get_mut(id).ok_or(VmError::InvalidId)?;
            if thread.is_dead() {
                return Err(VmError::InvalidState);
            }
            let waiting_on = match thread.state {
                ThreadState::WaitingForMutex { mutex, .. } => Some(mutex),
                _ => None,
            };
            thread.state = ThreadState::Dead;
            (std::mem::take(&mut thread.owned_mutexes), waiting_on)
        };
        for mutex in owned {
            // Release on behalf of the dying thread; ignore failures, a
            // thread can only own mutexes it legitimately acquired.
            let _ = crate::mutex::release(&mut self.mutexes, mutex, id).map(|next| {
                if let Some(next) = next {
                    self.make_ready(next);
                }
            });
        }
        // A thread can die while merely queued for a mutex it never
        // acquired; scrub it out so a later release doesn't hand ownership
        // to a dead thread.
        if let Some(mutex) = waiting_on {
            crate::mutex::remove_waiter(&mut self.mutexes, mutex, id);
        }
        self.ready.remove(id);
        self.pool.remove_waiter(id);
        self.io.cancel_for_thread(id);
        if self.current == Some(id) {
            self.current = None;
        }
        Ok(())
    }

    pub fn delete_thread(&mut self, id: ThreadId) -> VmResult<()> {
        let thread = self.threads.get(id).ok_or(VmError::InvalidId)?;
        if !thread.is_dead() {
            return Err(VmError::InvalidState);
        }
        self.threads.remove(id);
        Ok(())
    }

    fn make_ready(&mut self, id: ThreadId) {
        if let Some(t) = self.threads.get_mut(id) {
            t.state = ThreadState::Ready;
            let priority = t.priority;
            self.ready.push_back(priority, id);
        }
    }

    // -- Scheduling ---------------------------------------------------

    /// Drains machine I/O completions, ages timers if a tick boundary was
    /// crossed, and runs one scheduling pass. Called at the top of every
    /// VM call and from the tick handler.
    pub fn pump_completions(&mut self) {
        let completions = self.machine.poll_completions();
        let woken = self.io.absorb(completions);
        for (thread, result) in woken {
            self.io_results.insert(thread, result);
            if let Some(t) = self.threads.get_mut(thread) {
                if matches!(t.state, ThreadState::WaitingForIo) {
                    t.state = ThreadState::Ready;
                    let priority = t.priority;
                    self.ready.push_back(priority, thread);
                }
            }
        }
    }

    /// The tick/alarm handler. Runs in the machine's signal context with
    /// signals masked; here that's simply "called once per alarm fire."
    /// Ages sleep and mutex-timeout counters, then schedules.
    pub fn on_tick(&mut self) {
        self.tick = self.tick.next();
        self.machine.advance();
        self.pump_completions();

        let mut woken_by_sleep = Vec::new();
        let mut expired_mutex_waits = Vec::new();
        for (id, thread) in self.threads.iter_mut() {
            match &mut thread.state {
                ThreadState::Sleeping { ticks_remaining } => {
                    if *ticks_remaining == 0 {
                        thread.state = ThreadState::Ready;
                        woken_by_sleep.push((id, thread.priority));
                    } else {
                        *ticks_remaining -= 1;
                        if *ticks_remaining == 0 {
                            thread.state = ThreadState::Ready;
                            woken_by_sleep.push((id, thread.priority));
                        }
                    }
                }
                ThreadState::WaitingForMutex {
                    timeout: crate::task::MutexTimeout::Ticks(remaining),
                    ..
                } => {
                    if *remaining == 0 {
                        expired_mutex_waits.push(id);
                    } else {
                        *remaining -= 1;
                        if *remaining == 0 {
                            expired_mutex_waits.push(id);
                        }
                    }
                }
                _ => {}
            }
        }

        for (id, priority) in woken_by_sleep {
            self.ready.push_back(priority, id);
        }

        for id in expired_mutex_waits {
            let mutex = match self.threads.get(id).unwrap().state {
                ThreadState::WaitingForMutex { mutex, .. } => mutex,
                _ => continue,
            };
            let outcome = crate::mutex::finish_timed_out_wait(&mut self.mutexes, mutex, id);
            let thread = self.threads.get_mut(id).unwrap();
            match outcome {
                Ok(crate::mutex::AcquireOutcome::Acquired) => {
                    thread.owned_mutexes.push(mutex);
                    thread.state = ThreadState::Ready;
                    let priority = thread.priority;
                    self.ready.push_back(priority, id);
                }
                _ => {
                    thread.state = ThreadState::Ready;
                    let priority = thread.priority;
                    self.ready.push_back(priority, id);
                }
            }
        }

        trace!("tick {:?}", self.tick);
        self.run_scheduler();
    }

    /// One scheduling pass: picks the next thread per the selection rule
    /// and switches to it if required.
    pub fn run_scheduler(&mut self) {
        let memory_candidate = if self.pool.has_free_section() {
            self.pool
                .peek_waiter()
                .and_then(|id| self.threads.get(id).map(|t| (t.priority, id)))
        } else {
            None
        };

        let current_priority = self.current.and_then(|id| self.threads.get(id)).map(|t| t.priority);
        let current_is_leaving = self
            .current
            .and_then(|id| self.threads.get(id))
            .map(|t| !matches!(t.state, ThreadState::Running))
            .unwrap_or(true);

        let selected = scheduler::select_next(memory_candidate, &self.ready);
        let (priority, next_id) = match selected {
            Some(x) => x,
            None => return,
        };

        let switch = if current_is_leaving {
            true
        } else {
            scheduler::should_preempt(priority, current_priority)
        };

        if !switch {
            // The candidate was only peeked, not removed -- leave the
            // ready queue (or memory-wait queue) exactly as it was.
            return;
        }

        if Some(next_id) == memory_candidate.map(|(_, id)| id) {
            self.pool.pop_memory_waiter();
        } else {
            self.ready.pop_front_highest();
        }

        if let Some(prev_id) = self.current {
            if let Some(prev) = self.threads.get_mut(prev_id) {
                if matches!(prev.state, ThreadState::Running) {
                    prev.state = ThreadState::Ready;
                    self.ready.push_back(prev.priority, prev_id);
                }
            }
        }

        self.context_switch(self.current, next_id);
        if let Some(next) = self.threads.get_mut(next_id) {
            next.state = ThreadState::Running;
        }
        self.current = Some(next_id);
        debug!("scheduled thread {:?} at priority {:?}", next_id, priority);
    }

    fn context_switch(&mut self, from: Option<ThreadId>, to: ThreadId) {
        let from_ctx = from.and_then(|id| self.threads.get_mut(id)).and_then(|t| t.context.as_mut());
        if let Some(to_thread) = self.threads.get_mut(to) {
            if let Some(to_ctx) = to_thread.context.as_mut() {
                self.machine.context_switch(from_ctx, to_ctx);
            }
        }
    }

    // -- Shared-memory pool helpers -------------------------------------

    /// Lends a free section to `thread`, parking it on the memory-wait
    /// queue if the pool is exhausted. A thread only ever holds a section
    /// for the duration of one sector transfer, so under this runtime's
    /// one-call-at-a-time model the pool is never actually contended in
    /// practice; the park/resume path still exists so the scheduler's
    /// memory-waiter priority rule has a caller to exercise it.
    pub(crate) fn acquire_section(&mut self, thread: ThreadId) -> usize {
        if let Some(idx) = self.pool.try_lend(thread) {
            return idx;
        }
        self.pool.enqueue_waiter(thread);
        if let Some(t) = self.threads.get_mut(thread) {
            t.state = ThreadState::WaitingForMemory;
        }
        if self.current == Some(thread) {
            self.current = None;
        }
        self.run_scheduler();
        loop {
            match self.threads.get(thread).map(|t| t.state) {
                Some(ThreadState::WaitingForMemory) => self.on_tick(),
                _ => break,
            }
        }
        self.pool
            .try_lend(thread)
            .expect("scheduler only selects a memory waiter once a section is free")
    }

    pub(crate) fn release_section(&mut self, index: usize) {
        self.pool.release(index);
        self.run_scheduler();
    }

    // -- Async I/O bridge helpers --------------------------------------

    fn block_on_io(&mut self, thread: ThreadId, token: IoToken) -> IoResult {
        if let Some(t) = self.threads.get_mut(thread) {
            t.state = ThreadState::WaitingForIo;
        }
        loop {
            self.pump_completions();
            if let Some(result) = self.io_results.remove(&thread) {
                if let Some(t) = self.threads.get_mut(thread) {
                    if matches!(t.state, ThreadState::Ready) {
                        t.state = ThreadState::Running;
                    }
                }
                return result;
            }
            self.machine.advance();
        }
    }

    pub(crate) fn issue_open(&mut self, thread: ThreadId, path: &str, flags: OpenFlags, mode: u32) -> IoResult {
        let token = self.io.begin(thread);
        self.machine.file_open(token, path, flags, mode);
        self.block_on_io(thread, token)
    }

    pub(crate) fn issue_close(&mut self, thread: ThreadId, fd: i32) -> IoResult {
        let token = self.io.begin(thread);
        self.machine.file_close(token, fd);
        self.block_on_io(thread, token)
    }

    pub(crate) fn issue_read(&mut self, thread: ThreadId, fd: i32, len: usize) -> IoResult {
        let token = self.io.begin(thread);
        self.machine.file_read(token, fd, len);
        self.block_on_io(thread, token)
    }

    pub(crate) fn issue_write(&mut self, thread: ThreadId, fd: i32, data: Vec<u8>) -> IoResult {
        let token = self.io.begin(thread);
        self.machine.file_write(token, fd, data);
        self.block_on_io(thread, token)
    }

    pub(crate) fn issue_seek(&mut self, thread: ThreadId, fd: i32, offset: i32, whence: SeekWhence) -> IoResult {
        let token = self.io.begin(thread);
        self.machine.file_seek(token, fd, offset, whence);
        self.block_on_io(thread, token)
    }

    // -- Mount ----------------------------------------------------------

    fn mount(&mut self, image_path: &str) -> VmResult<()> {
        let thread = self.current.unwrap_or(self.idle);
        let opened = self.issue_open(thread, image_path, OpenFlags::RDWR, 0);
        let fd = match opened {
            IoResult::Opened(fd) => fd,
            _ => return Err(VmError::Failure),
        };
        self.image_fd = Some(fd);

        let bpb_sector = crate::sector::read_sector(self, thread, 0)?;
        let bpb = crate::fat::Bpb::parse(&bpb_sector)?;

        let fat_sectors =
            crate::sector::read_sectors(self, thread, bpb.reserved_sector_count as u32, bpb.fat_size_sectors)?;
        let fat_table = crate::fat::parse_fat_table(&fat_sectors);

        let root_sectors = crate::sector::read_sectors(
            self,
            thread,
            bpb.first_root_sector(),
            bpb.root_dir_sector_count(),
        )?;
        let entries = crate::fat::parse_root_directory(&root_sectors, bpb.root_entry_count);

        self.fat = Some(FatState {
            bpb,
            fat_table,
            root_sectors,
            entries,
        });
        Ok(())
    }
}
