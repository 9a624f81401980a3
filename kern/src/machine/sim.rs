//! `SimMachine`: an in-memory `Machine` used by every test in this
//! workspace. Resolves every call synchronously unless constructed with a
//! delay, in which case completions sit in a short queue and surface only
//! after the requested number of ticks -- enough to exercise the
//! park/resume path deliberately instead of only ever taking the
//! immediate-resolution shortcut.

use std::collections::VecDeque;

use abi::{OpenFlags, SeekWhence, STDERR_FILENO, STDOUT_FILENO};

use super::{IoCompletion, IoResult, IoToken, Machine};
use crate::task::ThreadEntry;

/// Saved context for a simulated thread. Carries the entry point and
/// argument purely so tests can assert a thread was activated with the
/// values it was created with; `SimMachine` never calls `entry`.
#[derive(Debug)]
pub struct SimContext {
    pub entry: ThreadEntry,
    pub arg: usize,
}

pub struct SimMachine {
    disk: Vec<u8>,
    disk_cursor: usize,
    image_fd: Option<i32>,
    next_fd: i32,
    console_out: Vec<u8>,
    ready: Vec<IoCompletion>,
    delayed: VecDeque<(u32, IoCompletion)>,
    resolve_after_ticks: u32,
    alarm_period_ms: Option<u32>,
    contexts_created: usize,
    switches: usize,
}

impl SimMachine {
    /// Resolves every call on the tick it was issued.
    pub fn new(disk_image: Vec<u8>) -> Self {
        Self::with_delay(disk_image, 0)
    }

    /// Resolves every call `resolve_after_ticks` ticks after it was
    /// issued, to force callers through the park/resume path.
    pub fn with_delay(disk_image: Vec<u8>, resolve_after_ticks: u32) -> Self {
        SimMachine {
            disk: disk_image,
            disk_cursor: 0,
            image_fd: None,
            next_fd: 100,
            console_out: Vec::new(),
            ready: Vec::new(),
            delayed: VecDeque::new(),
            resolve_after_ticks,
            alarm_period_ms: None,
            contexts_created: 0,
            switches: 0,
        }
    }

    pub fn stdout(&self) -> &[u8] {
        &self.console_out
    }

    pub fn disk_image(&self) -> &[u8] {
        &self.disk
    }

    pub fn alarm_period_ms(&self) -> Option<u32> {
        self.alarm_period_ms
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created
    }

    pub fn context_switches(&self) -> usize {
        self.switches
    }

    /// Ages every delayed completion by one tick, promoting any that have
    /// reached zero into the ready queue.
    pub fn tick(&mut self) {
        let mut still_waiting = VecDeque::new();
        while let Some((remaining, completion)) = self.delayed.pop_front() {
            if remaining == 0 {
                self.ready.push(completion);
            } else {
                still_waiting.push_back((remaining - 1, completion));
            }
        }
        self.delayed = still_waiting;
    }

    fn complete(&mut self, token: IoToken, result: IoResult) {
        let completion = IoCompletion { token, result };
        if self.resolve_after_ticks == 0 {
            self.ready.push(completion);
        } else {
            self.delayed.push_back((self.resolve_after_ticks, completion));
        }
    }
}

impl Machine for SimMachine {
    type Context = SimContext;

    fn context_create(&mut self, entry: ThreadEntry, arg: usize, _stack_size: usize) -> SimContext {
        self.contexts_created += 1;
        SimContext { entry, arg }
    }

    fn context_switch(&mut self, _from: Option<&mut SimContext>, _to: &mut SimContext) {
        // The real machine would save/restore registers here. Simulated
        // threads have no actual execution to resume; the runtime's own
        // state (ready queues, thread table) is the source of truth, so
        // this just counts the switch for test assertions.
        self.switches += 1;
    }

    fn request_alarm(&mut self, period_ms: u32) {
        self.alarm_period_ms = Some(period_ms);
    }

    fn file_open(&mut self, token: IoToken, _path: &str, _flags: OpenFlags, _mode: u32) {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.image_fd = Some(fd);
        self.disk_cursor = 0;
        self.complete(token, IoResult::Opened(fd));
    }

    fn file_close(&mut self, token: IoToken, fd: i32) {
        if Some(fd) == self.image_fd {
            self.image_fd = None;
        }
        self.complete(token, IoResult::Closed);
    }

    fn file_read(&mut self, token: IoToken, fd: i32, len: usize) {
        if Some(fd) == self.image_fd {
            let start = self.disk_cursor.min(self.disk.len());
            let end = (start + len).min(self.disk.len());
            let data = self.disk[start..end].to_vec();
            self.disk_cursor = end;
            self.complete(token, IoResult::Read(data));
        } else {
            self.complete(token, IoResult::Failed);
        }
    }

    fn file_write(&mut self, token: IoToken, fd: i32, data: Vec<u8>) {
        if Some(fd) == self.image_fd {
            let start = self.disk_cursor;
            let end = start + data.len();
            if end > self.disk.len() {
                self.disk.resize(end, 0);
            }
            self.disk[start..end].copy_from_slice(&data);
            self.disk_cursor = end;
            self.complete(token, IoResult::Wrote(data.len()));
        } else if fd == STDOUT_FILENO || fd == STDERR_FILENO {
            self.console_out.extend_from_slice(&data);
            self.complete(token, IoResult::Wrote(data.len()));
        } else {
            self.complete(token, IoResult::Failed);
        }
    }

    fn file_seek(&mut self, token: IoToken, fd: i32, offset: i32, whence: SeekWhence) {
        if Some(fd) != self.image_fd {
            self.complete(token, IoResult::Failed);
            return;
        }
        let base: i64 = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Current => self.disk_cursor as i64,
            SeekWhence::End => self.disk.len() as i64,
        };
        let new_pos = (base + offset as i64).max(0) as usize;
        self.disk_cursor = new_pos;
        self.complete(token, IoResult::Sought(new_pos as i32));
    }

    fn terminate(&mut self) {}

    fn advance(&mut self) {
        self.tick();
    }

    fn poll_completions(&mut self) -> Vec<IoCompletion> {
        std::mem::take(&mut self.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry(_: usize) {}

    #[test]
    fn synchronous_machine_resolves_immediately() {
        let mut m = SimMachine::new(vec![0; 512]);
        m.file_open(IoToken(1), "disk.img", OpenFlags::RDWR, 0);
        let completions = m.poll_completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].token, IoToken(1));
        assert!(matches!(completions[0].result, IoResult::Opened(_)));
    }

    #[test]
    fn delayed_machine_withholds_completion_until_ticks_elapse() {
        let mut m = SimMachine::with_delay(vec![0; 512], 2);
        m.file_open(IoToken(7), "disk.img", OpenFlags::RDWR, 0);
        assert!(m.poll_completions().is_empty());
        m.tick();
        assert!(m.poll_completions().is_empty());
        m.tick();
        let completions = m.poll_completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].token, IoToken(7));
    }

    #[test]
    fn write_then_read_round_trips_through_the_disk_image() {
        let mut m = SimMachine::new(vec![0; 1024]);
        m.file_open(IoToken(1), "disk.img", OpenFlags::RDWR, 0);
        let fd = match m.poll_completions().remove(0).result {
            IoResult::Opened(fd) => fd,
            other => panic!("unexpected {:?}", other),
        };
        m.file_write(IoToken(2), fd, vec![1, 2, 3, 4]);
        m.poll_completions();
        m.file_seek(IoToken(3), fd, 0, SeekWhence::Set);
        m.poll_completions();
        m.file_read(IoToken(4), fd, 4);
        match m.poll_completions().remove(0).result {
            IoResult::Read(data) => assert_eq!(data, vec![1, 2, 3, 4]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn console_writes_are_captured_not_sent_to_disk() {
        let mut m = SimMachine::new(vec![0; 512]);
        m.file_write(IoToken(1), STDOUT_FILENO, b"hello".to_vec());
        m.poll_completions();
        assert_eq!(m.stdout(), b"hello");
    }

    #[test]
    fn context_create_records_entry_and_arg() {
        let mut m = SimMachine::new(vec![0; 512]);
        let ctx = m.context_create(noop_entry, 42, 256);
        assert_eq!(ctx.arg, 42);
        assert_eq!(m.contexts_created(), 1);
    }
}
