//! The machine collaborator: asynchronous block-device I/O, context
//! creation/switching, and the tick alarm.
//!
//! The host that embeds this runtime owns this contract; this trait makes
//! it concrete enough to test against. [`sim`] provides the one
//! implementation this workspace ships, an in-memory stand-in used by every
//! test.

use abi::{OpenFlags, SeekWhence};

use crate::task::ThreadEntry;

pub mod sim;

/// Identifies one pending asynchronous machine call. Minted by the I/O
/// bridge (`io::begin`), echoed back unchanged in the matching
/// `IoCompletion`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct IoToken(pub u64);

/// The result half of a completed machine I/O call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IoResult {
    Opened(i32),
    Closed,
    Read(Vec<u8>),
    Wrote(usize),
    Sought(i32),
    Failed,
}

/// One drained completion: which call finished, and how.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IoCompletion {
    pub token: IoToken,
    pub result: IoResult,
}

/// Raw primitives the runtime asks of its host: asynchronous file I/O,
/// thread context management, and the recurring tick alarm.
///
/// Every `file_*` method is fire-and-forget: it takes an `IoToken` and
/// returns nothing. The eventual result is collected later by
/// `poll_completions`, modeling a machine that signals completion from an
/// unspecified execution context.
pub trait Machine {
    /// Opaque saved execution state for one thread, round-tripped by the
    /// runtime but never inspected.
    type Context;

    fn context_create(&mut self, entry: ThreadEntry, arg: usize, stack_size: usize) -> Self::Context;

    /// Switches away from `from` (`None` only on the very first switch
    /// out of bootstrap, which has no prior context to save) and into
    /// `to`.
    fn context_switch(&mut self, from: Option<&mut Self::Context>, to: &mut Self::Context);

    /// Requests a recurring alarm, firing roughly every `period_ms`.
    fn request_alarm(&mut self, period_ms: u32);

    fn file_open(&mut self, token: IoToken, path: &str, flags: OpenFlags, mode: u32);
    fn file_close(&mut self, token: IoToken, fd: i32);
    fn file_read(&mut self, token: IoToken, fd: i32, len: usize);
    fn file_write(&mut self, token: IoToken, fd: i32, data: Vec<u8>);
    fn file_seek(&mut self, token: IoToken, fd: i32, offset: i32, whence: SeekWhence);

    fn terminate(&mut self);

    /// Gives the machine a chance to make progress on outstanding work.
    /// The async I/O bridge calls this in a loop while waiting for a
    /// specific completion to surface, so a machine backed by real
    /// asynchronous I/O would block here; `sim::SimMachine` ages its
    /// delayed-completion queue by one step instead.
    fn advance(&mut self);

    /// Drains every I/O completion that has occurred since the last call.
    /// The runtime calls this at every VM-call entry and at each tick, so
    /// a completion delivered from a signal-context callback is never
    /// missed between calls.
    fn poll_completions(&mut self) -> Vec<IoCompletion>;
}
