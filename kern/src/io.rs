//! The async I/O bridge: wraps every machine call that takes a callback as
//! "mint a token, park the caller, resume when the token's completion
//! shows up."
//!
//! A busy-wait on close is a bug pattern, not a feature worth preserving.
//! This bridge treats open, close, read, write, and seek identically --
//! there is no separate code path for close at all.

use std::collections::HashMap;

use abi::ThreadId;

use crate::machine::{IoCompletion, IoResult, IoToken};

/// Tracks which thread is parked on each outstanding machine call.
#[derive(Default)]
pub struct IoBridge {
    next_token: u64,
    pending: HashMap<IoToken, ThreadId>,
}

impl IoBridge {
    pub fn new() -> Self {
        IoBridge {
            next_token: 0,
            pending: HashMap::new(),
        }
    }

    /// Mints a fresh token and records that `thread` is parked on it. The
    /// caller is responsible for actually issuing the matching `Machine`
    /// call with this token and for moving `thread` into
    /// `ThreadState::WaitingForIo`.
    pub fn begin(&mut self, thread: ThreadId) -> IoToken {
        let token = IoToken(self.next_token);
        self.next_token += 1;
        self.pending.insert(token, thread);
        token
    }

    /// Matches a batch of drained machine completions back to the threads
    /// parked on them. Completions for unknown tokens (there are none in
    /// practice, but a stale token is not a panic) are silently dropped.
    pub fn absorb(&mut self, completions: Vec<IoCompletion>) -> Vec<(ThreadId, IoResult)> {
        completions
            .into_iter()
            .filter_map(|c| {
                self.pending
                    .remove(&c.token)
                    .map(|thread| (thread, c.result))
            })
            .collect()
    }

    /// Forgets a parked call, for use when its thread is deleted out from
    /// under a pending I/O operation.
    pub fn cancel_for_thread(&mut self, thread: ThreadId) {
        self.pending.retain(|_, &mut t| t != thread);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_resolve_to_the_parked_thread() {
        let mut bridge = IoBridge::new();
        let token = bridge.begin(ThreadId(5));
        let woken = bridge.absorb(vec![IoCompletion {
            token,
            result: IoResult::Closed,
        }]);
        assert_eq!(woken, vec![(ThreadId(5), IoResult::Closed)]);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn unrelated_tokens_do_not_interfere() {
        let mut bridge = IoBridge::new();
        let a = bridge.begin(ThreadId(1));
        let _b = bridge.begin(ThreadId(2));
        let woken = bridge.absorb(vec![IoCompletion {
            token: a,
            result: IoResult::Wrote(4),
        }]);
        assert_eq!(woken.len(), 1);
        assert_eq!(woken[0].0, ThreadId(1));
        assert_eq!(bridge.pending_count(), 1);
    }

    #[test]
    fn cancel_for_thread_drops_its_pending_call() {
        let mut bridge = IoBridge::new();
        bridge.begin(ThreadId(9));
        bridge.cancel_for_thread(ThreadId(9));
        assert_eq!(bridge.pending_count(), 0);
    }
}
