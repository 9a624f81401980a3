//! Common error-handling support.
//!
//! This module is designed around the idea that runtime code spends too much
//! time handling and recording errors, and we ought to be able to separate
//! that concern using `Result`. Every variant here has a direct, lossy
//! mapping onto `abi::VMStatus`, which is the only thing a guest ever sees.

use abi::VMStatus;

/// Internal error type produced throughout the runtime. Collapses to a
/// guest-visible `VMStatus` at the VM call boundary and nowhere else.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VmError {
    /// A caller-supplied argument was malformed (null reference, forbidden
    /// sentinel, out-of-range tick count, name too long, ...).
    InvalidParameter,
    /// A caller named a thread, mutex, or descriptor that does not exist.
    InvalidId,
    /// The operation is not legal in the current state (release of an
    /// unowned mutex, delete of a locked mutex, activation of a non-dead
    /// thread, read from a write-only descriptor, ...).
    InvalidState,
    /// A lower-level failure: machine I/O, FAT exhaustion, directory
    /// semantics violation, or any other condition that isn't better
    /// described by the variants above.
    Failure,
}

impl VmError {
    pub fn into_status(self) -> VMStatus {
        match self {
            VmError::InvalidParameter => VMStatus::ErrorInvalidParameter,
            VmError::InvalidId => VMStatus::ErrorInvalidId,
            VmError::InvalidState => VMStatus::ErrorInvalidState,
            VmError::Failure => VMStatus::Failure,
        }
    }
}

/// Converts a `Result<(), VmError>`-shaped call outcome into the guest ABI's
/// status code, collapsing `Ok` to `Success`.
pub fn status_of(result: Result<(), VmError>) -> VMStatus {
    match result {
        Ok(()) => VMStatus::Success,
        Err(e) => e.into_status(),
    }
}

pub type VmResult<T> = Result<T, VmError>;
