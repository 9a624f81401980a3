//! Guest application support library.
//!
//! This contains ergonomic wrappers around the runtime's VM call surface,
//! and re-exports the contents of the `abi` crate that gets shared with
//! the kernel.
//!
//! # No register marshalling here
//!
//! A `userlib` crate usually exists to turn a cross-task IPC send into
//! something callable, because the caller and the kernel do not share an
//! address space. This workspace's guest and runtime *do* share an address
//! space -- the guest is just another Rust caller of `kern::Runtime` -- so
//! there is no syscall stub, no lease, and no message encoding to do. What
//! is left of that job is just `hl`: a more ergonomic interface than the
//! raw call.

pub use abi::*;
pub use kern::machine::Machine;
pub use kern::runtime::Runtime;

pub mod hl;
