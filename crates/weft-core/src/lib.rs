//! Shared plumbing for the weft concurrency primitives.
//!
//! This crate holds the pieces that both `weft-coroutine` and `weft-channel`
//! rely on:
//!
//! - `fatal` - one overridable diagnostic hook for unrecoverable programming
//!   and resource errors
//! - `dispatch` - per-element-type dispatch tables with process-wide pointer
//!   identity
//!
//! # Error Classes
//!
//! The primitives distinguish two disjoint error classes:
//!
//! - **Fatal**: allocation or spawn failure, resuming a finished or running
//!   coroutine, constructing a zero-capacity channel. These route through
//!   [`fatal`](fatal::fatal) and terminate the process (or a substituted
//!   hook); silent continuation is never allowed.
//! - **Recoverable**: a full, empty, or closed channel. These always surface
//!   as ordinary return values from the operation that hit them and are never
//!   routed through this crate.

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod dispatch;
pub mod fatal;

pub use dispatch::{table_of, DispatchTable};
pub use fatal::{fatal, reset_fatal_hook, set_fatal_hook, FatalError, FatalHook};

/// Default stack size for a coroutine, in bytes (2 MiB).
///
/// Used by `weft-coroutine` when the builder does not specify a size.
/// Channel capacity has no analogous default; it is always supplied
/// explicitly per instance.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
