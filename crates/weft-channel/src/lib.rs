//! Bounded, closable FIFO channel.
//!
//! A [`Channel`] is a fixed-capacity ring buffer with an open/closed flag.
//! Values leave in exactly the order they entered. Closing is terminal and
//! idempotent: it stops new sends immediately, wakes everything blocked on
//! the channel, and lets receivers drain whatever is still buffered before
//! they ever see "empty".
//!
//! # State Machine
//!
//! ```text
//! +------+  close()   +--------+
//! | Open | ---------> | Closed |  (terminal)
//! +------+            +--------+
//! ```
//!
//! While open, `send` blocks on a full buffer and `recv` blocks on an empty
//! one; the blocking is condvar-based, never a spin loop. Once closed, `send`
//! always fails with the rejected value, and `recv` drains the backlog in
//! FIFO order before reporting `None` forever after.
//!
//! A full, empty, or closed channel is an expected runtime condition and is
//! always reported through the return value - these paths never terminate
//! the process. The one fatal condition is constructing a channel with zero
//! capacity.
//!
//! # Sharing
//!
//! `Channel<T>` is `Sync`; producers and consumers on other threads share it
//! through `Arc` or a scoped borrow. Note that a non-blocking `try_recv`
//! returning `None` does not by itself distinguish "empty but open" from
//! "empty and closed"; pair it with [`Channel::is_closed`].
//!
//! # Example
//!
//! ```
//! use weft_channel::Channel;
//!
//! let chan = Channel::with_capacity(5);
//! chan.send(10).unwrap();
//! chan.send(20).unwrap();
//! chan.close();
//!
//! assert_eq!(chan.recv(), Some(10));
//! assert_eq!(chan.recv(), Some(20));
//! assert_eq!(chan.recv(), None);
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use weft_core::DispatchTable;

mod error;

pub use error::{SendError, TrySendError};

/// Ring-buffer occupancy and the closed flag; the only contended state.
struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn push(&mut self, value: T) {
        let tail = (self.head + self.len) % self.slots.len();
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(value);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        debug_assert!(value.is_some());
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }
}

/// A bounded FIFO channel that can be closed.
///
/// See the [crate docs](crate) for the full contract.
pub struct Channel<T> {
    ring: CachePadded<Mutex<Ring<T>>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    table: &'static DispatchTable,
}

impl<T: 'static> Channel<T> {
    /// Create an open channel holding at most `capacity` values.
    ///
    /// `capacity` must be at least 1; a zero capacity is a programming error
    /// and is routed through the fatal hook.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            weft_core::fatal("channel capacity must be at least 1");
        }
        let slots: Vec<Option<T>> = (0..capacity).map(|_| None).collect();
        Self {
            ring: CachePadded::new(Mutex::new(Ring {
                slots: slots.into_boxed_slice(),
                head: 0,
                len: 0,
                closed: false,
            })),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            table: weft_core::table_of::<T>(),
        }
    }
}

impl<T> Channel<T> {
    /// Send a value, blocking while the buffer is full and the channel open.
    ///
    /// Returns `Err` with the rejected value if the channel is closed,
    /// whether it was closed on entry or while this call was blocked.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut ring = self.ring.lock();
        loop {
            if ring.closed {
                return Err(SendError(value));
            }
            if ring.len < self.capacity {
                ring.push(value);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut ring);
        }
    }

    /// Send without blocking.
    ///
    /// Returns [`TrySendError::Full`] when the buffer is full and the channel
    /// open, [`TrySendError::Closed`] when the channel is closed; both carry
    /// the rejected value.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut ring = self.ring.lock();
        if ring.closed {
            return Err(TrySendError::Closed(value));
        }
        if ring.len == self.capacity {
            return Err(TrySendError::Full(value));
        }
        ring.push(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Receive the oldest buffered value, blocking while the channel is
    /// empty and open.
    ///
    /// Buffered values are returned in FIFO order regardless of the closed
    /// flag: a closed channel drains its backlog completely before this
    /// returns `None`. On an empty closed channel, returns `None`
    /// immediately.
    pub fn recv(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        loop {
            if let Some(value) = ring.pop() {
                self.not_full.notify_one();
                return Some(value);
            }
            if ring.closed {
                return None;
            }
            self.not_empty.wait(&mut ring);
        }
    }

    /// Receive without blocking.
    ///
    /// Returns `None` when nothing is immediately available; combine with
    /// [`Channel::is_closed`] to tell "empty but open" from "empty and
    /// closed".
    pub fn try_recv(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        let value = ring.pop();
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    /// Close the channel.
    ///
    /// Idempotent. After this, every send fails, and receivers drain the
    /// remaining backlog before seeing `None`. Every context currently
    /// blocked in [`Channel::send`] or [`Channel::recv`] is woken so it can
    /// re-observe the state.
    pub fn close(&self) {
        let mut ring = self.ring.lock();
        if !ring.closed {
            ring.closed = true;
            tracing::trace!(
                element = self.table.type_name(),
                backlog = ring.len,
                "channel closed"
            );
        }
        drop(ring);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Whether [`Channel::close`] has been called, independent of occupancy.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    /// Number of values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    /// Whether the buffer currently holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer currently holds `capacity` values.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// The fixed capacity this channel was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The shared dispatch table for this channel's element type.
    ///
    /// Pointer-identical across every instance with the same element type.
    #[must_use]
    pub fn dispatch(&self) -> &'static DispatchTable {
        self.table
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("Channel")
            .field("element", &self.table.type_name())
            .field("capacity", &self.capacity)
            .field("len", &ring.len)
            .field("closed", &ring.closed)
            .finish()
    }
}
