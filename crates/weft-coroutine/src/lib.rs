//! Stackful coroutines with explicit suspend/resume and value exchange.
//!
//! A [`Coroutine`] is an execution unit with its own call stack that can
//! suspend mid-call-chain and later resume exactly where it left off - the
//! property that separates it from a restart-from-top generator. Scheduling
//! is strictly cooperative: exactly one of {caller, coroutine} runs at any
//! instant, and control transfers only at [`Coroutine::resume`] and
//! [`Yielder::yield_value`] call sites.
//!
//! Each coroutine owns a dedicated, named OS thread created with an explicit
//! stack size; the thread *is* the coroutine's stack, and the two sides hand
//! control back and forth through a mutex/condvar turn protocol. The body
//! does not run at all until the first resume.
//!
//! # Lifecycle
//!
//! ```text
//!             resume              yield
//!               |                   |
//!               v                   v
//! +---------+      +---------+           +-----------+
//! | Created | ---> | Running | <-------> | Suspended |
//! +---------+      +---------+           +-----------+
//!                       |  body returns
//!                       v
//!                 +----------+
//!                 | Finished |  (terminal)
//!                 +----------+
//! ```
//!
//! `Finished` is irreversible. Resuming a finished or already-running
//! coroutine is a programming error and is routed through the fatal hook.
//! There is no cancellation: a coroutine runs to completion or is abandoned
//! by its owner, and an abandoned coroutine's thread and stack leak (see
//! [`Coroutine`]'s drop behavior).
//!
//! # Yield values
//!
//! Yields carry a typed payload `Y` through a single-buffered slot: only the
//! most recent yield is retained, and [`Coroutine::take_yield`] consumes it.
//! The slot is typed at construction, so retrieving a payload can never
//! misinterpret its bytes.
//!
//! # Example
//!
//! ```
//! use weft_coroutine::{Coroutine, Yielder};
//!
//! let mut squares = Coroutine::spawn(|y: &Yielder<u32>| {
//!     for i in 0..4 {
//!         y.yield_value(i * i);
//!     }
//! });
//!
//! let mut seen = Vec::new();
//! while squares.resume() {
//!     seen.push(squares.take_yield().unwrap());
//! }
//! assert_eq!(seen, [0, 1, 4, 9]);
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use weft_core::{DispatchTable, DEFAULT_STACK_SIZE};

/// Unique identifier for a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineId(u64);

impl CoroutineId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw ID value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coro({})", self.0)
    }
}

/// State of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Created; the body has not run yet.
    Created,
    /// Currently executing (the caller is inside `resume`).
    Running,
    /// Suspended at a yield point, waiting for the next resume.
    Suspended,
    /// The body returned. Terminal.
    Finished,
}

impl CoroutineState {
    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Whose turn it is to execute. The non-owner side waits on its condvar.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Turn {
    Caller,
    Coroutine,
}

/// Handoff state shared between the caller and the coroutine thread.
struct Handoff<Y> {
    state: CoroutineState,
    turn: Turn,
    /// Single-buffered yield slot; only the most recent yield is retained.
    slot: Option<Y>,
    /// Panic payload captured from the body, re-raised in the caller.
    panic: Option<Box<dyn Any + Send>>,
}

struct Shared<Y> {
    handoff: Mutex<Handoff<Y>>,
    /// Signalled when control passes to the caller.
    caller_cv: Condvar,
    /// Signalled when control passes to the coroutine.
    coroutine_cv: Condvar,
}

/// Configures and spawns a [`Coroutine`].
///
/// ```
/// use weft_coroutine::{Builder, Yielder};
///
/// let mut coro = Builder::new()
///     .name("pager")
///     .stack_size(256 * 1024)
///     .spawn(|y: &Yielder<&str>| y.yield_value("page"));
/// assert!(coro.resume());
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    /// Start configuring a coroutine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the coroutine's thread (useful in panic messages and traces).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes. Zero (or unset) means
    /// [`DEFAULT_STACK_SIZE`](weft_core::DEFAULT_STACK_SIZE).
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = if bytes == 0 { None } else { Some(bytes) };
        self
    }

    /// Allocate the stack and control state for `body` without running it.
    ///
    /// The coroutine starts in [`CoroutineState::Created`]; the first
    /// [`Coroutine::resume`] enters the body. Failure to spawn the backing
    /// thread is fatal.
    pub fn spawn<Y, F>(self, body: F) -> Coroutine<Y>
    where
        Y: Send + 'static,
        F: FnOnce(&Yielder<Y>) + Send + 'static,
    {
        let id = CoroutineId::next();
        let shared = Arc::new(Shared {
            handoff: Mutex::new(Handoff {
                state: CoroutineState::Created,
                turn: Turn::Caller,
                slot: None,
                panic: None,
            }),
            caller_cv: Condvar::new(),
            coroutine_cv: Condvar::new(),
        });

        let name = self
            .name
            .unwrap_or_else(|| format!("weft-coro-{}", id.raw()));
        let stack_size = self.stack_size.unwrap_or(DEFAULT_STACK_SIZE);

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(move || coroutine_main(id, thread_shared, body));

        let handle = match handle {
            Ok(handle) => handle,
            Err(error) => weft_core::fatal(format!("{id}: failed to allocate stack: {error}")),
        };

        tracing::trace!(%id, stack_size, "coroutine created");

        Coroutine {
            id,
            shared,
            thread: Some(handle),
            table: weft_core::table_of::<Y>(),
        }
    }
}

/// Entry wrapper running on the coroutine's own stack.
fn coroutine_main<Y, F>(id: CoroutineId, shared: Arc<Shared<Y>>, body: F)
where
    Y: Send + 'static,
    F: FnOnce(&Yielder<Y>) + Send + 'static,
{
    // The body must not run while Created: park until the first resume.
    {
        let mut handoff = shared.handoff.lock();
        while handoff.turn != Turn::Coroutine {
            shared.coroutine_cv.wait(&mut handoff);
        }
    }

    let yielder = Yielder {
        id,
        shared: Arc::clone(&shared),
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| body(&yielder)));

    let mut handoff = shared.handoff.lock();
    handoff.state = CoroutineState::Finished;
    if let Err(payload) = outcome {
        handoff.panic = Some(payload);
    }
    handoff.turn = Turn::Caller;
    shared.caller_cv.notify_one();
    tracing::trace!(%id, "coroutine finished");
}

/// Suspension handle lent to a coroutine body.
///
/// Only the body ever holds one, so yielding from outside the running
/// coroutine is unrepresentable.
pub struct Yielder<Y> {
    id: CoroutineId,
    shared: Arc<Shared<Y>>,
}

impl<Y> Yielder<Y> {
    /// Suspend the coroutine, leaving `payload` for the caller.
    ///
    /// Stores the payload in the single-buffered slot (replacing any
    /// unconsumed previous payload), transfers control back to the caller,
    /// and returns on the next resume with all local state intact.
    pub fn yield_value(&self, payload: Y) {
        let mut handoff = self.shared.handoff.lock();
        handoff.slot = Some(payload);
        handoff.state = CoroutineState::Suspended;
        handoff.turn = Turn::Caller;
        self.shared.caller_cv.notify_one();
        tracing::trace!(id = %self.id, "suspended");

        while handoff.turn != Turn::Coroutine {
            self.shared.coroutine_cv.wait(&mut handoff);
        }
    }
}

/// A stackful coroutine yielding values of type `Y`.
///
/// See the [crate docs](crate) for the lifecycle and suspension contract.
pub struct Coroutine<Y> {
    id: CoroutineId,
    shared: Arc<Shared<Y>>,
    thread: Option<JoinHandle<()>>,
    table: &'static DispatchTable,
}

impl<Y: Send + 'static> Coroutine<Y> {
    /// Spawn a coroutine with the default stack size.
    ///
    /// Shorthand for [`Builder::new().spawn(body)`](Builder::spawn). The
    /// body receives a [`Yielder`] to suspend through; arguments are closure
    /// captures.
    pub fn spawn<F>(body: F) -> Self
    where
        F: FnOnce(&Yielder<Y>) + Send + 'static,
    {
        Builder::new().spawn(body)
    }
}

impl<Y> Coroutine<Y> {
    /// This coroutine's ID.
    #[must_use]
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CoroutineState {
        self.shared.handoff.lock().state
    }

    /// Run the coroutine until it next suspends or finishes.
    ///
    /// Returns `true` if it suspended (still resumable) and `false` if the
    /// body returned. Resuming a [`Finished`](CoroutineState::Finished) or
    /// already-[`Running`](CoroutineState::Running) coroutine is fatal. If
    /// the body panicked, the payload is re-raised here.
    pub fn resume(&mut self) -> bool {
        let mut handoff = self.shared.handoff.lock();
        match handoff.state {
            CoroutineState::Finished => {
                drop(handoff);
                weft_core::fatal(format!("{}: resumed a finished coroutine", self.id));
            }
            CoroutineState::Running => {
                drop(handoff);
                weft_core::fatal(format!("{}: reentrant resume", self.id));
            }
            CoroutineState::Created | CoroutineState::Suspended => {}
        }

        handoff.state = CoroutineState::Running;
        handoff.turn = Turn::Coroutine;
        self.shared.coroutine_cv.notify_one();
        tracing::trace!(id = %self.id, "resumed");

        while handoff.turn != Turn::Caller {
            self.shared.caller_cv.wait(&mut handoff);
        }

        if let Some(payload) = handoff.panic.take() {
            drop(handoff);
            std::panic::resume_unwind(payload);
        }

        debug_assert!(handoff.state != CoroutineState::Running);
        handoff.state == CoroutineState::Suspended
    }

    /// Take the most recently yielded payload, if one is pending.
    ///
    /// The slot is single-buffered: a yield that was never taken is replaced
    /// by the next one, and taking empties the slot.
    pub fn take_yield(&mut self) -> Option<Y> {
        self.shared.handoff.lock().slot.take()
    }

    /// The shared dispatch table for this coroutine's yield type.
    ///
    /// Pointer-identical across every instance with the same yield type.
    #[must_use]
    pub fn dispatch(&self) -> &'static DispatchTable {
        self.table
    }
}

impl<Y> Drop for Coroutine<Y> {
    /// Releases the coroutine's resources.
    ///
    /// A finished coroutine's thread is joined and its stack freed. Dropping
    /// an unfinished coroutine abandons it: the suspended thread and its
    /// stack leak, since unwinding it from outside would be the cancellation
    /// this primitive does not provide. Finish or drain coroutines before
    /// dropping them.
    fn drop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        if self.shared.handoff.lock().state.is_terminal() {
            let _ = handle.join();
        } else {
            tracing::debug!(id = %self.id, "abandoning unfinished coroutine; its stack leaks");
        }
    }
}

impl<Y> fmt::Debug for Coroutine<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("yield_type", &self.table.type_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_until_first_resume() {
        let coro = Coroutine::spawn(|y: &Yielder<i32>| y.yield_value(1));
        assert_eq!(coro.state(), CoroutineState::Created);
        // Never resumed: the body must not have run. Dropping abandons it.
    }

    #[test]
    fn yields_in_order_then_finishes() {
        let mut coro = Coroutine::spawn(|y: &Yielder<i32>| {
            for i in 0..5 {
                y.yield_value(i * 10);
            }
        });

        for expected in [0, 10, 20, 30, 40] {
            assert!(coro.resume());
            assert_eq!(coro.state(), CoroutineState::Suspended);
            assert_eq!(coro.take_yield(), Some(expected));
        }

        assert!(!coro.resume());
        assert_eq!(coro.state(), CoroutineState::Finished);
    }

    #[test]
    fn resumes_continue_after_each_yield_point() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let body_log = Arc::clone(&log);

        let mut coro = Coroutine::spawn(move |y: &Yielder<()>| {
            body_log.lock().push("a");
            y.yield_value(());
            body_log.lock().push("b");
            y.yield_value(());
            body_log.lock().push("c");
        });

        assert!(coro.resume());
        assert_eq!(*log.lock(), ["a"]);
        assert!(coro.resume());
        assert_eq!(*log.lock(), ["a", "b"]);
        assert!(!coro.resume());
        assert_eq!(*log.lock(), ["a", "b", "c"]);
    }

    #[test]
    fn locals_survive_suspension() {
        let mut coro = Coroutine::spawn(|y: &Yielder<u64>| {
            let mut acc = 0;
            for i in 1..=4 {
                acc += i;
                y.yield_value(acc);
            }
        });

        let mut seen = Vec::new();
        while coro.resume() {
            seen.push(coro.take_yield().unwrap());
        }
        assert_eq!(seen, [1, 3, 6, 10]);
    }

    #[test]
    fn yield_slot_keeps_only_the_most_recent_payload() {
        let mut coro = Coroutine::spawn(|y: &Yielder<i32>| {
            y.yield_value(1);
            y.yield_value(2);
        });

        assert!(coro.resume());
        // First payload deliberately not taken.
        assert!(coro.resume());
        assert_eq!(coro.take_yield(), Some(2));
        assert_eq!(coro.take_yield(), None);
        assert!(!coro.resume());
    }

    #[test]
    fn take_yield_before_any_yield_is_none() {
        let mut coro = Coroutine::spawn(|y: &Yielder<i32>| y.yield_value(9));
        assert_eq!(coro.take_yield(), None);
        assert!(coro.resume());
        assert_eq!(coro.take_yield(), Some(9));
    }

    #[test]
    fn finished_state_is_terminal() {
        let mut coro = Coroutine::spawn(|_: &Yielder<()>| {});
        assert!(!coro.resume());
        assert_eq!(coro.state(), CoroutineState::Finished);
        assert!(coro.state().is_terminal());
        assert_eq!(coro.state(), CoroutineState::Finished);
    }

    #[test]
    #[should_panic(expected = "finished coroutine")]
    fn resuming_a_finished_coroutine_is_fatal() {
        fn panicking_hook(error: &weft_core::FatalError) -> ! {
            panic!("{error}")
        }
        weft_core::set_fatal_hook(panicking_hook);

        let mut coro = Coroutine::spawn(|_: &Yielder<()>| {});
        assert!(!coro.resume());
        coro.resume();
    }

    #[test]
    #[should_panic(expected = "worker exploded")]
    fn body_panic_resurfaces_in_resume() {
        let mut coro = Coroutine::spawn(|y: &Yielder<i32>| {
            y.yield_value(1);
            panic!("worker exploded");
        });

        assert!(coro.resume());
        coro.resume();
    }

    #[test]
    fn named_builder_spawn() {
        let mut coro = Builder::new()
            .name("doubler")
            .stack_size(128 * 1024)
            .spawn(|y: &Yielder<i32>| {
                y.yield_value(2);
                y.yield_value(4);
            });

        assert!(coro.resume());
        assert_eq!(coro.take_yield(), Some(2));
        assert!(coro.resume());
        assert_eq!(coro.take_yield(), Some(4));
        assert!(!coro.resume());
    }

    #[test]
    fn dispatch_table_shared_across_instances() {
        let a = Coroutine::spawn(|_: &Yielder<String>| {});
        let b = Coroutine::spawn(|_: &Yielder<String>| {});
        assert!(std::ptr::eq(a.dispatch(), b.dispatch()));

        let c = Coroutine::spawn(|_: &Yielder<u8>| {});
        assert!(!std::ptr::eq(a.dispatch(), c.dispatch()));
    }
}
