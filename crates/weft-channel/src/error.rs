//! Error values returned by channel send operations.
//!
//! Both errors hand the rejected value back to the caller, so a failed send
//! never loses data. Receive operations have no error type; they report
//! through `Option` instead.

use std::error::Error;
use std::fmt;

/// A blocking `send` failed because the channel is closed.
///
/// Carries the value that could not be enqueued.
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the value that failed to send.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SendError(..)")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sending on a closed channel")
    }
}

impl<T> Error for SendError<T> {}

/// A `try_send` failed; the channel is either full or closed.
///
/// Either variant carries the value that could not be enqueued. `Full` is
/// the would-block condition: the buffer is at capacity but the channel is
/// still open.
pub enum TrySendError<T> {
    /// The buffer is at capacity and the channel is open.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that failed to send.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    /// Whether the failure was a full (but open) buffer.
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Whether the failure was a closed channel.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> From<SendError<T>> for TrySendError<T> {
    fn from(error: SendError<T>) -> Self {
        Self::Closed(error.0)
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "Full(..)"),
            Self::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "sending on a full channel"),
            Self::Closed(_) => write!(f, "sending on a closed channel"),
        }
    }
}

impl<T> Error for TrySendError<T> {}
