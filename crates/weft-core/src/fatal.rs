//! Fatal-error diagnostics.
//!
//! Unrecoverable conditions (invalid resume, zero channel capacity, failed
//! thread spawn) are routed through a single process-wide hook. The default
//! hook prints the diagnostic and aborts; tests typically substitute a hook
//! that panics so the condition becomes observable with `#[should_panic]`.

use parking_lot::RwLock;
use std::panic::Location;
use std::process;

/// A fatal diagnostic: what went wrong and where it was triggered.
#[derive(Debug, thiserror::Error)]
#[error("{message} ({location})")]
pub struct FatalError {
    message: String,
    location: &'static Location<'static>,
}

impl FatalError {
    /// The diagnostic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source location of the call that raised the error.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// Handler invoked for every fatal error. Must diverge.
pub type FatalHook = fn(&FatalError) -> !;

fn default_hook(error: &FatalError) -> ! {
    eprintln!("weft: fatal error: {error}");
    process::abort()
}

/// Global fatal hook storage.
static HOOK: RwLock<FatalHook> = RwLock::new(default_hook as FatalHook);

/// Replace the fatal hook.
///
/// The hook receives the diagnostic after it has been logged and must not
/// return; aborting, exiting, and panicking are all acceptable.
pub fn set_fatal_hook(hook: FatalHook) {
    *HOOK.write() = hook;
}

/// Restore the default print-and-abort hook.
pub fn reset_fatal_hook() {
    *HOOK.write() = default_hook;
}

/// Raise a fatal error at the caller's source location.
///
/// Logs the diagnostic through `tracing`, then hands it to the installed
/// hook. Never returns.
#[track_caller]
pub fn fatal(message: impl Into<String>) -> ! {
    let error = FatalError {
        message: message.into(),
        location: Location::caller(),
    };
    tracing::error!("fatal error: {}", error);
    let hook = *HOOK.read();
    hook(&error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panicking_hook(error: &FatalError) -> ! {
        panic!("{error}")
    }

    #[test]
    fn hook_intercepts_fatal() {
        set_fatal_hook(panicking_hook);
        let result = std::panic::catch_unwind(|| fatal("boom"));
        reset_fatal_hook();

        let payload = result.expect_err("fatal must not return");
        let message = payload.downcast_ref::<String>().expect("panic message");
        assert!(message.contains("boom"));
        assert!(message.contains("fatal.rs"), "diagnostic carries a location");
    }
}
