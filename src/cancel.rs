//! External cancellation signal shared between a harness and its workers.
//!
//! Two flags, not one: `quit` is the hard stop ("drop whatever you are
//! doing"), `should_quit` is the soft stop ("finish the current transaction,
//! then stop retrying"). Workers poll `should_quit` once per transaction
//! attempt and `quit` inside any busy-wait loop that could otherwise spin
//! forever under adversarial scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Flags {
    quit: AtomicBool,
    should_quit: AtomicBool,
}

/// A cheaply-cloneable handle to a shared cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flags: Arc<Flags>,
}

impl CancelToken {
    /// Create a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that workers stop starting new transaction attempts.
    pub fn request_quit(&self) {
        self.flags.should_quit.store(true, Ordering::Release);
    }

    /// Request that workers abandon whatever they are doing immediately.
    pub fn request_hard_quit(&self) {
        self.flags.should_quit.store(true, Ordering::Release);
        self.flags.quit.store(true, Ordering::Release);
    }

    /// Whether workers should stop beginning new attempts.
    #[inline]
    pub fn should_quit(&self) -> bool {
        self.flags.should_quit.load(Ordering::Acquire)
    }

    /// Whether a busy-wait loop should bail out now rather than spin.
    #[inline]
    pub fn quit(&self) -> bool {
        self.flags.quit.load(Ordering::Acquire)
    }
}
