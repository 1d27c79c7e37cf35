//! Transaction outcomes and fatal error types.
//!
//! A protocol attempt ends in one of four ways: it commits, it aborts
//! voluntarily (a normal, expected outcome that the caller retries), it is
//! cancelled by an external shutdown signal, or it hits a local protocol
//! error that indicates a bug or resource exhaustion rather than contention.
//! Only the last of these is an `Err`.

use thiserror::Error;

/// Why a transaction aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock request would have to wait and the protocol forbids waiting
    /// (No-Wait), or waiting would violate priority (Wait-Die).
    WouldBlock,
    /// A higher-priority transaction holds or is waiting on a mutex this
    /// transaction needs (Wait-Die "die" case).
    YoungerDies,
    /// Optimistic validation failed at precommit (OCC, TicToc, Leis retry).
    ValidationFailed,
    /// A reserved or protected mutex was intercepted by a higher-priority
    /// transaction (LICC, TRLock).
    Intercepted,
    /// The caller's own logic chose to abort (e.g. workload-driven abort).
    UserRequested,
}

/// The result of a single transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All operations were applied and made visible.
    Committed,
    /// The transaction released everything it held and must be retried
    /// (or dropped) by the caller.
    Aborted(AbortReason),
    /// The transaction was intercepted mid-flight and must restart from
    /// `begin`; distinct from `Aborted` only in that some protocols (LICC)
    /// want to distinguish "lost a race" from "chose not to wait".
    InterceptedRetry,
    /// An external `CancelToken` fired; the caller should stop retrying.
    Cancelled,
}

impl Outcome {
    /// True if the transaction should be retried by the caller.
    pub fn should_retry(self) -> bool {
        matches!(self, Outcome::Aborted(_) | Outcome::InterceptedRetry)
    }
}

/// Fatal, non-retryable errors: these indicate a misuse of the API or
/// resource exhaustion, never ordinary lock contention.
#[derive(Debug, Error)]
pub enum CcError {
    /// A mutex index fell outside the configured record vector.
    #[error("mutex index {index} out of range (0..{len})")]
    MutexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of mutexes configured.
        len: usize,
    },
    /// A caller's payload buffer did not match the configured value size.
    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    PayloadSizeMismatch {
        /// Configured value size.
        expected: usize,
        /// Size the caller supplied.
        actual: usize,
    },
    /// The thread-local arena could not satisfy an allocation.
    #[error("arena exhausted while allocating {requested} bytes")]
    ArenaExhausted {
        /// Bytes requested.
        requested: usize,
    },
    /// A value allocated by one worker thread's arena was freed by another.
    #[error("memory allocated on thread {owner:?} freed on thread {freer:?}")]
    CrossThreadFree {
        /// Thread that owns the arena the memory came from.
        owner: std::thread::ThreadId,
        /// Thread attempting the free.
        freer: std::thread::ThreadId,
    },
}
