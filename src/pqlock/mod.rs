//! Priority-queuing auxiliary locks (component C4).
//!
//! LICC and TRLock gate contention behind one of these instead of spinning
//! directly on the protocol mutex word: a waiter that loses the race for a
//! contended mutex parks here, and whichever variant is configured decides
//! who wakes next — FIFO order is not good enough once priorities (Wait-Die
//! victim IDs, LICC/TRLock `ord_id`s) must be respected, so every variant
//! here wakes the *lowest* priority value waiting, not the oldest.
//!
//! All variants implement [`PqLock`], parameterized by priority
//! (`u32`, smaller = more important). Protocols take a `P: PqLock` type
//! parameter so the choice is monomorphized rather than dispatched through a
//! vtable in the hot path.

pub mod mcs1;
pub mod mcs2;
pub mod mcs3;
pub mod none;
pub mod posix;
pub mod spin;

/// A held priority-queuing lock; `Self` is the RAII guard, released on
/// `Drop`. Generic over the mutex's lifetime `'a` so the guard can borrow it
/// directly instead of through a raw pointer.
pub trait PqLock<'a>: Sized {
    /// The shared, per-mutex state this lock variant requires.
    type Mutex: Default;

    /// Block until the lock is acquired for `priority` (smaller = served
    /// first among current waiters).
    fn lock(mutex: &'a Self::Mutex, priority: u32) -> Self;

    /// Acquire the lock only if it is immediately free.
    fn try_lock(mutex: &'a Self::Mutex, priority: u32) -> Option<Self>;

    /// The smallest priority value among waiters queued behind this held
    /// lock, or `u32::MAX` if none are waiting. Only meaningful while the
    /// lock is held.
    fn top_priority_in_wait_queue(&self) -> u32;
}
