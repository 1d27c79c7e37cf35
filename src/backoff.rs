//! Exponential backoff for contention management.
//!
//! This module provides exponential backoff utilities for reducing contention
//! in spin loops. When multiple threads are competing for a resource, backing
//! off exponentially reduces wasted CPU cycles and improves overall throughput.
//!
//! # Example
//!
//! ```
//! use concurrencykit::backoff::Backoff;
//!
//! let mut backoff = Backoff::new();
//!
//! loop {
//!     if try_acquire_lock() {
//!         break;
//!     }
//!     backoff.spin();
//! }
//! # fn try_acquire_lock() -> bool { true }
//! ```

use crate::pr;

/// Default initial backoff value.
const DEFAULT_CEILING: u32 = 128;

/// Maximum backoff ceiling.
const MAX_CEILING: u32 = 65536;

/// Exponential backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
    ceiling: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    /// Create a new backoff state with default parameters.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: 1,
            ceiling: DEFAULT_CEILING,
        }
    }

    /// Create a new backoff state with a custom ceiling.
    #[inline]
    #[must_use]
    pub const fn with_ceiling(ceiling: u32) -> Self {
        Self {
            current: 1,
            ceiling: if ceiling > MAX_CEILING {
                MAX_CEILING
            } else {
                ceiling
            },
        }
    }

    /// Reset the backoff state.
    #[inline]
    pub fn reset(&mut self) {
        self.current = 1;
    }

    /// Perform a spin-wait with exponential backoff.
    ///
    /// This will spin for an increasing number of iterations, doubling
    /// each time until the ceiling is reached.
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..self.current {
            pr::stall();
        }

        if self.current < self.ceiling {
            self.current = self.current.saturating_mul(2);
        }
    }

    /// Spin once without updating state.
    ///
    /// Useful for a quick pause without affecting the backoff progression.
    #[inline]
    pub fn snooze(&self) {
        pr::stall();
    }

    /// Check if we've reached the maximum backoff.
    #[inline]
    #[must_use]
    pub fn is_maxed(&self) -> bool {
        self.current >= self.ceiling
    }

    /// Get the current backoff value.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u32 {
        self.current
    }
}

/// Randomized, retry-count-scaled back-off between whole transaction
/// attempts, as distinct from [`Backoff`]'s fixed doubling used inside a
/// single spin loop.
///
/// Waits a random fraction of `tdiff * 2^min(retry + 1, 4)` ticks, where
/// `tdiff` is the elapsed duration of the failing attempt; the worker-local
/// RNG is advanced by `retry` steps so that sibling workers aborting in the
/// same epoch don't retry in lockstep.
pub struct RetryBackoff {
    rng: rand_xorshift::XorShiftRng,
}

impl RetryBackoff {
    /// Build a back-off generator seeded from `seed` (typically derived from
    /// the worker's thread index so each worker decorrelates independently).
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            rng: rand_xorshift::XorShiftRng::seed_from_u64(seed),
        }
    }

    /// Busy-wait a randomized fraction of `tdiff * 2^min(retry + 1, 4)`
    /// ticks, where `tdiff` is the elapsed ticks of the failing attempt.
    pub fn wait(&mut self, tdiff_ticks: u64, retry: u32) {
        use rand::Rng;
        let shift = retry.saturating_add(1).min(4);
        let ceiling = tdiff_ticks.saturating_mul(1u64 << shift).max(1);
        let ticks = self.rng.gen_range(0..ceiling);
        for _ in 0..ticks.min(1 << 20) {
            pr::stall();
        }
    }
}

/// Simple inline backoff macro for use in tight loops.
#[macro_export]
macro_rules! backoff {
    () => {
        $crate::pr::stall()
    };
    ($count:expr) => {
        for _ in 0..$count {
            $crate::pr::stall();
        }
    };
}
