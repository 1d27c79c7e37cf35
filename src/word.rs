//! Packed atomic mutex words shared by every protocol's header.
//!
//! Every protocol in this crate packs its per-mutex metadata (lock bit,
//! version, priority id, ...) into a single machine word so that the whole
//! state transitions with one CAS. This module supplies the two word widths
//! protocols need: a plain 64-bit packed word (`Word64`, used as a thin CAS
//! wrapper around whatever `#[repr(C)]` bitfield struct a protocol defines),
//! and a 128-bit word (`DWord`) for TRLock's reader-counting layout, which
//! has no stable double-width CAS intrinsic in Rust.

use core::sync::atomic::{AtomicU64, Ordering};

/// A single 64-bit atomic word, bit-for-bit reinterpreted as a packed
/// protocol-specific struct on load/store.
///
/// `T` must be `#[repr(C)]` (or `#[repr(transparent)]`) over exactly 8 bytes;
/// callers are expected to `static_assertions::const_assert!` that at the
/// call site, since this type has no way to check it itself without a
/// `Copy + Into<u64> + From<u64>` bound, which every protocol header already
/// provides.
#[repr(transparent)]
#[derive(Debug)]
pub struct Word64 {
    raw: AtomicU64,
}

impl Word64 {
    /// A word initialized to `init`.
    pub fn new(init: u64) -> Self {
        Self {
            raw: AtomicU64::new(init),
        }
    }

    /// Acquire-ordered load of the raw bits.
    #[inline]
    pub fn load(&self) -> u64 {
        self.raw.load(Ordering::Acquire)
    }

    /// Relaxed load, for use only where a caller immediately re-validates
    /// under a stronger fence (e.g. OCC's speculative read path).
    #[inline]
    pub fn load_relaxed(&self) -> u64 {
        self.raw.load(Ordering::Relaxed)
    }

    /// Release-ordered store of the raw bits.
    #[inline]
    pub fn store_release(&self, value: u64) {
        self.raw.store(value, Ordering::Release);
    }

    /// Acq-rel compare-and-swap: the discipline every protocol's transition
    /// uses, per the shared atomic substrate's ordering rules.
    #[inline]
    pub fn compare_and_swap(&self, current: u64, new: u64) -> bool {
        self.raw
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Same as [`Self::compare_and_swap`] but returns the witnessed value on
    /// failure, saving the caller a reload in a retry loop.
    #[inline]
    pub fn compare_and_swap_witness(&self, current: u64, new: u64) -> Result<u64, u64> {
        self.raw
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// A software-emulated 128-bit atomic word.
///
/// x86-64's `cmpxchg16b` has no stable intrinsic in safe Rust, so we emulate
/// a double-wide compare-and-swap with a seqlock: readers spin until a
/// version counter is even and unchanged across the read; writers take a
/// single-bit spinlock (the low bit of the version counter) around their
/// update. Contended writers back off with [`crate::backoff::Backoff`].
#[derive(Debug)]
pub struct DWord {
    version: AtomicU64,
    lo: AtomicU64,
    hi: AtomicU64,
}

impl DWord {
    /// A word initialized to `(lo, hi)`.
    pub fn new(lo: u64, hi: u64) -> Self {
        Self {
            version: AtomicU64::new(0),
            lo: AtomicU64::new(lo),
            hi: AtomicU64::new(hi),
        }
    }

    /// Lock-free seqlock read: retries internally until it observes a
    /// consistent `(lo, hi)` pair.
    pub fn load(&self) -> (u64, u64) {
        loop {
            let v0 = self.version.load(Ordering::Acquire);
            if v0 & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }
            let lo = self.lo.load(Ordering::Acquire);
            let hi = self.hi.load(Ordering::Acquire);
            let v1 = self.version.load(Ordering::Acquire);
            if v0 == v1 {
                return (lo, hi);
            }
        }
    }

    /// Double-wide compare-and-swap: succeeds only if the current value is
    /// bit-for-bit `expected`, then installs `new` atomically with respect to
    /// every other [`Self::load`]/[`Self::compare_and_swap`] caller.
    pub fn compare_and_swap(&self, expected: (u64, u64), new: (u64, u64)) -> bool {
        loop {
            let v0 = self.version.load(Ordering::Acquire);
            if v0 & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }
            if self.version.compare_exchange(
                v0,
                v0 | 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ).is_err() {
                continue;
            }
            let cur = (self.lo.load(Ordering::Acquire), self.hi.load(Ordering::Acquire));
            if cur != expected {
                self.version.store(v0, Ordering::Release);
                return false;
            }
            self.lo.store(new.0, Ordering::Relaxed);
            self.hi.store(new.1, Ordering::Relaxed);
            self.version.store(v0.wrapping_add(2), Ordering::Release);
            return true;
        }
    }
}
