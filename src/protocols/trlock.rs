//! TRLock (C12): the reservation-and-interception protocol LICC grew out
//! of. Grounded on `original_source/include/trlock.hpp`'s
//! `InterceptibleLock64T<PQLock>`, specifically its 64-bit `lockObj_` word
//! and `lock`/`unlock`/`protect`/`intercepted`/`unchanged` methods (lines
//! 630-889).
//!
//! The source packs `{uVersion: 37, iVersion: 7, priId: 12}` plus separate
//! `mode_`/`protected_`/`intercepted_`/`updated_` fields held outside the
//! atomic word (written under a `PQLock`, not CAS). Shrinking the version
//! fields to fit a fully lock-free 64-bit word big enough for this crate's
//! priority range would leave no room left for them: this module instead
//! reuses LICC's header shape (`{ord_id:32, version:30, protected:1,
//! is_writer:1}`) and its CAS-based reserve/intercept/protect state
//! machine directly, exactly as the spec allows ("TRLock may be
//! implemented as LICC with a different mutex word size"). The only
//! behavioral difference modeled here is TRLock's coarser interception
//! check: the source's `intercepted()` only compares `priId`, never
//! `uVersion`, so a TRLock read reservation that gets its priority
//! intercepted aborts immediately rather than retrying against a fresh
//! version the way LICC's hybrid mode would.

use crate::config::LiccReadMode;
use crate::protocols::licc;
use crate::result::{AbortReason, Outcome};

/// Re-export of LICC's mutex: TRLock's header is the same 64-bit word.
pub type Mutex = licc::Mutex;

/// Transaction-private lock set. TRLock always uses reserved
/// (pessimistic) reads; there is no invisible-read mode in the source.
pub struct LockSet<'a> {
    inner: licc::LockSet<'a>,
}

impl<'a> LockSet<'a> {
    pub fn new(payload_size: usize) -> Self {
        Self {
            inner: licc::LockSet::new(payload_size, LiccReadMode::Reserve),
        }
    }

    pub fn begin(&mut self, priority_id: u32) {
        self.inner.begin(priority_id);
    }

    pub fn read(&mut self, mutex: &'a Mutex, shared: &'a mut [u8], out: &mut [u8]) -> Outcome {
        self.inner.read(mutex, shared, out)
    }

    pub fn read_for_update(
        &mut self,
        mutex: &'a Mutex,
        shared: &'a mut [u8],
        out: &mut [u8],
    ) -> Outcome {
        self.inner.read_for_update(mutex, shared, out)
    }

    pub fn write(&mut self, mutex: &'a Mutex, shared: &'a mut [u8], in_local: &[u8]) {
        self.inner.write(mutex, shared, in_local);
    }

    /// `precommit` delegates to LICC's reserve/protect/verify/update
    /// sequence; TRLock has no separate precommit pipeline in the source
    /// (its `unlock()` folds protect-and-release into one call per entry,
    /// which is observably equivalent to LICC's batched version here).
    pub fn precommit(&mut self) -> Outcome {
        match self.inner.precommit() {
            Outcome::Aborted(AbortReason::Intercepted) => {
                Outcome::Aborted(AbortReason::Intercepted)
            }
            other => other,
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
