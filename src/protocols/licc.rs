//! LICC (C11): Lock-Interception Concurrency Control, the centerpiece
//! protocol. A mutex header packs `{ord_id:32, version:30, protected:1,
//! is_writer:1}`; `ord_id == u32::MAX` means unreserved, and smaller
//! `ord_id` always outranks larger, so a higher-priority request can
//! *intercept* a lower-priority one's reservation instead of waiting for
//! it. Grounded on `original_source/include/licc2.hpp`.
//!
//! This implements the CAS-on-header variant only. The source's
//! alternative MCS-queue variant (`licc2.hpp`'s `mcs` namespace: each
//! requester enqueues a `Request`, and the current queue owner drains the
//! whole backlog each release, applying the very same
//! `reserve`/`protect`/`verify`/`update` state machine via a combiner loop
//! instead of per-field CAS retries) produces the same externally visible
//! lock semantics through a different serialization mechanism — it is not
//! a distinct protocol, just an alternate way to drive the state machine
//! already implemented below. It is left out rather than duplicated, since
//! building a second combiner-style backend for identical semantics adds
//! implementation surface without adding coverage of anything
//! `SPEC_FULL.md` asks for beyond what the CAS path already provides.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::config::LiccReadMode;
use crate::record::MemoryVector;
use crate::result::{AbortReason, Outcome};

const UNRESERVED: u32 = u32::MAX;
const IS_WRITER_BIT: u64 = 1;
const PROTECTED_BIT: u64 = 1 << 1;
const VERSION_SHIFT: u32 = 2;
const VERSION_BITS: u32 = 30;
const VERSION_MASK: u64 = (1 << VERSION_BITS) - 1;
const ORD_ID_SHIFT: u32 = VERSION_SHIFT + VERSION_BITS;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header(u64);
static_assertions::const_assert_eq!(std::mem::size_of::<Header>(), 8);

impl Header {
    fn unreserved() -> Self {
        Header((UNRESERVED as u64) << ORD_ID_SHIFT)
    }
    pub(crate) fn ord_id(self) -> u32 {
        (self.0 >> ORD_ID_SHIFT) as u32
    }
    pub(crate) fn version(self) -> u32 {
        ((self.0 >> VERSION_SHIFT) & VERSION_MASK) as u32
    }
    fn protected(self) -> bool {
        self.0 & PROTECTED_BIT != 0
    }
    fn is_writer(self) -> bool {
        self.0 & IS_WRITER_BIT != 0
    }
    fn with(self, ord_id: u32, version: u32, protected: bool, is_writer: bool) -> Self {
        Header(
            ((ord_id as u64) << ORD_ID_SHIFT)
                | (((version as u64) & VERSION_MASK) << VERSION_SHIFT)
                | ((protected as u64) << 1)
                | (is_writer as u64),
        )
    }
}

/// The per-record 64-bit LICC header.
#[cfg_attr(feature = "mutex_on_cacheline", repr(align(64)))]
pub struct Mutex {
    header: AtomicU64,
}

impl Default for Mutex {
    fn default() -> Self {
        Self {
            header: AtomicU64::new(Header::unreserved().0),
        }
    }
}

impl Mutex {
    pub(crate) fn load(&self) -> Header {
        Header(self.header.load(Ordering::Acquire))
    }

    fn cas(&self, before: Header, after: Header) -> bool {
        self.header
            .compare_exchange(before.0, after.0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Reserve for a read: share with an existing reader, or intercept a
    /// lower-priority reservation. Returns `Some(true)` if this call
    /// intercepted someone else's reservation.
    pub(crate) fn reserve_read(&self, mine: u32) -> Option<bool> {
        let mut backoff = Backoff::new();
        loop {
            let h = self.load();
            if h.protected() {
                return None;
            }
            let permitted = h.ord_id() == UNRESERVED || !h.is_writer() || mine < h.ord_id();
            if !permitted {
                return None;
            }
            let new_ord = h.ord_id().min(mine);
            let intercepted = h.ord_id() != UNRESERVED && new_ord == mine && h.ord_id() != mine;
            let after = h.with(new_ord, h.version(), false, false);
            if self.cas(h, after) {
                return Some(intercepted);
            }
            backoff.spin();
        }
    }

    pub(crate) fn reserve_write(&self, mine: u32) -> Option<bool> {
        let mut backoff = Backoff::new();
        loop {
            let h = self.load();
            if h.protected() {
                return None;
            }
            let permitted = h.ord_id() == UNRESERVED || mine < h.ord_id();
            if !permitted {
                return None;
            }
            let intercepted = h.ord_id() != UNRESERVED;
            let after = h.with(mine, h.version(), false, true);
            if self.cas(h, after) {
                return Some(intercepted);
            }
            backoff.spin();
        }
    }

    /// READ -> READ_MODIFY_WRITE. `had_reservation` is true if this entry
    /// already holds a read reservation (`ord_id == mine`); false means it
    /// came from an invisible read and must reserve for the first time,
    /// additionally checking the snapshot version hasn't moved.
    fn upgrade(&self, mine: u32, had_reservation: bool, snapshot_version: u32) -> bool {
        if had_reservation {
            let h = self.load();
            if h.protected() || h.ord_id() != mine || h.version() != snapshot_version {
                return false;
            }
            let after = h.with(h.ord_id(), h.version(), false, true);
            self.cas(h, after)
        } else {
            let h = self.load();
            if h.version() != snapshot_version {
                return false;
            }
            matches!(self.reserve_write(mine), Some(_))
        }
    }

    /// Precommit step: make a write reservation exclusive and
    /// non-interceptible. Fails if intercepted (`ord_id != mine`) or
    /// already protected.
    fn protect(&self, mine: u32) -> bool {
        let h = self.load();
        if h.protected() || h.ord_id() != mine {
            return false;
        }
        let after = h.with(UNRESERVED, h.version(), true, true);
        self.cas(h, after)
    }

    fn unprotect(&self, updated: bool) {
        let h = self.load();
        debug_assert!(h.protected());
        let new_version = if updated { h.version().wrapping_add(1) } else { h.version() };
        let after = h.with(h.ord_id(), new_version, false, h.is_writer());
        self.header.store(after.0, Ordering::Release);
    }

    /// Release a reservation that never got protected (read reservation,
    /// or an aborted write reservation). No-op if we were intercepted.
    fn release_reservation(&self, mine: u32) {
        loop {
            let h = self.load();
            if h.ord_id() != mine {
                return; // intercepted; nothing of ours to release
            }
            let after = h.with(UNRESERVED, h.version(), false, false);
            if self.cas(h, after) {
                return;
            }
        }
    }

    fn verify(&self, snapshot_version: u32) -> bool {
        let h = self.load();
        !h.protected() && h.version() == snapshot_version
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Invisible,
    ReservedRead,
    ReadModifyWrite,
    PreBlindWrite,
    BlindWrite,
    Protected { updated: bool },
}

struct OpEntry<'a> {
    mutex: &'a Mutex,
    shared: &'a mut [u8],
    state: State,
    snapshot_version: u32,
    local_off: usize,
}

/// Transaction-private LockSet.
pub struct LockSet<'a> {
    priority_id: u32,
    read_mode: LiccReadMode,
    retry: u32,
    is_long_tx: bool,
    entries: Vec<OpEntry<'a>>,
    local: MemoryVector,
}

impl<'a> LockSet<'a> {
    pub fn new(payload_size: usize, read_mode: LiccReadMode) -> Self {
        Self {
            priority_id: 0,
            read_mode,
            retry: 0,
            is_long_tx: false,
            entries: Vec::new(),
            local: MemoryVector::new(payload_size),
        }
    }

    /// Start a fresh attempt at priority `priority_id`, as the first try of
    /// a short transaction.
    pub fn begin(&mut self, priority_id: u32) {
        self.begin_attempt(priority_id, 0, false);
    }

    /// Like `begin`, but states which retry attempt this is and whether
    /// the transaction is a long one — `LiccReadMode::Hybrid` uses both to
    /// decide whether this attempt takes an invisible read or reserves
    /// immediately (`licc_bench.cpp`'s `tryInvisibleRead` predicate).
    pub fn begin_attempt(&mut self, priority_id: u32, retry: u32, is_long_tx: bool) {
        self.clear();
        self.priority_id = priority_id;
        self.retry = retry;
        self.is_long_tx = is_long_tx;
    }

    fn addr(mutex: &Mutex) -> usize {
        mutex as *const Mutex as usize
    }

    fn find(&self, mutex: &Mutex) -> Option<usize> {
        let target = Self::addr(mutex);
        self.entries.iter().position(|e| Self::addr(e.mutex) == target)
    }

    fn invisible_read(&mut self, mutex: &'a Mutex, shared: &[u8], out: &mut [u8]) -> Option<u32> {
        let mut backoff = Backoff::new();
        loop {
            let mut h0 = mutex.load();
            while h0.protected() {
                backoff.spin();
                h0 = mutex.load();
            }
            out.copy_from_slice(shared);
            let h1 = mutex.load();
            if h1.version() == h0.version() && !h1.protected() {
                return Some(h0.version());
            }
            backoff.spin();
        }
    }

    pub fn read(&mut self, mutex: &'a Mutex, shared: &'a mut [u8], out: &mut [u8]) -> Outcome {
        if let Some(idx) = self.find(mutex) {
            out.copy_from_slice(self.local.get(self.entries[idx].local_off));
            return Outcome::Committed;
        }
        let off = self.local.push();
        let use_invisible = match self.read_mode {
            LiccReadMode::Reserve => false,
            LiccReadMode::Occ => true,
            LiccReadMode::Hybrid => !self.is_long_tx && self.retry == 0,
        };
        if use_invisible {
            // Invisible read: no reservation taken now, promoted to a
            // reserved read later only if `read_for_update` needs it.
            let v = self
                .invisible_read(mutex, shared, out)
                .expect("invisible read always converges");
            self.local.set(off, out);
            self.entries.push(OpEntry {
                mutex,
                shared,
                state: State::Invisible,
                snapshot_version: v,
                local_off: off,
            });
        } else {
            let Some(_intercepted) = mutex.reserve_read(self.priority_id) else {
                return Outcome::Aborted(AbortReason::WouldBlock);
            };
            out.copy_from_slice(shared);
            self.local.set(off, out);
            let v = mutex.load().version();
            self.entries.push(OpEntry {
                mutex,
                shared,
                state: State::ReservedRead,
                snapshot_version: v,
                local_off: off,
            });
        }
        Outcome::Committed
    }

    pub fn read_for_update(
        &mut self,
        mutex: &'a Mutex,
        shared: &'a mut [u8],
        out: &mut [u8],
    ) -> Outcome {
        if let Some(idx) = self.find(mutex) {
            let had_reservation = self.entries[idx].state == State::ReservedRead;
            if self.entries[idx].state != State::ReadModifyWrite
                && self.entries[idx].state != State::BlindWrite
            {
                if !mutex.upgrade(self.priority_id, had_reservation, self.entries[idx].snapshot_version) {
                    log::trace!("licc upgrade intercepted, priority_id={}", self.priority_id);
                    return Outcome::Aborted(AbortReason::Intercepted);
                }
                self.entries[idx].state = State::ReadModifyWrite;
            }
            out.copy_from_slice(self.local.get(self.entries[idx].local_off));
            return Outcome::Committed;
        }
        let Some(_intercepted) = mutex.reserve_write(self.priority_id) else {
            return Outcome::Aborted(AbortReason::WouldBlock);
        };
        let off = self.local.push();
        out.copy_from_slice(shared);
        self.local.set(off, out);
        let v = mutex.load().version();
        self.entries.push(OpEntry {
            mutex,
            shared,
            state: State::ReadModifyWrite,
            snapshot_version: v,
            local_off: off,
        });
        Outcome::Committed
    }

    /// Blind write: deferred reservation. The entry sits as
    /// `PreBlindWrite` until `precommit`'s `reserve_all_blind_writes` step.
    pub fn write(&mut self, mutex: &'a Mutex, shared: &'a mut [u8], in_local: &[u8]) {
        if let Some(idx) = self.find(mutex) {
            let off = self.entries[idx].local_off;
            self.local.set(off, in_local);
            return;
        }
        let off = self.local.push();
        self.local.set(off, in_local);
        self.entries.push(OpEntry {
            mutex,
            shared,
            state: State::PreBlindWrite,
            snapshot_version: 0,
            local_off: off,
        });
    }

    fn reserve_all_blind_writes(&mut self) -> bool {
        for e in &mut self.entries {
            if e.state == State::PreBlindWrite {
                if e.mutex.reserve_write(self.priority_id).is_none() {
                    return false;
                }
                e.state = State::BlindWrite;
            }
        }
        true
    }

    fn protect_all(&mut self) -> bool {
        for e in &mut self.entries {
            if matches!(e.state, State::BlindWrite | State::ReadModifyWrite) {
                if !e.mutex.protect(self.priority_id) {
                    return false;
                }
                e.state = State::Protected { updated: true };
            }
        }
        true
    }

    fn verify_and_unlock(&mut self) -> bool {
        for e in &mut self.entries {
            match e.state {
                State::Invisible | State::ReservedRead => {
                    if !e.mutex.verify(e.snapshot_version) {
                        return false;
                    }
                    if e.state == State::ReservedRead {
                        e.mutex.release_reservation(self.priority_id);
                    }
                }
                _ => {}
            }
        }
        true
    }

    fn update_and_unlock(&mut self) {
        for e in &mut self.entries {
            if let State::Protected { updated } = e.state {
                if updated {
                    let v = self.local.get(e.local_off);
                    e.shared[..v.len()].copy_from_slice(v);
                }
                e.mutex.unprotect(updated);
            }
        }
    }

    pub fn precommit(&mut self) -> Outcome {
        if !self.reserve_all_blind_writes() {
            log::trace!("licc blind-write reservation intercepted, priority_id={}", self.priority_id);
            self.clear();
            return Outcome::Aborted(AbortReason::Intercepted);
        }
        if !self.protect_all() {
            log::trace!("licc protect phase intercepted, priority_id={}", self.priority_id);
            self.clear();
            return Outcome::Aborted(AbortReason::Intercepted);
        }
        std::sync::atomic::fence(Ordering::AcqRel);
        if !self.verify_and_unlock() {
            self.clear();
            return Outcome::Aborted(AbortReason::ValidationFailed);
        }
        self.update_and_unlock();
        self.entries.clear();
        self.local.clear();
        Outcome::Committed
    }

    /// Release every held reservation/protection, returning each header to
    /// the state it had before this transaction touched it (modulo any
    /// interception, which already moved ownership elsewhere).
    pub fn clear(&mut self) {
        for e in &self.entries {
            match e.state {
                State::ReservedRead | State::ReadModifyWrite | State::BlindWrite => {
                    e.mutex.release_reservation(self.priority_id);
                }
                State::Protected { .. } => {
                    e.mutex.unprotect(false);
                }
                State::Invisible | State::PreBlindWrite => {}
            }
        }
        self.entries.clear();
        self.local.clear();
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        self.clear();
    }
}
