//! No-Wait lock (C7): trylock-only two-phase locking. Any contention aborts
//! immediately instead of queuing. Grounded on
//! `original_source/include/nowait.hpp`, the file the spec's open questions
//! call out as the canonical `NoWaitLockSet` (several other headers define
//! a same-named type with different fields).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::record::MemoryVector;
use crate::result::{AbortReason, CcError, Outcome};

use super::Mode;

const WRITER_BIT: u32 = 1 << 31;

/// Per-record header: a reader count in the low 31 bits, a writer flag in
/// the top bit. No queuing state at all — every acquisition is a trylock.
#[cfg_attr(feature = "mutex_on_cacheline", repr(align(64)))]
#[derive(Default)]
pub struct Mutex {
    state: AtomicU32,
}

impl Mutex {
    fn try_lock_s(&self) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if cur & WRITER_BIT != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
    }

    fn try_lock_x(&self) -> bool {
        self.state
            .compare_exchange(0, WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Upgrade S -> X; only possible while this thread is the sole reader.
    fn try_upgrade(&self) -> bool {
        self.state
            .compare_exchange(1, WRITER_BIT, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock_s(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }

    fn unlock_x(&self) {
        self.state.store(0, Ordering::Release);
    }
}

struct OpEntry<'a> {
    mutex: &'a Mutex,
    shared: &'a mut [u8],
    mode: Mode,
    /// `false` for a blind write: no lock taken yet, deferred to precommit.
    held: bool,
    local_off: usize,
    local_len: usize,
}

/// Transaction-private state for one in-flight transaction.
pub struct LockSet<'a> {
    tx_id: u64,
    entries: Vec<OpEntry<'a>>,
    index: HashMap<usize, usize>,
    local: MemoryVector,
}

impl<'a> LockSet<'a> {
    /// `payload_size` is the fixed per-record byte width (0 disables the
    /// memcpy path entirely, matching the source's `NO_PAYLOAD` mode).
    pub fn new(payload_size: usize) -> Self {
        Self {
            tx_id: 0,
            entries: Vec::new(),
            index: HashMap::new(),
            local: MemoryVector::new(payload_size),
        }
    }

    pub fn begin(&mut self, tx_id: u64) {
        self.clear();
        self.tx_id = tx_id;
    }

    fn key(mutex: &Mutex) -> usize {
        mutex as *const Mutex as usize
    }

    fn stage(&mut self, value: &[u8]) -> usize {
        let off = self.local.push();
        self.local.set(off, value);
        off
    }

    pub fn read(&mut self, mutex: &'a Mutex, shared: &'a mut [u8], out_local: &mut [u8]) -> Outcome {
        let key = Self::key(mutex);
        if let Some(&idx) = self.index.get(&key) {
            let e = &self.entries[idx];
            out_local.copy_from_slice(self.local.get(e.local_off));
            return Outcome::Committed;
        }
        if !mutex.try_lock_s() {
            return Outcome::Aborted(AbortReason::WouldBlock);
        }
        let off = self.stage(shared);
        out_local.copy_from_slice(self.local.get(off));
        self.index.insert(key, self.entries.len());
        self.entries.push(OpEntry {
            mutex,
            shared,
            mode: Mode::Read,
            held: true,
            local_off: off,
            local_len: out_local.len(),
        });
        Outcome::Committed
    }

    pub fn read_for_update(
        &mut self,
        mutex: &'a Mutex,
        shared: &'a mut [u8],
        out_local: &mut [u8],
    ) -> Outcome {
        let key = Self::key(mutex);
        if let Some(&idx) = self.index.get(&key) {
            let already_write = self.entries[idx].mode == Mode::Write;
            if !already_write {
                if !mutex.try_upgrade() {
                    return Outcome::Aborted(AbortReason::WouldBlock);
                }
                self.entries[idx].mode = Mode::Write;
            }
            out_local.copy_from_slice(self.local.get(self.entries[idx].local_off));
            return Outcome::Committed;
        }
        if !mutex.try_lock_x() {
            return Outcome::Aborted(AbortReason::WouldBlock);
        }
        let off = self.stage(shared);
        out_local.copy_from_slice(self.local.get(off));
        self.index.insert(key, self.entries.len());
        self.entries.push(OpEntry {
            mutex,
            shared,
            mode: Mode::Write,
            held: true,
            local_off: off,
            local_len: out_local.len(),
        });
        Outcome::Committed
    }

    /// Record a blind write: no lock is taken now, the acquisition is
    /// deferred to `precommit`'s address-ordered sweep.
    pub fn write(&mut self, mutex: &'a Mutex, shared: &'a mut [u8], in_local: &[u8]) {
        let key = Self::key(mutex);
        if let Some(&idx) = self.index.get(&key) {
            let off = self.entries[idx].local_off;
            self.local.set(off, in_local);
            self.entries[idx].mode = Mode::Write;
            return;
        }
        let off = self.stage(in_local);
        self.index.insert(key, self.entries.len());
        self.entries.push(OpEntry {
            mutex,
            shared,
            mode: Mode::Write,
            held: false,
            local_off: off,
            local_len: in_local.len(),
        });
    }

    /// Trylock every pending blind write, in ascending mutex-address order.
    fn lock_all_blind_writes(&mut self) -> bool {
        let mut pending: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.held)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| Self::key(self.entries[i].mutex));
        for i in pending {
            if !self.entries[i].mutex.try_lock_x() {
                return false;
            }
            self.entries[i].held = true;
        }
        true
    }

    pub fn precommit(&mut self) -> Outcome {
        if !self.lock_all_blind_writes() {
            self.clear();
            return Outcome::Aborted(AbortReason::WouldBlock);
        }
        for e in &mut self.entries {
            if e.mode == Mode::Write {
                let v = self.local.get(e.local_off);
                e.shared[..e.local_len].copy_from_slice(v);
            }
        }
        self.release_all();
        Outcome::Committed
    }

    fn release_all(&mut self) {
        for e in &self.entries {
            if e.held {
                match e.mode {
                    Mode::Read => e.mutex.unlock_s(),
                    Mode::Write => e.mutex.unlock_x(),
                }
            }
        }
        self.entries.clear();
        self.index.clear();
        self.local.clear();
    }

    /// Release everything held by this transaction without writing back;
    /// used on abort.
    pub fn clear(&mut self) {
        self.release_all();
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Out-of-range guard used by driver code indexing into a mutex table.
pub fn check_index(index: usize, len: usize) -> Result<(), CcError> {
    if index >= len {
        Err(CcError::MutexOutOfRange { index, len })
    } else {
        Ok(())
    }
}
