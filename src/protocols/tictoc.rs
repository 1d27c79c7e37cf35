//! TicToc (C10): timestamp-based optimistic concurrency control where the
//! commit timestamp is computed lazily from whichever reads and writes
//! actually conflict, rather than assigned up front. Grounded on
//! `original_source/include/tictoc.hpp`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::record::MemoryVector;
use crate::result::{AbortReason, Outcome};

const LOCK_BIT: u64 = 1;
const DELTA_BITS: u32 = 15;
const DELTA_MASK: u64 = (1 << DELTA_BITS) - 1;
const WTS_SHIFT: u32 = 1 + DELTA_BITS;

/// Packed `{lock: 1, delta: 15, wts: 48}`; `rts = wts + delta`.
#[cfg_attr(feature = "mutex_on_cacheline", repr(align(64)))]
#[derive(Default)]
pub struct Mutex {
    ts: AtomicU64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct TsWord(u64);
static_assertions::const_assert_eq!(std::mem::size_of::<TsWord>(), 8);

impl TsWord {
    fn locked(self) -> bool {
        self.0 & LOCK_BIT != 0
    }
    fn delta(self) -> u64 {
        (self.0 >> 1) & DELTA_MASK
    }
    fn wts(self) -> u64 {
        self.0 >> WTS_SHIFT
    }
    fn rts(self) -> u64 {
        self.wts() + self.delta()
    }
    fn pack(wts: u64, delta: u64, lock: bool) -> Self {
        TsWord((wts << WTS_SHIFT) | ((delta & DELTA_MASK) << 1) | (lock as u64))
    }
    fn with_lock(self, lock: bool) -> Self {
        Self::pack(self.wts(), self.delta(), lock)
    }
    /// Raise `rts` to at least `target`, rebasing `wts` upward if `delta`
    /// would otherwise overflow its 15 bits.
    fn extended_to(self, target: u64) -> Self {
        let wts = self.wts();
        if target >= wts && target - wts <= DELTA_MASK {
            Self::pack(wts, target - wts, self.locked())
        } else {
            Self::pack(target, 0, self.locked())
        }
    }
}

impl Mutex {
    fn load(&self) -> TsWord {
        TsWord(self.ts.load(Ordering::Acquire))
    }

    /// The record's current write-timestamp, for callers that need to
    /// verify commit order directly (tests, diagnostics).
    pub fn wts(&self) -> u64 {
        self.load().wts()
    }

    fn try_lock(&self) -> Option<TsWord> {
        let before = self.load();
        if before.locked() {
            return None;
        }
        let after = before.with_lock(true);
        self.ts
            .compare_exchange(before.0, after.0, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| before)
    }

    fn lock_blocking(&self) -> TsWord {
        let mut backoff = Backoff::new();
        loop {
            if let Some(before) = self.try_lock() {
                return before;
            }
            backoff.spin();
        }
    }

    fn unlock_unchanged(&self, before: TsWord) {
        self.ts.store(before.with_lock(false).0, Ordering::Release);
    }

    fn commit(&self, new_wts: u64) {
        self.ts.store(TsWord::pack(new_wts, 0, false).0, Ordering::Release);
    }
}

struct ReadEntry<'a> {
    mutex: &'a Mutex,
    snapshot: TsWord,
}

struct WriteEntry<'a> {
    mutex: &'a Mutex,
    shared: &'a mut [u8],
    local_off: usize,
}

/// Transaction-private read-set and write-set.
pub struct LockSet<'a> {
    read_set: Vec<ReadEntry<'a>>,
    write_set: Vec<WriteEntry<'a>>,
    write_index: HashMap<usize, usize>,
    local: MemoryVector,
    nowait: bool,
}

impl<'a> LockSet<'a> {
    pub fn new(payload_size: usize, nowait: bool) -> Self {
        Self {
            read_set: Vec::new(),
            write_set: Vec::new(),
            write_index: HashMap::new(),
            local: MemoryVector::new(payload_size),
            nowait,
        }
    }

    pub fn begin(&mut self, _tx_id: u64) {
        self.clear();
    }

    fn addr(mutex: &Mutex) -> usize {
        mutex as *const Mutex as usize
    }

    pub fn read(&mut self, mutex: &'a Mutex, shared: &[u8], out_local: &mut [u8]) -> Outcome {
        if let Some(&idx) = self.write_index.get(&Self::addr(mutex)) {
            out_local.copy_from_slice(self.local.get(self.write_set[idx].local_off));
            return Outcome::Committed;
        }
        let mut backoff = Backoff::new();
        loop {
            let mut s0 = mutex.load();
            while s0.locked() {
                backoff.spin();
                s0 = mutex.load();
            }
            out_local.copy_from_slice(shared);
            let s1 = mutex.load();
            if s1 == s0 {
                self.read_set.push(ReadEntry { mutex, snapshot: s0 });
                return Outcome::Committed;
            }
            backoff.spin();
        }
    }

    pub fn write(&mut self, mutex: &'a Mutex, shared: &'a mut [u8], in_local: &[u8]) {
        let addr = Self::addr(mutex);
        if let Some(&idx) = self.write_index.get(&addr) {
            let off = self.write_set[idx].local_off;
            self.local.set(off, in_local);
            return;
        }
        let off = self.local.push();
        self.local.set(off, in_local);
        self.write_index.insert(addr, self.write_set.len());
        self.write_set.push(WriteEntry {
            mutex,
            shared,
            local_off: off,
        });
    }

    pub fn precommit(&mut self) -> Outcome {
        let mut order: Vec<usize> = (0..self.write_set.len()).collect();
        order.sort_by_key(|&i| Self::addr(self.write_set[i].mutex));

        let mut before = vec![TsWord(0); self.write_set.len()];
        for (pos, &i) in order.iter().enumerate() {
            let mutex = self.write_set[i].mutex;
            let b = if self.nowait {
                match mutex.try_lock() {
                    Some(b) => b,
                    None => {
                        self.unlock_prefix(&order[..pos], &before);
                        self.clear();
                        return Outcome::Aborted(AbortReason::WouldBlock);
                    }
                }
            } else {
                mutex.lock_blocking()
            };
            before[i] = b;
        }

        std::sync::atomic::fence(Ordering::AcqRel);

        let mut commit_ts: u64 = 0;
        for &i in &order {
            commit_ts = commit_ts.max(before[i].rts() + 1);
        }
        for r in &self.read_set {
            if !self.write_index.contains_key(&Self::addr(r.mutex)) {
                commit_ts = commit_ts.max(r.snapshot.wts());
            }
        }

        for r in &self.read_set {
            let addr = Self::addr(r.mutex);
            let in_write_set = self.write_index.contains_key(&addr);
            if r.snapshot.rts() >= commit_ts {
                continue;
            }
            if in_write_set {
                continue; // locked by myself; version already pinned by write-lock
            }
            loop {
                let c = r.mutex.load();
                if c.wts() != r.snapshot.wts() {
                    self.unlock_prefix(&order, &before);
                    self.clear();
                    return Outcome::Aborted(AbortReason::ValidationFailed);
                }
                if c.rts() >= commit_ts {
                    break;
                }
                if c.locked() {
                    self.unlock_prefix(&order, &before);
                    self.clear();
                    return Outcome::Aborted(AbortReason::ValidationFailed);
                }
                let extended = c.extended_to(commit_ts);
                if r.mutex
                    .ts
                    .compare_exchange(c.0, extended.0, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
                // Someone else changed it concurrently; re-evaluate.
            }
        }

        for &i in &order {
            let e = &mut self.write_set[i];
            let v = self.local.get(e.local_off);
            e.shared[..v.len()].copy_from_slice(v);
            e.mutex.commit(commit_ts);
        }
        self.clear();
        Outcome::Committed
    }

    fn unlock_prefix(&self, done: &[usize], before: &[TsWord]) {
        for &i in done {
            self.write_set[i].mutex.unlock_unchanged(before[i]);
        }
    }

    pub fn clear(&mut self) {
        self.read_set.clear();
        self.write_set.clear();
        self.write_index.clear();
        self.local.clear();
    }
}
