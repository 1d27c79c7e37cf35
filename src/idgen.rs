//! Transaction ID and priority ID generators (component C5).
//!
//! Three generators are provided, matching spec §4.5/§9:
//!
//! - [`BulkTxIdGen`]: a process-wide counter sharded into per-worker
//!   reservations, bounding contention on the shared atomic.
//! - [`EpochClock`]: a background thread that bumps a shared 64-bit epoch at
//!   a fixed cadence; the only global periodic state in the system.
//! - [`PriorityIdGen`]: packs `(worker_id:10, epoch_id:22)` into a single
//!   `u32` priority, reading the current epoch from an [`EpochClock`].
//!   Smaller packed value = higher priority, and a transaction that retries
//!   without refreshing its epoch_id becomes relatively more important over
//!   time, matching the "long transactions dominate eventually" contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;

/// Number of low bits of a bulk reservation handed out per atomic fetch-add.
const DEFAULT_ALLOC_BITS: u32 = 12;

/// A process-wide, sharded monotonic transaction-ID counter.
///
/// Each [`BulkTxIdGen::worker`] handle reserves `2^alloc_bits` contiguous IDs
/// per fetch-add on the shared counter and hands them out locally until the
/// reservation is exhausted, bounding shared-counter contention.
pub struct BulkTxIdGen {
    shared: AtomicU64,
    alloc_bits: u32,
}

impl BulkTxIdGen {
    /// A fresh generator starting at 0, reserving `2^alloc_bits` IDs per
    /// worker refill.
    pub fn new(alloc_bits: u32) -> Self {
        Self {
            shared: AtomicU64::new(0),
            alloc_bits,
        }
    }

    /// Bind a per-worker handle to this generator.
    pub fn worker(&self) -> BulkTxIdWorker<'_> {
        BulkTxIdWorker {
            shared: &self.shared,
            alloc_bits: self.alloc_bits,
            next: 0,
            end: 0,
        }
    }
}

impl Default for BulkTxIdGen {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOC_BITS)
    }
}

/// A worker-local handle that draws IDs from its own reservation before
/// touching the shared counter again.
pub struct BulkTxIdWorker<'a> {
    shared: &'a AtomicU64,
    alloc_bits: u32,
    next: u64,
    end: u64,
}

impl BulkTxIdWorker<'_> {
    /// The next transaction ID, refilling this worker's reservation from the
    /// shared counter if exhausted.
    pub fn next(&mut self) -> u64 {
        if self.next == self.end {
            let block_size = 1u64 << self.alloc_bits;
            let base = self.shared.fetch_add(block_size, Ordering::Relaxed);
            self.next = base;
            self.end = base + block_size;
        }
        let id = self.next;
        self.next += 1;
        id
    }
}

/// A background clock that increments a shared 64-bit epoch counter at a
/// fixed cadence (default 1&nbsp;ms), joined at shutdown via its
/// `CancelToken`.
pub struct EpochClock {
    epoch: Arc<AtomicU64>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl EpochClock {
    /// Start the background tick thread at `period`, beginning at epoch 0.
    pub fn start(period: Duration) -> Self {
        let epoch = Arc::new(AtomicU64::new(0));
        let cancel = CancelToken::new();
        let handle = {
            let epoch = Arc::clone(&epoch);
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                log::debug!("epoch clock started, period={:?}", period);
                while !cancel.quit() {
                    std::thread::sleep(period);
                    epoch.fetch_add(1, Ordering::Release);
                }
                log::debug!("epoch clock stopped");
            })
        };
        Self {
            epoch,
            cancel,
            handle: Some(handle),
        }
    }

    /// Acquire-load the current epoch.
    #[inline]
    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// A cheaply-cloneable reader handle that does not own the background
    /// thread.
    pub fn reader(&self) -> EpochReader {
        EpochReader {
            epoch: Arc::clone(&self.epoch),
        }
    }

    /// Signal the background thread to stop and join it.
    pub fn shutdown(&mut self) {
        self.cancel.request_hard_quit();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for EpochClock {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A read-only handle to a running [`EpochClock`]'s counter.
#[derive(Clone)]
pub struct EpochReader {
    epoch: Arc<AtomicU64>,
}

impl EpochReader {
    /// Acquire-load the current epoch.
    #[inline]
    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

const WORKER_BITS: u32 = 10;
const EPOCH_BITS: u32 = 22;
const EPOCH_MASK: u64 = (1u64 << EPOCH_BITS) - 1;

/// Packs `(worker_id:10, epoch_id:22)` into a 32-bit priority value where a
/// smaller value is higher priority.
///
/// A long-running transaction calls [`PriorityIdGen::reuse`] across retries
/// instead of [`PriorityIdGen::fresh`], keeping its `epoch_id` pinned to the
/// value observed at its first attempt; since the epoch only advances, this
/// makes the transaction's priority value relatively shrink (i.e. its
/// priority relatively grows) the longer it retries.
pub struct PriorityIdGen {
    worker_id: u32,
    epoch: EpochReader,
}

impl PriorityIdGen {
    /// Bind a generator to `worker_id` (must be `< 2^10`) and an epoch
    /// source.
    pub fn new(worker_id: u32, epoch: EpochReader) -> Self {
        assert!(worker_id < (1 << WORKER_BITS), "worker_id overflow");
        Self { worker_id, epoch }
    }

    /// A fresh priority id for a new transaction attempt, reading the
    /// current epoch.
    pub fn fresh(&self) -> u32 {
        self.pack(self.epoch.current())
    }

    /// A priority id that keeps a prior attempt's `epoch_id` fixed, for a
    /// transaction retrying without restarting its priority clock.
    pub fn reuse(&self, prior: u32) -> u32 {
        let prior_epoch = (prior as u64) & EPOCH_MASK;
        self.pack(prior_epoch)
    }

    fn pack(&self, epoch_id: u64) -> u32 {
        let epoch_id = epoch_id & EPOCH_MASK;
        ((self.worker_id as u64) << EPOCH_BITS | epoch_id) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_txid_is_monotonic_within_a_worker() {
        let gen = BulkTxIdGen::new(2);
        let mut w = gen.worker();
        let ids: Vec<u64> = (0..10).map(|_| w.next()).collect();
        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn bulk_txid_workers_get_disjoint_ranges() {
        let gen = BulkTxIdGen::new(4);
        let mut w1 = gen.worker();
        let mut w2 = gen.worker();
        let a = w1.next();
        let b = w2.next();
        assert_ne!(a, b);
    }

    #[test]
    fn epoch_clock_advances_and_shuts_down_cleanly() {
        let mut clock = EpochClock::start(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.current() >= 1);
        clock.shutdown();
    }

    #[test]
    fn priority_id_smaller_worker_id_wins_at_same_epoch() {
        let epoch = Arc::new(AtomicU64::new(5));
        let reader = EpochReader { epoch: Arc::clone(&epoch) };
        let low = PriorityIdGen::new(0, reader.clone());
        let high = PriorityIdGen::new(1, reader);
        assert!(low.fresh() < high.fresh());
    }

    #[test]
    fn reuse_pins_epoch_id_across_advances() {
        let epoch = Arc::new(AtomicU64::new(1));
        let reader = EpochReader { epoch: Arc::clone(&epoch) };
        let gen = PriorityIdGen::new(3, reader);
        let first = gen.fresh();
        epoch.store(100, Ordering::Release);
        let reused = gen.reuse(first);
        assert_eq!(reused, first);
        let fresh_again = gen.fresh();
        assert!(fresh_again > reused, "later epoch must not win priority over the pinned retry");
    }
}
