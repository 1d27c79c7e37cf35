//! Workload/run parameters shared by every protocol's driver.
//!
//! `Params` is a plain data record: it carries the knobs a benchmark driver
//! would set (worker count, mutex count, payload size, read/write mix,
//! long-transaction sizing, protocol-specific toggles) without parsing a
//! command line itself — a CLI is out of scope for this crate.

use crate::affinity::Affinity;

/// How transaction IDs / priorities are generated (spec §4.5/§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxIdGen {
    /// Monotonic counter, bulk-allocated per worker to avoid contention.
    #[default]
    Bulk,
    /// `(worker_id, epoch_id)` priority pair, epoch advanced by a background
    /// clock (used by Wait-Die, LICC, TRLock).
    Priority,
}

/// LICC's read strategy (spec §4.9), grounded on `licc_bench.cpp`'s
/// `ReadMode::{PCC, OCC, HYBRID}` and its `tryInvisibleRead` predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiccReadMode {
    /// PCC: `read_and_reserve`, a single CAS reserves directly, every time.
    #[default]
    Reserve,
    /// OCC: `invisible_read` every time; reservation is deferred entirely
    /// to `read_for_update`/precommit.
    Occ,
    /// HYBRID: invisible read on a short transaction's first attempt
    /// (`!is_long_tx && retry == 0`), reserved read otherwise — long
    /// transactions and any retry always reserve up front.
    Hybrid,
}

/// Which auxiliary queueing lock backs a protocol's blocking paths
/// (spec §4.2, component C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PqLockKind {
    /// No queueing: plain CAS spin.
    None,
    /// MCS queue, classic two-CAS variant.
    Mcs1,
    /// MCS queue, single-CAS tail-swap variant.
    #[default]
    Mcs2,
    /// MCS queue, dummy-node-free variant with a release-time "manager" bit.
    Mcs3,
    /// Priority-ordered insertion spin lock.
    Spin,
    /// Condition-variable based blocking lock.
    Posix,
}

/// Run configuration shared by every protocol's benchmark driver.
#[derive(Debug, Clone)]
pub struct Params {
    /// Number of worker threads.
    pub nr_threads: usize,
    /// Total number of mutexes (records) in the table.
    pub nr_mutexes: usize,
    /// Payload size in bytes attached to each record (0 disables payload
    /// copying).
    pub payload_size: usize,
    /// Wall-clock run length in seconds, for a timed benchmark loop.
    pub run_seconds: u64,
    /// Operations per short transaction.
    pub ops_per_tx: usize,
    /// Write operations per short transaction (<= `ops_per_tx`).
    pub writes_per_tx: usize,
    /// Size of a long transaction, in operations; 0 disables long
    /// transactions entirely.
    pub long_tx_size: usize,
    /// Number of worker threads dedicated to running long transactions.
    pub nr_threads_for_long_tx: usize,
    /// Write operations per long transaction.
    pub writes_per_long_tx: usize,
    /// Thread placement policy, passed through to the driver.
    pub affinity: Affinity,
    /// Transaction ID / priority generation strategy.
    pub txid_gen: TxIdGen,
    /// Whether to apply randomized exponential back-off between retries.
    pub use_backoff: bool,
    /// Whether reads that will later be written should eagerly take a
    /// read-for-update (upgradeable) lock instead of a plain shared one.
    pub eager_read_for_update: bool,
    /// LICC's reserved-read strategy.
    pub licc_read_mode: LiccReadMode,
    /// Which PQLock variant backs blocking paths.
    pub pqlock_kind: PqLockKind,
    /// Verbose diagnostic logging.
    pub verbose: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            nr_threads: 1,
            nr_mutexes: 1,
            payload_size: 0,
            run_seconds: 10,
            ops_per_tx: 4,
            writes_per_tx: 2,
            long_tx_size: 0,
            nr_threads_for_long_tx: 0,
            writes_per_long_tx: 2,
            affinity: Affinity::None,
            txid_gen: TxIdGen::default(),
            use_backoff: true,
            eager_read_for_update: false,
            licc_read_mode: LiccReadMode::default(),
            pqlock_kind: PqLockKind::default(),
            verbose: false,
        }
    }
}

impl Params {
    /// A minimal, single-threaded, single-mutex configuration, handy as a
    /// starting point for unit tests.
    pub fn new(nr_threads: usize, nr_mutexes: usize) -> Self {
        Self {
            nr_threads,
            nr_mutexes,
            ..Default::default()
        }
    }

    /// Whether long transactions are enabled in this run.
    pub fn has_long_tx(&self) -> bool {
        self.long_tx_size > 0 && self.nr_threads_for_long_tx > 0
    }
}
