//! S2 (long + short mix) and S3 (Zipfian write-heavy) scenario tests from
//! spec.md §8. Both are run at a much smaller scale and shorter duration
//! than the literal numbers in the spec (40 000/1 000 000 records, 10 s) so
//! the suite stays fast; the qualitative assertions (long-tx commits at
//! least once, short-tx throughput stays bounded; no deadlock, hot-key
//! aborts accrue) are the same ones the spec calls for.
//!
//! The workload generator itself (Zipfian/uniform key selection) is out of
//! this crate's scope (spec.md §1); the small key sampler below is local
//! test scaffolding, not a crate module, and is an approximation of the
//! classic inverse-transform Zipfian generator (rank ∝ `u^(1/(1-θ))`) —
//! good enough to reliably concentrate load on a handful of hot keys,
//! which is all these two scenarios need from it.
//!
//! Every touched key needs its own `&'a mut [u8]` scratch slot per
//! transaction attempt: LICC's and Wait-Die's `read`/`read_for_update`
//! both retain the `shared` reference in their entry table for use at
//! precommit, so a transient `&mut []` temporary (dropped at the end of
//! the statement) won't live long enough. Each transaction below
//! pre-allocates one zero-length slot per operation and hands them out
//! with `Vec::pop`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};

use txcc::config::LiccReadMode;
use txcc::protocols::licc;
use txcc::protocols::occ;
use txcc::protocols::waitdie;
use txcc::result::Outcome;

fn zipfian_key(rng: &mut impl Rng, n_records: u64, theta: f64) -> u64 {
    let u: f64 = rng.gen_range(0.0..1.0);
    let rank = (n_records as f64) * u.powf(1.0 / (1.0 - theta));
    (rank as u64).min(n_records - 1)
}

fn scratch_slots(n: usize) -> Vec<[u8; 0]> {
    vec![[]; n]
}

const S2_RECORDS: usize = 2_000;
const S2_SHORT_THREADS: usize = 7;
const S2_LONG_TX_SIZE: usize = 200;
const S2_SHORT_TX_SIZE: usize = 10;
const RUN: Duration = Duration::from_millis(400);

/// S2: one long transaction hogging 10% of the keyspace on thread 0 must
/// still commit at least once, and the short-transaction threads must keep
/// making progress alongside it rather than starving outright.
#[test]
fn licc_long_and_short_transactions_both_make_progress() {
    let mutexes: Arc<Vec<licc::Mutex>> =
        Arc::new((0..S2_RECORDS).map(|_| licc::Mutex::default()).collect());
    let long_commits = Arc::new(AtomicU64::new(0));
    let short_commits = Arc::new(AtomicU64::new(0));
    let quit = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let long_handle = {
        let mutexes = Arc::clone(&mutexes);
        let long_commits = Arc::clone(&long_commits);
        let quit = Arc::clone(&quit);
        thread::spawn(move || {
            let mut tx = 0u32;
            while !quit.load(Ordering::Relaxed) {
                let mut bufs = scratch_slots(S2_LONG_TX_SIZE);
                let mut slots: Vec<&mut [u8]> =
                    bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
                let mut ls = licc::LockSet::new(0, LiccReadMode::Hybrid);
                // Lowest priority: this transaction never wins an
                // interception race against a short transaction.
                ls.begin(u32::MAX - tx);
                tx = tx.wrapping_add(1);
                let mut ok = true;
                for i in 0..S2_LONG_TX_SIZE {
                    let mut out: [u8; 0] = [];
                    let buf = slots.pop().unwrap();
                    if ls.read_for_update(&mutexes[i], buf, &mut out) != Outcome::Committed {
                        ok = false;
                        break;
                    }
                }
                if ok && ls.precommit() == Outcome::Committed {
                    long_commits.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    };

    let short_handles: Vec<_> = (0..S2_SHORT_THREADS)
        .map(|tid| {
            let mutexes = Arc::clone(&mutexes);
            let short_commits = Arc::clone(&short_commits);
            let quit = Arc::clone(&quit);
            thread::spawn(move || {
                let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(tid as u64 + 1);
                let mut tx = 0u32;
                while !quit.load(Ordering::Relaxed) {
                    let mut bufs = scratch_slots(S2_SHORT_TX_SIZE);
                    let mut slots: Vec<&mut [u8]> =
                        bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
                    let mut ls = licc::LockSet::new(0, LiccReadMode::Hybrid);
                    // High priority relative to the long transaction.
                    ls.begin(tid as u32 * 1000 + tx);
                    tx = tx.wrapping_add(1);
                    let mut ok = true;
                    for i in 0..S2_SHORT_TX_SIZE {
                        let idx = rng.gen_range(0..S2_RECORDS);
                        let mut out: [u8; 0] = [];
                        let buf = slots.pop().unwrap();
                        let writer = i % 2 == 0; // 50% writes
                        let outcome = if writer {
                            ls.read_for_update(&mutexes[idx], buf, &mut out)
                        } else {
                            ls.read(&mutexes[idx], buf, &mut out)
                        };
                        if outcome != Outcome::Committed {
                            ok = false;
                            break;
                        }
                    }
                    if ok && ls.precommit() == Outcome::Committed {
                        short_commits.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    thread::sleep(RUN);
    quit.store(true, Ordering::Relaxed);
    long_handle.join().unwrap();
    for h in short_handles {
        h.join().unwrap();
    }

    assert!(
        long_commits.load(Ordering::Relaxed) >= 1,
        "S2: the long transaction must commit at least once"
    );
    assert!(
        short_commits.load(Ordering::Relaxed) > 0,
        "S2: short transactions must keep making progress alongside the long one"
    );
}

const S3_RECORDS: u64 = 20_000;
const S3_THREADS: usize = 8;
const S3_THETA: f64 = 0.99;
const S3_OPS_PER_TX: usize = 10;

/// S3: under skewed (Zipfian) write-heavy access, every protocol must keep
/// committing without deadlocking; OCC must see non-zero aborts (its
/// validation-at-precommit design guarantees contention produces some);
/// Wait-Die must see its abort count exceed its commit count specifically
/// among accesses to the single hottest key, while still committing
/// overall.
#[test]
fn zipfian_write_heavy_all_protocols_make_progress_without_deadlock() {
    occ_under_skew();
    waitdie_under_skew_hot_key();
}

fn occ_under_skew() {
    let mutexes: Arc<Vec<occ::Mutex>> =
        Arc::new((0..S3_RECORDS).map(|_| occ::Mutex::default()).collect());
    let commits = Arc::new(AtomicU64::new(0));
    let aborts = Arc::new(AtomicU64::new(0));
    let deadline = Instant::now() + RUN;

    let handles: Vec<_> = (0..S3_THREADS)
        .map(|tid| {
            let mutexes = Arc::clone(&mutexes);
            let commits = Arc::clone(&commits);
            let aborts = Arc::clone(&aborts);
            thread::spawn(move || {
                let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(tid as u64 + 100);
                while Instant::now() < deadline {
                    // Only writes need a persistent slot (occ::read's
                    // `shared` isn't retained past the call).
                    let mut bufs = scratch_slots(S3_OPS_PER_TX);
                    let mut slots: Vec<&mut [u8]> =
                        bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
                    let mut ls = occ::LockSet::new(0, false);
                    ls.begin(tid as u64);
                    let mut out: [u8; 0] = [];
                    for i in 0..S3_OPS_PER_TX {
                        let idx = zipfian_key(&mut rng, S3_RECORDS, S3_THETA) as usize;
                        assert_eq!(
                            ls.read(&mutexes[idx], &[], &mut out),
                            Outcome::Committed
                        );
                        if i % 2 == 0 {
                            let buf = slots.pop().unwrap();
                            ls.write(&mutexes[idx], buf, &[]);
                        }
                    }
                    match ls.precommit() {
                        Outcome::Committed => {
                            commits.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            aborts.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(commits.load(Ordering::Relaxed) > 0, "S3: OCC must keep committing");
    assert!(
        aborts.load(Ordering::Relaxed) > 0,
        "S3: OCC must report non-zero aborts under skewed write-heavy contention"
    );
}

fn waitdie_under_skew_hot_key() {
    let mutexes: Arc<Vec<waitdie::Mutex>> = Arc::new(
        (0..S3_RECORDS)
            .map(|_| waitdie::Mutex::default())
            .collect(),
    );
    let commits = Arc::new(AtomicU64::new(0));
    // Dedicated counters for the single hottest key (index 0, guaranteed to
    // be the most frequently sampled rank under the Zipfian skew).
    let hot_commits = Arc::new(AtomicU64::new(0));
    let hot_aborts = Arc::new(AtomicU64::new(0));
    let deadline = Instant::now() + RUN;

    let handles: Vec<_> = (0..S3_THREADS)
        .map(|tid| {
            let mutexes = Arc::clone(&mutexes);
            let commits = Arc::clone(&commits);
            let hot_commits = Arc::clone(&hot_commits);
            let hot_aborts = Arc::clone(&hot_aborts);
            thread::spawn(move || {
                let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(tid as u64 + 200);
                let mut tx = 0u64;
                while Instant::now() < deadline {
                    let tx_id = (tid as u64) * 10_000_000 + tx;
                    tx = tx.wrapping_add(1);
                    let mut bufs = scratch_slots(S3_OPS_PER_TX);
                    let mut slots: Vec<&mut [u8]> =
                        bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
                    let mut ls = waitdie::LockSet::new(0);
                    ls.begin(tx_id);
                    let mut touched_hot = false;
                    let mut ok = true;
                    for _ in 0..S3_OPS_PER_TX {
                        let idx = zipfian_key(&mut rng, S3_RECORDS, S3_THETA) as usize;
                        if idx == 0 {
                            touched_hot = true;
                        }
                        let mut out: [u8; 0] = [];
                        let buf = slots.pop().unwrap();
                        if ls.read_for_update(&mutexes[idx], buf, &mut out) != Outcome::Committed {
                            ok = false;
                            if touched_hot {
                                hot_aborts.fetch_add(1, Ordering::Relaxed);
                            }
                            break;
                        }
                    }
                    if ok {
                        if ls.precommit() == Outcome::Committed {
                            commits.fetch_add(1, Ordering::Relaxed);
                            if touched_hot {
                                hot_commits.fetch_add(1, Ordering::Relaxed);
                            }
                        } else if touched_hot {
                            hot_aborts.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(
        commits.load(Ordering::Relaxed) > 0,
        "S3: wait-die must keep committing overall despite skew"
    );
    assert!(
        hot_aborts.load(Ordering::Relaxed) > hot_commits.load(Ordering::Relaxed),
        "S3: on the hottest key, wait-die's die rate must exceed its commit rate under this much contention"
    );
}
