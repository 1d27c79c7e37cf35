//! P1 (serializability) and S1 (single-key write contention) from spec.md
//! §8, run against OCC and Wait-Die: several threads race to increment a
//! shared counter record through each protocol's `LockSet`; every committed
//! write must be indivisible (no torn write visible to a later reader) and
//! the final value must equal the number of committed writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use txcc::protocols::occ;
use txcc::protocols::waitdie;
use txcc::result::Outcome;

const PAYLOAD: usize = 8;
const THREADS: usize = 8;
const ITERS: usize = 100;

/// A record's payload lives behind a raw pointer so multiple worker threads
/// can pass `&mut [u8]` into a `LockSet`; the protocol's own mutex header
/// (CAS'd lock bit / reservation word) is what actually serializes access,
/// not Rust's borrow checker, so this is sound exactly as long as every
/// access goes through the protocol.
struct SharedPayload {
    bytes: std::cell::UnsafeCell<[u8; PAYLOAD]>,
}
unsafe impl Sync for SharedPayload {}

impl SharedPayload {
    fn new() -> Self {
        Self {
            bytes: std::cell::UnsafeCell::new([0u8; PAYLOAD]),
        }
    }
    unsafe fn as_mut(&self) -> &mut [u8] {
        &mut *self.bytes.get()
    }
    fn snapshot(&self) -> [u8; PAYLOAD] {
        unsafe { *self.bytes.get() }
    }
}

#[test]
fn occ_serializable_counter_under_contention() {
    let mutex = Arc::new(occ::Mutex::default());
    let payload = Arc::new(SharedPayload::new());
    let commits = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|tid| {
            let mutex = Arc::clone(&mutex);
            let payload = Arc::clone(&payload);
            let commits = Arc::clone(&commits);
            thread::spawn(move || {
                let mut local_commits = 0u64;
                for _ in 0..ITERS {
                    let mut ls = occ::LockSet::new(PAYLOAD, false);
                    ls.begin(tid as u64);
                    let mut out = [0u8; PAYLOAD];
                    let shared = unsafe { payload.as_mut() };
                    assert_eq!(ls.read(&mutex, shared, &mut out), Outcome::Committed);
                    let current = u64::from_le_bytes(out);
                    // Every 8 bytes of the payload carry the same counter
                    // value: a torn read would show mismatched halves.
                    assert_eq!(&out[0..4], &current.to_le_bytes()[0..4]);
                    let next = (current + 1).to_le_bytes();
                    ls.write(&mutex, shared, &next);
                    if ls.precommit() == Outcome::Committed {
                        local_commits += 1;
                    }
                }
                commits.fetch_add(local_commits, Ordering::Relaxed);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let final_value = u64::from_le_bytes(payload.snapshot());
    let total_commits = commits.load(Ordering::Relaxed);
    assert!(total_commits > 0, "S1: at least one commit must happen");
    assert_eq!(
        final_value, total_commits,
        "P1: the counter must reflect exactly the committed writes, no torn or lost updates"
    );
}

#[test]
fn waitdie_serializable_counter_under_contention() {
    let mutex = Arc::new(waitdie::Mutex::default());
    let payload = Arc::new(SharedPayload::new());
    let commits = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|tid| {
            let mutex = Arc::clone(&mutex);
            let payload = Arc::clone(&payload);
            let commits = Arc::clone(&commits);
            thread::spawn(move || {
                let mut local_commits = 0u64;
                for i in 0..ITERS {
                    // Stagger priorities across iterations so both younger
                    // and older requesters show up on the shared mutex.
                    let tx_id = (tid as u64) * (ITERS as u64) + i as u64;
                    let mut ls = waitdie::LockSet::new(PAYLOAD);
                    ls.begin(tx_id);
                    loop {
                        let shared = unsafe { payload.as_mut() };
                        let mut out = [0u8; PAYLOAD];
                        match ls.read_for_update(&mutex, shared, &mut out) {
                            Outcome::Committed => {
                                let current = u64::from_le_bytes(out);
                                let next = (current + 1).to_le_bytes();
                                let shared = unsafe { payload.as_mut() };
                                ls.write(&mutex, shared, &next);
                                break;
                            }
                            _ => {
                                // Younger died; retry is the caller's job.
                                thread::yield_now();
                                continue;
                            }
                        }
                    }
                    if ls.precommit() == Outcome::Committed {
                        local_commits += 1;
                    }
                }
                commits.fetch_add(local_commits, Ordering::Relaxed);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let final_value = u64::from_le_bytes(payload.snapshot());
    let total_commits = commits.load(Ordering::Relaxed);
    assert!(total_commits > 0);
    assert_eq!(final_value, total_commits);
}
