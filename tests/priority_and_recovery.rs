//! P3 (wait-die priority invariant), P6 (TicToc commit-ts monotonicity), and
//! P7 (LICC interception respects priority) from spec.md §8. Exercised
//! entirely through each protocol's public `LockSet`/`Mutex` surface — no
//! crate-internal field or `pub(crate)` accessor is touched here, since
//! `tests/` compiles as a separate downstream crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use txcc::config::LiccReadMode;
use txcc::protocols::licc;
use txcc::protocols::tictoc;
use txcc::protocols::waitdie;
use txcc::result::{AbortReason, Outcome};

/// P3: whenever a younger transaction (larger tx_id) would have to wait on
/// an older holder, wait-die either queues it behind an *older* holder or
/// kills it outright — it never grants a younger requester priority over an
/// older holder. Driven purely through `waitdie::LockSet::read_for_update`,
/// with an empty (zero-length) payload since only lock semantics are under
/// test here.
#[test]
fn waitdie_never_grants_younger_over_older_holder() {
    let mutex = Arc::new(waitdie::Mutex::default());
    let older_holding = Arc::new(AtomicBool::new(false));

    let mut holder = waitdie::LockSet::new(0);
    holder.begin(10);
    let mut out: [u8; 0] = [];
    assert_eq!(
        holder.read_for_update(&mutex, &mut [], &mut out),
        Outcome::Committed
    );
    older_holding.store(true, Ordering::Release);

    let m2 = Arc::clone(&mutex);
    let younger = thread::spawn(move || {
        // 20 > 10: younger than the current holder, must die immediately,
        // never be granted while 10 still holds the mutex.
        let mut ls = waitdie::LockSet::new(0);
        ls.begin(20);
        let mut out: [u8; 0] = [];
        assert_eq!(
            ls.read_for_update(&m2, &mut [], &mut out),
            Outcome::Aborted(AbortReason::YoungerDies)
        );
    });
    younger.join().unwrap();

    // An older request (5 < 10) is entitled to queue rather than die; once
    // the holder releases, it must be granted.
    let m3 = Arc::clone(&mutex);
    let older = thread::spawn(move || {
        let mut ls = waitdie::LockSet::new(0);
        ls.begin(5);
        let mut out: [u8; 0] = [];
        assert_eq!(
            ls.read_for_update(&m3, &mut [], &mut out),
            Outcome::Committed
        );
        assert_eq!(ls.precommit(), Outcome::Committed);
    });
    thread::sleep(Duration::from_millis(20));
    assert_eq!(holder.precommit(), Outcome::Committed);
    older.join().unwrap();
}

/// P6: if T1's commit timestamp is smaller than T2's and they conflict on a
/// shared key, T1's write must be the one a subsequent reader observes
/// first — i.e. commit-ts order matches write-visibility order.
#[test]
fn tictoc_commit_ts_orders_conflicting_writes() {
    let mutex = tictoc::Mutex::default();
    let mut shared = vec![0u8; 8];

    let ts_after_t1 = {
        let mut t1 = tictoc::LockSet::new(8, false);
        t1.begin(1);
        let mut out = vec![0u8; 8];
        assert_eq!(t1.read(&mutex, &shared, &mut out), Outcome::Committed);
        t1.write(&mutex, &mut shared, &1u64.to_le_bytes());
        assert_eq!(t1.precommit(), Outcome::Committed);
        mutex.wts()
    };

    let ts_after_t2 = {
        let mut t2 = tictoc::LockSet::new(8, false);
        t2.begin(2);
        let mut out = vec![0u8; 8];
        assert_eq!(t2.read(&mutex, &shared, &mut out), Outcome::Committed);
        t2.write(&mutex, &mut shared, &2u64.to_le_bytes());
        assert_eq!(t2.precommit(), Outcome::Committed);
        mutex.wts()
    };

    assert!(
        ts_after_t2 > ts_after_t1,
        "a later-committing writer must leave a strictly larger wts behind"
    );
    assert_eq!(u64::from_le_bytes(shared[0..8].try_into().unwrap()), 2);
}

/// P7: when a higher-priority (smaller `ord_id`) request intercepts a
/// lower-priority one's reservation, the lower-priority side's own
/// precommit must observe the interception and abort rather than
/// overwriting the higher-priority side's update. Driven purely through
/// `licc::LockSet`, with a zero-length payload (only reservation/precommit
/// outcomes are under test).
#[test]
fn licc_interception_only_ever_favors_higher_priority() {
    let mutex = licc::Mutex::default();

    let mut low = licc::LockSet::new(0, LiccReadMode::Reserve);
    low.begin(1000);
    let mut out: [u8; 0] = [];
    assert_eq!(
        low.read_for_update(&mutex, &mut [], &mut out),
        Outcome::Committed
    );

    let mut high = licc::LockSet::new(0, LiccReadMode::Reserve);
    high.begin(7);
    assert_eq!(
        high.read_for_update(&mutex, &mut [], &mut out),
        Outcome::Committed,
        "a strictly higher-priority (smaller ord_id) request must intercept the reservation"
    );
    assert_eq!(high.precommit(), Outcome::Committed);

    // `low`'s reservation is gone, stolen by `high`'s smaller ord_id; its
    // own precommit must discover the interception and abort rather than
    // silently overwrite `high`'s committed update.
    assert_eq!(
        low.precommit(),
        Outcome::Aborted(AbortReason::Intercepted),
        "a lower-priority reservation that was intercepted must abort at precommit, never commit over the interceptor"
    );
}
