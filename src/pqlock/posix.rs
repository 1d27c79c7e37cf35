//! A priority-queuing lock that parks blocked waiters on a condition
//! variable instead of spinning, trading latency for not burning a core
//! while queued. Grounded on `original_source/include/pqlock.hpp`'s
//! `PQPosixLock`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex as StdMutex};

use super::PqLock;

struct Waiter {
    pri: u32,
    granted: bool,
}

struct Entry {
    pri: u32,
    cell: std::sync::Arc<(StdMutex<Waiter>, Condvar)>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.pri == other.pri
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.pri.cmp(&self.pri)
    }
}

/// Shared state: a `locked` flag plus a priority queue of parked waiters,
/// both guarded by one conventional mutex.
#[derive(Default)]
pub struct Mutex {
    inner: StdMutex<Inner>,
}

#[derive(Default)]
struct Inner {
    locked: bool,
    priq: BinaryHeap<Entry>,
}

/// The held lock; releases (and wakes the next waiter, if any) on `Drop`.
pub struct PosixLock<'a> {
    mutex: &'a Mutex,
}

impl<'a> PqLock<'a> for PosixLock<'a> {
    type Mutex = Mutex;

    fn lock(mutex: &'a Mutex, priority: u32) -> Self {
        let mut inner = mutex.inner.lock().expect("pqlock::posix inner poisoned");
        if !inner.locked {
            inner.locked = true;
            return PosixLock { mutex };
        }
        let cell = std::sync::Arc::new((
            StdMutex::new(Waiter {
                pri: priority,
                granted: false,
            }),
            Condvar::new(),
        ));
        inner.priq.push(Entry {
            pri: priority,
            cell: cell.clone(),
        });
        drop(inner);

        let (wlock, cvar) = &*cell;
        let mut w = wlock.lock().expect("pqlock::posix waiter poisoned");
        while !w.granted {
            w = cvar.wait(w).expect("pqlock::posix wait poisoned");
        }
        PosixLock { mutex }
    }

    fn try_lock(mutex: &'a Mutex, _priority: u32) -> Option<Self> {
        let mut inner = mutex.inner.lock().expect("pqlock::posix inner poisoned");
        if inner.locked {
            None
        } else {
            inner.locked = true;
            Some(PosixLock { mutex })
        }
    }

    fn top_priority_in_wait_queue(&self) -> u32 {
        let inner = self.mutex.inner.lock().expect("pqlock::posix inner poisoned");
        inner.priq.peek().map(|e| e.pri).unwrap_or(u32::MAX)
    }
}

impl Drop for PosixLock<'_> {
    fn drop(&mut self) {
        let mut inner = self.mutex.inner.lock().expect("pqlock::posix inner poisoned");
        match inner.priq.pop() {
            None => inner.locked = false,
            Some(entry) => {
                drop(inner);
                let (wlock, cvar) = &*entry.cell;
                let mut w = wlock.lock().expect("pqlock::posix waiter poisoned");
                w.granted = true;
                cvar.notify_one();
            }
        }
    }
}
