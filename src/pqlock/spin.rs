//! A priority-queuing spinlock backed by a TTAS mutex guarding a binary
//! heap of waiters, grounded on `original_source/include/pqlock.hpp`'s
//! `PQSpinLock`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use super::PqLock;
use crate::backoff::Backoff;

struct WaiterNode {
    priority: u32,
    wait: *const AtomicBool,
}

// Safety: `wait` always points at a `Node::wait` field that outlives the
// time the pointer spends in the shared heap (the waiting thread blocks on
// it until woken, so the pointee cannot be dropped first).
unsafe impl Send for WaiterNode {}

impl PartialEq for WaiterNode {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}
impl Eq for WaiterNode {}
impl PartialOrd for WaiterNode {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for WaiterNode {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the smallest priority value
        // (highest priority) sorts to the top.
        other.priority.cmp(&self.priority)
    }
}

/// Shared state: a TTAS-guarded binary heap of parked waiters plus a
/// "someone holds the lock" flag.
#[derive(Default)]
pub struct Mutex {
    ttas: AtomicBool,
    inner: StdMutex<Inner>,
}

#[derive(Default)]
struct Inner {
    locked: bool,
    queue: BinaryHeap<WaiterNode>,
}

impl Mutex {
    fn with_ttas<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut backoff = Backoff::new();
        while self
            .ttas
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.spin();
        }
        let r = f(&mut self.inner.lock().expect("pqlock::spin inner poisoned"));
        self.ttas.store(false, Ordering::Release);
        r
    }
}

struct Node {
    wait: AtomicBool,
}

/// The held lock; releases on `Drop`, matching the RAII discipline of the
/// other `PqLock` variants.
pub struct SpinLock<'a> {
    mutex: &'a Mutex,
    node: Box<Node>,
}

impl<'a> PqLock<'a> for SpinLock<'a> {
    type Mutex = Mutex;

    fn lock(mutex: &'a Mutex, priority: u32) -> Self {
        let node = Box::new(Node {
            wait: AtomicBool::new(false),
        });
        let should_wait = mutex.with_ttas(|inner| {
            if inner.locked {
                node.wait.store(true, Ordering::Relaxed);
                inner.queue.push(WaiterNode {
                    priority,
                    wait: &node.wait as *const AtomicBool,
                });
                true
            } else {
                inner.locked = true;
                false
            }
        });
        if should_wait {
            let mut backoff = Backoff::new();
            while node.wait.load(Ordering::Acquire) {
                backoff.spin();
            }
        }
        SpinLock { mutex, node }
    }

    fn try_lock(mutex: &'a Mutex, _priority: u32) -> Option<Self> {
        let acquired = mutex.with_ttas(|inner| {
            if inner.locked {
                false
            } else {
                inner.locked = true;
                true
            }
        });
        if !acquired {
            return None;
        }
        Some(SpinLock {
            mutex,
            node: Box::new(Node {
                wait: AtomicBool::new(false),
            }),
        })
    }

    fn top_priority_in_wait_queue(&self) -> u32 {
        self.mutex
            .with_ttas(|inner| inner.queue.peek().map(|n| n.priority).unwrap_or(u32::MAX))
    }
}

impl Drop for SpinLock<'_> {
    fn drop(&mut self) {
        self.mutex.with_ttas(|inner| {
            debug_assert!(inner.locked);
            match inner.queue.pop() {
                None => inner.locked = false,
                Some(next) => {
                    // SAFETY: the waiter that pushed this node is still
                    // blocked on it, so the pointee is alive.
                    unsafe { (*next.wait).store(false, Ordering::Release) };
                }
            }
        });
    }
}
