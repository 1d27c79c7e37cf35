//! A priority-queuing MCS lock that amortizes the naive variant's rescans:
//! nodes are drained out of the lock-free MCS chain into a persistent
//! min-heap once, then popped incrementally on each unlock instead of being
//! rescanned every time. Grounded on
//! `original_source/include/pqlock.hpp`'s `PQMcsLock2`, simplified to use a
//! TTAS-guarded drain cursor in place of the original's dummy-node pool.

use std::cell::UnsafeCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use super::PqLock;
use crate::backoff::Backoff;

struct Node {
    next: AtomicPtr<Node>,
    pri: u32,
    wait: AtomicBool,
}

impl Node {
    fn new(pri: u32) -> Box<Self> {
        Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            pri,
            wait: AtomicBool::new(false),
        })
    }
}

struct Entry(*mut Node);
// SAFETY: entries only live in `priq` while the pointee is parked on
// `wait`, so the pointee cannot be moved or dropped concurrently.
unsafe impl Send for Entry {}
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        unsafe { (*self.0).pri == (*other.0).pri }
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
        unsafe { (*other.0).pri.cmp(&(*self.0).pri) }
    }
}

/// Shared MCS tail plus a TTAS-guarded drain cursor and min-heap.
pub struct Mutex {
    tail: AtomicPtr<Node>,
    guard: AtomicBool,
    // Everything below is only touched while `guard` is held.
    drained_up_to: UnsafeCell<*mut Node>,
    priq: UnsafeCell<BinaryHeap<Entry>>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
            guard: AtomicBool::new(false),
            drained_up_to: UnsafeCell::new(ptr::null_mut()),
            priq: UnsafeCell::new(BinaryHeap::new()),
        }
    }
}

// SAFETY: `guard` serializes all access to the `UnsafeCell` fields.
unsafe impl Sync for Mutex {}

impl Mutex {
    fn with_guard<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut backoff = Backoff::new();
        while self
            .guard
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.spin();
        }
        let r = f();
        self.guard.store(false, Ordering::Release);
        r
    }

    /// Drain every node reachable from `drained_up_to`'s successor through
    /// `tail_snapshot` into `priq`, waiting for in-flight `next` stores to
    /// land. Must be called with `guard` held.
    fn drain(&self, tail_snapshot: *mut Node) {
        let mut backoff = Backoff::new();
        let start = unsafe { *self.drained_up_to.get() };
        let mut p = if start.is_null() {
            // Nothing drained yet; nothing to resume from either, the first
            // lock holder never enqueues itself.
            return;
        } else {
            start
        };
        loop {
            let next = loop {
                let n = unsafe { (*p).next.load(Ordering::Acquire) };
                if !n.is_null() {
                    break n;
                }
                backoff.spin();
            };
            unsafe {
                (*self.priq.get()).push(Entry(next));
            }
            p = next;
            if p == tail_snapshot {
                break;
            }
        }
        unsafe {
            *self.drained_up_to.get() = tail_snapshot;
        }
    }
}

/// The held lock; releases on `Drop`.
pub struct Mcs2Lock<'a> {
    mutex: &'a Mutex,
    node: Box<Node>,
}

impl Mcs2Lock<'_> {
    fn self_ptr(&self) -> *mut Node {
        &*self.node as *const Node as *mut Node
    }
}

impl<'a> PqLock<'a> for Mcs2Lock<'a> {
    type Mutex = Mutex;

    fn lock(mutex: &'a Mutex, priority: u32) -> Self {
        let node = Node::new(priority);
        let self_ptr = &*node as *const Node as *mut Node;
        let prev = mutex.tail.swap(self_ptr, Ordering::AcqRel);
        if !prev.is_null() {
            node.wait.store(true, Ordering::Relaxed);
            unsafe { (*prev).next.store(self_ptr, Ordering::Release) };
            let mut backoff = Backoff::new();
            while node.wait.load(Ordering::Acquire) {
                backoff.spin();
            }
        } else {
            mutex.with_guard(|| unsafe {
                *mutex.drained_up_to.get() = self_ptr;
            });
        }
        Mcs2Lock { mutex, node }
    }

    fn try_lock(mutex: &'a Mutex, priority: u32) -> Option<Self> {
        let node = Node::new(priority);
        let self_ptr = &*node as *const Node as *mut Node;
        let ok = mutex
            .tail
            .compare_exchange(ptr::null_mut(), self_ptr, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if !ok {
            return None;
        }
        mutex.with_guard(|| unsafe {
            *mutex.drained_up_to.get() = self_ptr;
        });
        Some(Mcs2Lock { mutex, node })
    }

    fn top_priority_in_wait_queue(&self) -> u32 {
        self.mutex.with_guard(|| {
            let tail = self.mutex.tail.load(Ordering::Acquire);
            if tail != self.self_ptr() {
                self.mutex.drain(tail);
            }
            unsafe { (*self.mutex.priq.get()).peek().map(|e| unsafe { (*e.0).pri }) }
                .unwrap_or(u32::MAX)
        })
    }
}

impl Drop for Mcs2Lock<'_> {
    fn drop(&mut self) {
        let self_ptr = self.self_ptr();
        self.mutex.with_guard(|| {
            let empty = unsafe { (*self.mutex.priq.get()).is_empty() };
            if empty {
                let tail = self.mutex.tail.load(Ordering::Acquire);
                if tail == self_ptr {
                    if self
                        .mutex
                        .tail
                        .compare_exchange(self_ptr, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        unsafe { *self.mutex.drained_up_to.get() = ptr::null_mut() };
                        return;
                    }
                }
                let tail = self.mutex.tail.load(Ordering::Acquire);
                self.mutex.drain(tail);
            }
            let next = unsafe { (*self.mutex.priq.get()).pop() }.expect("non-empty after drain");
            unsafe { (*next.0).wait.store(false, Ordering::Release) };
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn single_thread_lock_unlock() {
        let m = Mutex::default();
        {
            let _g = Mcs2Lock::lock(&m, 0);
        }
        let _g2 = Mcs2Lock::lock(&m, 0);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = Mutex::default();
        let _g = Mcs2Lock::lock(&m, 0);
        assert!(Mcs2Lock::try_lock(&m, 0).is_none());
    }

    #[test]
    fn lowest_priority_value_wakes_first() {
        let m = Arc::new(Mutex::default());
        let order = Arc::new(StdMutex::new(Vec::new()));
        let held = Mcs2Lock::lock(&m, 0);

        let (m1, o1) = (Arc::clone(&m), Arc::clone(&order));
        let t1 = std::thread::spawn(move || {
            let _g = Mcs2Lock::lock(&m1, 10);
            o1.lock().unwrap().push(10u32);
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        let (m2, o2) = (Arc::clone(&m), Arc::clone(&order));
        let t2 = std::thread::spawn(move || {
            let _g = Mcs2Lock::lock(&m2, 1);
            o2.lock().unwrap().push(1u32);
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        drop(held);
        t1.join().unwrap();
        t2.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 10]);
    }
}
