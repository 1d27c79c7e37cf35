//! A priority-queuing MCS lock, naive variant: on release the holder scans
//! the whole waiter chain for the globally lowest priority value and wakes
//! that waiter directly, grounded on `original_source/include/pqlock.hpp`'s
//! `PQMcsLock` ("naive implementation", O(n) unlock).

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use super::PqLock;
use crate::backoff::Backoff;

/// The MCS tail pointer shared by all waiters on one logical lock.
#[derive(Default)]
pub struct Mutex {
    tail: AtomicPtr<Node>,
}

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

/// The held lock; wakes the globally lowest-priority waiter on `Drop`.
pub struct Mcs1Lock<'a> {
    mutex: &'a Mutex,
    node: Box<Node>,
}

impl Mcs1Lock<'_> {
    fn self_ptr(&self) -> *mut Node {
        &*self.node as *const Node as *mut Node
    }
}

impl<'a> PqLock<'a> for Mcs1Lock<'a> {
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
        }
        Mcs1Lock { mutex, node }
    }

    fn try_lock(mutex: &'a Mutex, priority: u32) -> Option<Self> {
        let node = Node::new(priority);
        let self_ptr = &*node as *const Node as *mut Node;
        mutex
            .tail
            .compare_exchange(
                ptr::null_mut(),
                self_ptr,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .ok()
            .map(|_| Mcs1Lock { mutex, node })
    }

    fn top_priority_in_wait_queue(&self) -> u32 {
        let mut best = u32::MAX;
        let mut p = self.node.next.load(Ordering::Acquire);
        while !p.is_null() {
            let node = unsafe { &*p };
            best = best.min(node.pri);
            p = node.next.load(Ordering::Acquire);
        }
        best
    }
}

impl Drop for Mcs1Lock<'_> {
    fn drop(&mut self) {
        let self_ptr = self.self_ptr();
        if self.node.next.load(Ordering::Acquire).is_null() {
            if self
                .mutex
                .tail
                .compare_exchange(self_ptr, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            let mut backoff = Backoff::new();
            while self.node.next.load(Ordering::Acquire).is_null() {
                backoff.spin();
            }
        }
        let tail = self.mutex.tail.load(Ordering::Acquire);
        let mut min_ptr = self.node.next.load(Ordering::Acquire);
        let mut p = min_ptr;
        let mut backoff = Backoff::new();
        while p != tail {
            let next = loop {
                let n = unsafe { (*p).next.load(Ordering::Acquire) };
                if !n.is_null() {
                    break n;
                }
                backoff.spin();
            };
            p = next;
            if unsafe { (*p).pri } < unsafe { (*min_ptr).pri } {
                min_ptr = p;
            }
        }
        unsafe { (*min_ptr).wait.store(false, Ordering::Release) };
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
            let _g = Mcs1Lock::lock(&m, 0);
        }
        let _g2 = Mcs1Lock::lock(&m, 0);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = Mutex::default();
        let _g = Mcs1Lock::lock(&m, 0);
        assert!(Mcs1Lock::try_lock(&m, 0).is_none());
    }

    #[test]
    fn lowest_priority_value_wakes_first() {
        let m = Arc::new(Mutex::default());
        let order = Arc::new(StdMutex::new(Vec::new()));
        let held = Mcs1Lock::lock(&m, 0);

        let (m1, o1) = (Arc::clone(&m), Arc::clone(&order));
        let t1 = std::thread::spawn(move || {
            let _g = Mcs1Lock::lock(&m1, 10);
            o1.lock().unwrap().push(10u32);
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        let (m2, o2) = (Arc::clone(&m), Arc::clone(&order));
        let t2 = std::thread::spawn(move || {
            let _g = Mcs1Lock::lock(&m2, 1);
            o2.lock().unwrap().push(1u32);
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        drop(held);
        t1.join().unwrap();
        t2.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 10]);
    }
}
