//! The dummy-node-free priority-queuing MCS lock: a single tagged word
//! (`tail_with_bit`) doubles as the MCS tail pointer and a "no manager yet"
//! sentinel, letting the first arriving waiter become the *manager*
//! responsible for draining the chain into a priority queue and notifying
//! whoever is next, without any separate dummy node or pool. Grounded on
//! `original_source/include/pqlock.hpp`'s `PQMcsLock3`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use super::PqLock;
use crate::backoff::Backoff;

const MANAGER_BIT: usize = 1;

struct Node {
    next: AtomicPtr<Node>,
    order: u32,
    wait: AtomicBool,
}

impl Node {
    fn new(order: u32) -> Box<Self> {
        Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            order,
            wait: AtomicBool::new(false),
        })
    }
}

struct Entry(*mut Node);
// SAFETY: an `Entry` only lives in `priQ` while its pointee is parked on
// `wait`, waiting for exactly this lock to notify it.
unsafe impl Send for Entry {}
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        unsafe { (*self.0).order == (*other.0).order }
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
        unsafe { (*other.0).order.cmp(&(*self.0).order) }
    }
}

/// Shared state. Initial value of `tail_with_bit` is `1`: no requester, no
/// manager, lock free.
pub struct Mutex {
    tail_with_bit: AtomicUsize,
    // Only the current manager may touch `head` and `priq`.
    head: AtomicPtr<Node>,
    priq: std::cell::UnsafeCell<BinaryHeap<Entry>>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self {
            tail_with_bit: AtomicUsize::new(MANAGER_BIT),
            head: AtomicPtr::new(ptr::null_mut()),
            priq: std::cell::UnsafeCell::new(BinaryHeap::new()),
        }
    }
}

// SAFETY: `head`/`priq` are only touched by the thread currently holding
// manager responsibility, which is established by the tagged-word protocol.
unsafe impl Sync for Mutex {}

impl Mutex {
    fn node_ptr(p: *mut Node) -> usize {
        p as usize
    }

    /// Drain the chain from `node` through `tail` (inclusive) into `priq`.
    /// Only the manager calls this.
    fn move_chain_to_priq(&self, mut node: *mut Node, tail: *mut Node) {
        let mut backoff = Backoff::new();
        loop {
            unsafe { (*self.priq.get()).push(Entry(node)) };
            if node == tail {
                return;
            }
            let next = loop {
                let n = unsafe { (*node).next.load(Ordering::Acquire) };
                if !n.is_null() {
                    break n;
                }
                backoff.spin();
            };
            node = next;
        }
    }

    /// Pull whatever arrived since the manager last drained, as `(head,
    /// tail)`, resetting `tail_with_bit` to the plain "manager active, no
    /// pending chain" state (`0`).
    fn extract_from_chain(&self) -> (*mut Node, *mut Node) {
        let mut backoff = Backoff::new();
        loop {
            let h = self.head.load(Ordering::Acquire);
            if !h.is_null() {
                self.head.store(ptr::null_mut(), Ordering::Relaxed);
                let tail_with_bit = self.tail_with_bit.swap(0, Ordering::AcqRel);
                debug_assert!(tail_with_bit > MANAGER_BIT);
                return (h, tail_with_bit as *mut Node);
            }
            backoff.spin();
        }
    }
}

/// The held lock. `Drop` both releases the lock and, if this thread is the
/// manager, performs the manager's bookkeeping.
pub struct Mcs3Lock<'a> {
    mutex: &'a Mutex,
    node: Box<Node>,
}

impl<'a> PqLock<'a> for Mcs3Lock<'a> {
    type Mutex = Mutex;

    fn lock(mutex: &'a Mutex, order: u32) -> Self {
        let mut node = Node::new(order);
        let self_ptr: *mut Node = &mut *node;

        let prev_with_bit = mutex
            .tail_with_bit
            .swap(Mutex::node_ptr(self_ptr), Ordering::AcqRel);
        let is_manager = prev_with_bit == MANAGER_BIT;
        let prev = (prev_with_bit & !MANAGER_BIT) as *mut Node;

        if !prev.is_null() {
            node.wait.store(true, Ordering::Relaxed);
            unsafe { (*prev).next.store(self_ptr, Ordering::Release) };
            let mut backoff = Backoff::new();
            while node.wait.load(Ordering::Acquire) {
                backoff.spin();
            }
            return Mcs3Lock { mutex, node };
        }
        if !is_manager {
            node.wait.store(true, Ordering::Relaxed);
            debug_assert!(mutex.head.load(Ordering::Acquire).is_null());
            mutex.head.store(self_ptr, Ordering::Release);
            let mut backoff = Backoff::new();
            while node.wait.load(Ordering::Acquire) {
                backoff.spin();
            }
            return Mcs3Lock { mutex, node };
        }

        // Became manager on the initial procedure: take over whatever chain
        // had formed before the `tailWithBit` swap landed.
        debug_assert!(mutex.head.load(Ordering::Acquire).is_null());
        let tail_with_bit = mutex.tail_with_bit.swap(0, Ordering::AcqRel);
        debug_assert!((tail_with_bit & !MANAGER_BIT) != 0);
        let tail = tail_with_bit as *mut Node;
        mutex.move_chain_to_priq(self_ptr, tail);
        let winner = unsafe { (*mutex.priq.get()).pop() }.expect("priq non-empty after drain");
        if winner.0 == self_ptr {
            return Mcs3Lock { mutex, node };
        }
        node.wait.store(true, Ordering::Relaxed);
        unsafe { (*winner.0).wait.store(false, Ordering::Release) };
        let mut backoff = Backoff::new();
        while node.wait.load(Ordering::Acquire) {
            backoff.spin();
        }
        Mcs3Lock { mutex, node }
    }

    fn try_lock(mutex: &'a Mutex, order: u32) -> Option<Self> {
        let node = Node::new(order);
        let self_ptr: *mut Node = &*node as *const Node as *mut Node;
        mutex
            .tail_with_bit
            .compare_exchange(
                MANAGER_BIT,
                Mutex::node_ptr(self_ptr),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .ok()
            .map(|_| Mcs3Lock { mutex, node })
    }

    fn top_priority_in_wait_queue(&self) -> u32 {
        let tail_with_bit = self.mutex.tail_with_bit.load(Ordering::Acquire);
        debug_assert_ne!(tail_with_bit, MANAGER_BIT);
        if tail_with_bit != 0 {
            let (head, tail) = self.mutex.extract_from_chain();
            self.mutex.move_chain_to_priq(head, tail);
        }
        unsafe { (*self.mutex.priq.get()).peek().map(|e| unsafe { (*e.0).order }) }
            .unwrap_or(u32::MAX)
    }
}

impl Drop for Mcs3Lock<'_> {
    fn drop(&mut self) {
        let mut tail_with_bit = self.mutex.tail_with_bit.load(Ordering::Acquire);
        loop {
            let priq_empty = unsafe { (*self.mutex.priq.get()).is_empty() };
            if tail_with_bit != 0 || !priq_empty {
                break;
            }
            match self.mutex.tail_with_bit.compare_exchange(
                tail_with_bit,
                MANAGER_BIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => tail_with_bit = observed,
            }
        }
        if tail_with_bit != 0 {
            let (head, tail) = self.mutex.extract_from_chain();
            self.mutex.move_chain_to_priq(head, tail);
        }
        let winner =
            unsafe { (*self.mutex.priq.get()).pop() }.expect("priq non-empty before notify");
        unsafe { (*winner.0).wait.store(false, Ordering::Release) };
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
            let _g = Mcs3Lock::lock(&m, 0);
        }
        let _g2 = Mcs3Lock::lock(&m, 0);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = Mutex::default();
        let _g = Mcs3Lock::lock(&m, 0);
        assert!(Mcs3Lock::try_lock(&m, 0).is_none());
    }

    #[test]
    fn lowest_order_value_wakes_first() {
        let m = Arc::new(Mutex::default());
        let order_seen = Arc::new(StdMutex::new(Vec::new()));
        let held = Mcs3Lock::lock(&m, 0);

        let (m1, o1) = (Arc::clone(&m), Arc::clone(&order_seen));
        let t1 = std::thread::spawn(move || {
            let _g = Mcs3Lock::lock(&m1, 10);
            o1.lock().unwrap().push(10u32);
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        let (m2, o2) = (Arc::clone(&m), Arc::clone(&order_seen));
        let t2 = std::thread::spawn(move || {
            let _g = Mcs3Lock::lock(&m2, 1);
            o2.lock().unwrap().push(1u32);
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        drop(held);
        t1.join().unwrap();
        t2.join().unwrap();
        assert_eq!(*order_seen.lock().unwrap(), vec![1, 10]);
    }
}
