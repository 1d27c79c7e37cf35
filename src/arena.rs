//! Thread-local bulk allocator for per-transaction temporary memory.
//!
//! Every protocol's `LockSet` allocates small, short-lived objects per
//! transaction attempt (local-buffer growth, MCS nodes, write-set entries).
//! Routing those through the system allocator on every retry is wasteful
//! under high contention, so each worker thread owns an [`Arena`] that carves
//! 4&nbsp;KiB bulks into bump-allocated fragments and recycles them once
//! every allocation drawn from a bulk has been freed.
//!
//! Unlike the allocator this is grounded on, fragments are returned to the
//! system allocator when the owning [`Arena`] (and therefore the owning
//! thread-local) is dropped, rather than leaking at process exit — see
//! `DESIGN.md` open question #3.

use std::alloc::Layout;
use std::collections::{HashMap, VecDeque};
use std::thread::ThreadId;

use crate::result::CcError;

const BULK_SIZE: usize = 4096;
const DEFAULT_CACHE_BULKS: usize = 4;

fn bulk_layout() -> Layout {
    Layout::from_size_align(BULK_SIZE, BULK_SIZE).expect("BULK_SIZE is a power of two")
}

/// A single `BULK_SIZE`-byte, `BULK_SIZE`-aligned allocation.
///
/// `deallocate` recovers a bulk's key by masking a fragment pointer down to
/// its bulk's base address (`p & !(BULK_SIZE - 1)`), which only identifies
/// the right bulk if that base address really is `BULK_SIZE`-aligned. A
/// `Box<[u8; BULK_SIZE]>` carries no such alignment guarantee, so the bulk is
/// allocated directly via the global allocator with an explicit
/// `BULK_SIZE`-aligned `Layout` instead.
struct Bulk {
    buf: *mut u8,
    offset: usize,
    live: u32,
}

impl Bulk {
    fn new() -> Self {
        let layout = bulk_layout();
        let buf = unsafe { std::alloc::alloc_zeroed(layout) };
        if buf.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Self {
            buf,
            offset: 0,
            live: 0,
        }
    }

    fn key(&self) -> usize {
        self.buf as usize
    }

    fn try_alloc(&mut self, size: usize) -> Option<*mut u8> {
        if BULK_SIZE - self.offset < size {
            return None;
        }
        let p = unsafe { self.buf.add(self.offset) };
        self.offset += size;
        self.live += 1;
        Some(p)
    }

    /// Returns true if this was the last live allocation in the bulk.
    fn release(&mut self) -> bool {
        self.live -= 1;
        if self.live == 0 {
            self.offset = 0;
            true
        } else {
            false
        }
    }
}

impl Drop for Bulk {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.buf, bulk_layout()) };
    }
}

/// A thread-local bump allocator for short-lived, fixed-size transaction
/// scratch memory. Not `Sync`; access it through [`with_arena`].
pub struct Arena {
    bulks: HashMap<usize, Bulk>,
    current_key: usize,
    free_list: VecDeque<Bulk>,
    cache_cap: usize,
    owner: ThreadId,
}

impl Arena {
    fn new() -> Self {
        let mut bulks = HashMap::new();
        let bulk = Bulk::new();
        let key = bulk.key();
        bulks.insert(key, bulk);
        Self {
            bulks,
            current_key: key,
            free_list: VecDeque::new(),
            cache_cap: DEFAULT_CACHE_BULKS,
            owner: std::thread::current().id(),
        }
    }

    fn add_fragment(&mut self) {
        let bulk = self.free_list.pop_front().unwrap_or_else(Bulk::new);
        let key = bulk.key();
        self.bulks.insert(key, bulk);
        self.current_key = key;
    }

    /// Allocate `size` bytes. Requests larger than the bulk size bypass the
    /// arena entirely and come straight from the global allocator.
    pub fn allocate(&mut self, size: usize) -> Result<*mut u8, CcError> {
        if size == 0 {
            return Err(CcError::ArenaExhausted { requested: 0 });
        }
        if size > BULK_SIZE {
            let layout = std::alloc::Layout::from_size_align(size, 8)
                .map_err(|_| CcError::ArenaExhausted { requested: size })?;
            let p = unsafe { std::alloc::alloc(layout) };
            if p.is_null() {
                log::warn!("arena oversized allocation failed: requested={size}");
                return Err(CcError::ArenaExhausted { requested: size });
            }
            return Ok(p);
        }
        let current = self.bulks.get_mut(&self.current_key).expect("current bulk present");
        if let Some(p) = current.try_alloc(size) {
            return Ok(p);
        }
        self.add_fragment();
        let current = self.bulks.get_mut(&self.current_key).expect("fresh bulk present");
        current.try_alloc(size).ok_or_else(|| {
            log::warn!("arena exhausted: requested={size}");
            CcError::ArenaExhausted { requested: size }
        })
    }

    /// Free memory previously returned by [`Self::allocate`] with the same
    /// `size`. Caller must free on the same thread that allocated it.
    pub fn deallocate(&mut self, p: *mut u8, size: usize) -> Result<(), CcError> {
        let caller = std::thread::current().id();
        if caller != self.owner {
            log::warn!(
                "arena cross-thread free rejected: owner={:?} freer={:?}",
                self.owner,
                caller
            );
            return Err(CcError::CrossThreadFree {
                owner: self.owner,
                freer: caller,
            });
        }
        if size > BULK_SIZE {
            let layout = std::alloc::Layout::from_size_align(size, 8).expect("layout was valid on alloc");
            unsafe { std::alloc::dealloc(p, layout) };
            return Ok(());
        }
        let key = (p as usize) & !(BULK_SIZE - 1);
        let bulk = self.bulks.get_mut(&key).expect("deallocate of untracked pointer");
        if bulk.release() {
            if self.bulks.len() == 1 {
                // keep the last bulk around instead of shuttling it through
                // the free list.
                return Ok(());
            }
            let bulk = self.bulks.remove(&key).expect("just looked it up");
            self.free_list.push_front(bulk);
            self.gc();
        }
        Ok(())
    }

    fn gc(&mut self) {
        while self.free_list.len() > self.cache_cap {
            self.free_list.pop_back();
        }
    }

    /// Number of bulks currently in use (not counting the free list).
    pub fn live_bulks(&self) -> usize {
        self.bulks.len()
    }
}

std::thread_local! {
    static ARENA: std::cell::RefCell<Arena> = std::cell::RefCell::new(Arena::new());
}

/// Run `f` against the calling thread's arena.
pub fn with_arena<R>(f: impl FnOnce(&mut Arena) -> R) -> R {
    ARENA.with(|cell| f(&mut cell.borrow_mut()))
}
