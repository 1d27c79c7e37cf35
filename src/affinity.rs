//! Worker thread affinity policy.
//!
//! `txcc` does not perform topology discovery or pin threads itself — that
//! belongs to the driver/harness — but every protocol benefits from knowing
//! the intended policy (e.g. to size per-NUMA-node free lists). This enum is
//! the shared vocabulary a driver passes through.

/// How a driver intends to place worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    /// No pinning; the OS scheduler decides.
    #[default]
    None,
    /// Pin by NUMA node, packing threads onto a node before spilling over.
    Node,
    /// Pin one thread per physical core.
    Core,
    /// Pin one thread per hardware thread (SMT sibling).
    Thread,
    /// Driver-supplied explicit core list; `txcc` only carries the tag.
    Custom,
}
