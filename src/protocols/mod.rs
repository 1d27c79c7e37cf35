//! Concurrency-control protocols (components C6-C12).
//!
//! Every protocol exposes the same four-method shape from
//! `begin`/`read`/`read_for_update`/`write`/`precommit`/`clear`, backed by a
//! per-protocol mutex header and a transaction-private `LockSet`. The
//! header layout and precommit pipeline differ; the external shape does
//! not, so a workload driver can swap protocols without changing its call
//! sites.

/// The two access modes a LockSet entry can be opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shared / read access.
    Read,
    /// Exclusive / write access.
    Write,
}

pub mod leis;
pub mod licc;
pub mod nowait;
pub mod occ;
pub mod tictoc;
pub mod trlock;
pub mod waitdie;
