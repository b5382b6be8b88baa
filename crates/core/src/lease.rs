//! Acquisition and release accounting for per-session handles.
//!
//! Cache keys and header field locations each hold a [`Lease`] drawn from a
//! shared [`Ledger`]. Dropping the handle returns the lease, so every exit
//! path of a session releases what it acquired. The ledger's counters make
//! that observable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The kind of handle a lease was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    CacheKey,
    HeaderField,
}

impl LeaseKind {
    const fn slot(self) -> usize {
        match self {
            LeaseKind::CacheKey => 0,
            LeaseKind::HeaderField => 1,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    acquired: [AtomicU64; 2],
    released: [AtomicU64; 2],
}

/// Shared counters for issued and returned leases.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    counters: Arc<Counters>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a lease. It is returned when dropped.
    pub fn acquire(&self, kind: LeaseKind) -> Lease {
        self.counters.acquired[kind.slot()].fetch_add(1, Ordering::Relaxed);
        Lease { ledger: self.clone(), kind }
    }

    pub fn acquired(&self, kind: LeaseKind) -> u64 {
        self.counters.acquired[kind.slot()].load(Ordering::Relaxed)
    }

    pub fn released(&self, kind: LeaseKind) -> u64 {
        self.counters.released[kind.slot()].load(Ordering::Relaxed)
    }

    /// Leases of this kind currently held.
    pub fn outstanding(&self, kind: LeaseKind) -> u64 {
        self.acquired(kind).saturating_sub(self.released(kind))
    }

    /// True when every lease ever issued has come back exactly once.
    pub fn is_balanced(&self) -> bool {
        [LeaseKind::CacheKey, LeaseKind::HeaderField]
            .into_iter()
            .all(|kind| self.acquired(kind) == self.released(kind))
    }
}

/// A held handle. Not `Clone`: each acquisition is released once.
#[derive(Debug)]
pub struct Lease {
    ledger: Ledger,
    kind: LeaseKind,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.ledger.counters.released[self.kind.slot()].fetch_add(1, Ordering::Relaxed);
    }
}
