//! Process-wide byte budget.
//!
//! A counting semaphore over bytes rather than permits: admission
//! reserves an entry's full size up front, and the reservation releases
//! on drop, so every exit path (completion, failure, cancellation,
//! connection teardown) returns the bytes to the pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared ceiling on bytes admitted for transfer but not yet sent.
#[derive(Debug)]
pub struct ByteBudget {
    limit: u64,
    used: AtomicU64,
}

impl ByteBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Attempts to reserve `amount` bytes.
    ///
    /// The check-and-increment is a single compare-and-swap, so two
    /// racing admissions cannot jointly overshoot the limit.
    pub fn try_reserve(self: &Arc<Self>, amount: u64) -> Option<ByteReservation> {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(amount).filter(|&new| new <= self.limit)
            })
            .ok()?;
        Some(ByteReservation {
            budget: Arc::clone(self),
            amount,
        })
    }

    /// Bytes currently reserved.
    pub fn in_flight(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

/// A live reservation against a [`ByteBudget`]. Releases on drop.
#[derive(Debug)]
pub struct ByteReservation {
    budget: Arc<ByteBudget>,
    amount: u64,
}

impl ByteReservation {
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for ByteReservation {
    fn drop(&mut self) {
        self.budget.used.fetch_sub(self.amount, Ordering::SeqCst);
    }
}
