//! Global fetch budget shared across jobs.
//!
//! Every job reserves fetch slots from this budget before entering its
//! download phase, so total concurrency across all jobs stays under
//! `max_total_fetches`. Jobs that cannot get a single slot stay Queued.

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared global fetch budget. Jobs reserve slots before dispatching part
/// workers and release them when done so concurrent jobs share the limit.
#[derive(Debug)]
pub struct FetchBudget {
    max_total: usize,
    in_use: AtomicUsize,
    freed: Notify,
}

impl FetchBudget {
    /// Create a budget with the given maximum total fetches (e.g. from config).
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total: max_total.max(1),
            in_use: AtomicUsize::new(0),
            freed: Notify::new(),
        }
    }

    /// Number of slots currently reserved.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Available slots (max_total - in_use). May be 0 if other jobs hold the budget.
    pub fn available(&self) -> usize {
        let used = self.in_use.load(Ordering::Relaxed);
        self.max_total.saturating_sub(used)
    }

    /// Reserve up to `requested` slots. Returns the number actually reserved
    /// (min(requested, available)), which may be 0.
    pub fn reserve(&self, requested: usize) -> usize {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let available = self.max_total.saturating_sub(current);
            let take = requested.min(available).min(self.max_total);
            match self.in_use.compare_exchange_weak(
                current,
                current + take,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return take,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release `n` slots back to the budget and wake admission waiters.
    pub fn release(&self, n: usize) {
        self.in_use
            .fetch_sub(n.min(self.in_use.load(Ordering::Relaxed)), Ordering::Release);
        self.freed.notify_waiters();
    }

    /// Reserve at least one slot, waiting until another job releases if the
    /// budget is exhausted. This is the admission-control point: a job parks
    /// here (still Queued) until capacity frees up.
    pub async fn reserve_at_least_one(self: &Arc<Self>, requested: usize) -> BudgetReservation {
        let requested = requested.max(1);
        loop {
            let slots = self.reserve(requested);
            if slots > 0 {
                return BudgetReservation {
                    budget: Arc::clone(self),
                    slots,
                };
            }
            // Register with the notifier before re-checking availability:
            // a bare Notified future only picks up notify_waiters() once
            // polled, so a release landing between the check and the await
            // would otherwise be lost.
            let mut notified = pin!(self.freed.notified());
            notified.as_mut().enable();
            if self.available() > 0 {
                continue;
            }
            notified.await;
        }
    }
}

/// RAII handle for reserved slots; dropping it returns them to the budget.
#[derive(Debug)]
pub struct BudgetReservation {
    budget: Arc<FetchBudget>,
    slots: usize,
}

impl BudgetReservation {
    /// Number of slots held by this reservation.
    pub fn slots(&self) -> usize {
        self.slots
    }
}

impl Drop for BudgetReservation {
    fn drop(&mut self) {
        self.budget.release(self.slots);
    }
}
