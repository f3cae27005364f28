//! Local view of the user's currency balance.

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::debug;

/// Balance shared between the event loop (penalties) and the outbox
/// (refreshes from the backend).
#[derive(Debug, Default)]
pub struct BalanceLedger {
    balance: AtomicI64,
}

impl BalanceLedger {
    pub fn new(balance: i64) -> Self {
        Self {
            balance: AtomicI64::new(balance),
        }
    }

    pub fn balance(&self) -> i64 {
        self.balance.load(Ordering::SeqCst)
    }

    /// Apply a local adjustment. Negative deltas are penalties.
    pub fn adjust(&self, delta: i64) -> i64 {
        let balance = self.balance.fetch_add(delta, Ordering::SeqCst) + delta;
        debug!(delta, balance, "balance adjusted");
        balance
    }

    /// Charge a penalty.
    pub fn deduct(&self, amount: i64) -> i64 {
        self.adjust(-amount)
    }

    /// Replace with the backend's authoritative value.
    pub fn refresh(&self, balance: i64) {
        self.balance.store(balance, Ordering::SeqCst);
        debug!(balance, "balance refreshed");
    }
}
