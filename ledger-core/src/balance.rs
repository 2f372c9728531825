//! Balance derivation
//!
//! A balance is never stored. It is always
//!
//! ```text
//! baseline(now) + Σ(amount where recipient = addr) − Σ(amount where sender = addr)
//! ```
//!
//! where the baseline is a grant that grows by one every hour since the project epoch, the same
//! for every address. The two sums must come from one consistent read; see
//! [`LedgerStore::get_balance`](crate::storage::LedgerStore::get_balance).

use chrono::{DateTime, TimeZone, Utc};

/// Instant the baseline grant starts counting from (2025-08-10T21:00:00Z)
pub fn project_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 10, 21, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Whole hours elapsed since the project epoch; 0 before it
pub fn baseline(now: DateTime<Utc>) -> i64 {
    (now - project_epoch()).num_hours().max(0)
}

/// Credit and debit sums of one address, read together
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTotals {
    /// Sum of amounts received
    pub credits: i64,

    /// Sum of amounts sent
    pub debits: i64,
}

impl LedgerTotals {
    /// Net effect of recorded transfers
    pub fn diff(&self) -> i64 {
        self.credits - self.debits
    }

    /// Balance at `now`
    pub fn available(&self, now: DateTime<Utc>) -> i64 {
        baseline(now) + self.diff()
    }
}
