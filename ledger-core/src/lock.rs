//! Per-address mutual exclusion
//!
//! Serializes "read sender balance, check, append transfer" for one sender without serializing
//! unrelated senders. Each address lazily gets a single-permit semaphore; the table entry is
//! evicted after the idle TTL (see [`crate::idle`]).

use crate::{context::CallContext, idle::IdleTable, types::Address, Error, Result};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Address-keyed exclusive lock with idle eviction
pub struct AddressLock {
    table: IdleTable<Semaphore>,
}

impl std::fmt::Debug for AddressLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressLock")
            .field("entries", &self.table.len())
            .finish()
    }
}

impl AddressLock {
    /// Create a lock table whose entries expire after `idle_ttl` without use
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            table: IdleTable::new(idle_ttl),
        }
    }

    /// Run `f` while holding the lock for `key`
    ///
    /// Returns [`Error::Cancelled`] without running `f` when `ctx` is already done, or when it
    /// finishes before the lock is acquired. Otherwise `f` runs exactly once and the lock is
    /// released when it returns or unwinds.
    pub async fn with_exclusive<F, T>(&self, key: Address, ctx: &CallContext, f: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let semaphore = self.table.touch(key, || Semaphore::new(1));

        // Never race `f` against a context that is already finished
        if ctx.is_done() {
            return Err(Error::Cancelled);
        }

        let _permit = tokio::select! {
            biased;
            _ = ctx.done() => return Err(Error::Cancelled),
            permit = semaphore.acquire() => {
                permit.map_err(|_| Error::Cancelled)?
            }
        };

        Ok(f())
    }

    /// Live entries; bounded by addresses active within the last TTL
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// No live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` currently has an entry
    pub fn contains(&self, key: &Address) -> bool {
        self.table.contains(key)
    }
}
