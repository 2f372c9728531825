//! Per-address state with idle eviction
//!
//! Both the address lock and the rate limiters keep one small piece of state per address. The
//! address space is unbounded, so entries are dropped after `ttl` without access. The sharded
//! map is the only structural lock; the payload of each entry synchronizes itself.
//!
//! Every entry gets one reaper task when it is created. The reaper sleeps until the entry's
//! expiry, removes it if it is still expired and nobody holds its payload, and otherwise re-arms.
//! An entry whose payload is held (a lock holder, a waiter, a limiter reservation) is never
//! removed, so two payloads for the same address can never be live at once.

use crate::types::Address;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: Arc<V>,
    expires_at: Instant,
}

struct Inner<V> {
    ttl: Duration,
    entries: DashMap<Address, Entry<V>>,
}

/// Address-keyed table whose entries expire after `ttl` without a touch
pub(crate) struct IdleTable<V> {
    inner: Arc<Inner<V>>,
}

impl<V: Send + Sync + 'static> IdleTable<V> {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                entries: DashMap::new(),
            }),
        }
    }

    /// Fetch or create the payload for `key` and push its expiry to `now + ttl`
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn touch(&self, key: Address, init: impl FnOnce() -> V) -> Arc<V> {
        let expires_at = Instant::now() + self.inner.ttl;
        let mut created = false;

        let value = {
            let mut entry = self.inner.entries.entry(key).or_insert_with(|| {
                created = true;
                Entry {
                    value: Arc::new(init()),
                    expires_at,
                }
            });
            entry.expires_at = expires_at;
            entry.value.clone()
        };

        if created {
            spawn_reaper(Arc::downgrade(&self.inner), key);
        }

        value
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub(crate) fn contains(&self, key: &Address) -> bool {
        self.inner.entries.contains_key(key)
    }
}

fn spawn_reaper<V: Send + Sync + 'static>(weak: Weak<Inner<V>>, key: Address) {
    tokio::spawn(async move {
        loop {
            let expires_at = {
                let Some(inner) = weak.upgrade() else { return };
                let expires_at = match inner.entries.get(&key) {
                    Some(entry) => entry.expires_at,
                    None => return,
                };
                expires_at
            };

            tokio::time::sleep_until(expires_at).await;

            let Some(inner) = weak.upgrade() else { return };
            let now = Instant::now();
            let removed = inner.entries.remove_if(&key, |_, entry| {
                entry.expires_at <= now && Arc::strong_count(&entry.value) == 1
            });
            if removed.is_some() {
                tracing::trace!(address = %key, "Evicted idle entry");
                return;
            }

            // Expired but still held: keep it for another full TTL
            if let Some(mut entry) = inner.entries.get_mut(&key) {
                if entry.expires_at <= now {
                    entry.expires_at = now + inner.ttl;
                }
            };
        }
    });
}
