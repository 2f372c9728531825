//! Background-refreshed leaderboard
//!
//! Ranking every address means scanning the whole index, so readers never trigger it. One
//! background task recomputes the rankings on each wall-clock interval boundary and swaps a
//! new immutable [`Leaderboard`] into a shared slot. Readers clone an `Arc` out of the slot and
//! always see one complete snapshot, old or new.
//!
//! # States
//!
//! - Cold: no refresh has succeeded yet; readers get an empty snapshot
//! - Warm: readers get the most recent successful snapshot
//!
//! A failed refresh is logged and counted, and the slot keeps its previous snapshot.

use crate::{
    clock::Clock,
    metrics::Metrics,
    types::{Glance, Leaderboard},
    Result,
};
use chrono::{DateTime, DurationRound, Utc};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Computes a ranked snapshot for a refresh instant
pub trait LeaderboardSource: Send + Sync + 'static {
    /// Top `size` addresses by balance and by transfer count as of `now`
    fn leaderboard(&self, now: DateTime<Utc>, size: usize) -> Result<Leaderboard>;
}

/// Rank `glances` into a snapshot
///
/// Balances sort descending, transfer counts sort descending. Equal values are ordered by
/// ascending address, so a given ledger state always produces the same snapshot.
pub fn build_snapshot(
    now: DateTime<Utc>,
    baseline: i64,
    glances: Vec<Glance>,
    size: usize,
) -> Leaderboard {
    let mut by_balance = glances.clone();
    by_balance.sort_unstable_by_key(|g| (Reverse(g.balance), g.address));
    by_balance.truncate(size);

    let mut by_transfers = glances;
    by_transfers.sort_unstable_by_key(|g| (Reverse(g.transfer_count), g.address));
    by_transfers.truncate(size);

    Leaderboard {
        timestamp: now,
        baseline,
        by_balance,
        by_transfers,
    }
}

/// First multiple of `interval` (since the Unix epoch) strictly after `base`
pub fn next_boundary(base: DateTime<Utc>, interval: chrono::Duration) -> DateTime<Utc> {
    match base.duration_trunc(interval) {
        Ok(truncated) => truncated + interval,
        Err(_) => base + interval,
    }
}

/// Leaderboard snapshot slot
#[derive(Debug)]
pub struct LeaderboardCache {
    size: usize,
    slot: RwLock<Arc<Leaderboard>>,
    warm: AtomicBool,
}

impl LeaderboardCache {
    /// Cold cache serving an empty snapshot stamped `initial`
    pub fn new(size: usize, initial: DateTime<Utc>) -> Self {
        Self {
            size,
            slot: RwLock::new(Arc::new(Leaderboard::empty(initial))),
            warm: AtomicBool::new(false),
        }
    }

    /// Current snapshot; never blocks on a refresh in progress
    pub fn get(&self) -> Arc<Leaderboard> {
        self.slot.read().clone()
    }

    /// At least one refresh has succeeded
    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    /// Recompute from `source` as of `at` and swap the result in
    ///
    /// On error the current snapshot is left untouched.
    pub fn refresh<S: LeaderboardSource + ?Sized>(
        &self,
        source: &S,
        at: DateTime<Utc>,
    ) -> Result<Arc<Leaderboard>> {
        let snapshot = Arc::new(source.leaderboard(at, self.size)?);
        *self.slot.write() = snapshot.clone();
        self.warm.store(true, Ordering::Release);
        Ok(snapshot)
    }

    /// Spawn the refresh task
    ///
    /// The task fires on every `interval` boundary of `clock` and stops once `shutdown` is
    /// cancelled.
    pub fn spawn<S: LeaderboardSource>(
        self: &Arc<Self>,
        source: Arc<S>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        metrics: Metrics,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let step = match chrono::Duration::from_std(interval) {
                Ok(step) if step > chrono::Duration::zero() => step,
                _ => {
                    tracing::error!(?interval, "Invalid leaderboard refresh interval");
                    return;
                }
            };

            tracing::info!(?interval, "Starting leaderboard refresher");

            let mut last_fire = clock.now();
            loop {
                let next = next_boundary(clock.now().max(last_fire), step);
                let wait = (next - clock.now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::info!("Leaderboard refresher stopped");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
                last_fire = next;

                match cache.refresh(source.as_ref(), next) {
                    Ok(snapshot) => {
                        metrics.record_leaderboard_refresh(Some(snapshot.by_balance.len()));
                        tracing::debug!(at = %next, "Leaderboard updated");
                    }
                    Err(e) => {
                        metrics.record_leaderboard_refresh(None);
                        tracing::warn!(at = %next, error = %e, "Failed to refresh leaderboard");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{baseline, project_epoch};
    use crate::clock::ManualClock;
    use crate::types::Address;
    use crate::Error;
    use parking_lot::Mutex;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn glance(address: &str, balance: i64, transfer_count: i64) -> Glance {
        Glance {
            timestamp: project_epoch(),
            address: addr(address),
            balance,
            comment_count: 0,
            transfer_count,
        }
    }

    /// Source that returns scripted results and records refresh instants
    #[derive(Default)]
    struct ScriptedSource {
        fail: AtomicBool,
        calls: Mutex<Vec<DateTime<Utc>>>,
    }

    impl LeaderboardSource for ScriptedSource {
        fn leaderboard(&self, now: DateTime<Utc>, size: usize) -> Result<Leaderboard> {
            self.calls.lock().push(now);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("scripted failure".to_string()));
            }
            Ok(build_snapshot(
                now,
                baseline(now),
                vec![glance("10.0.0.1", baseline(now), 1)],
                size,
            ))
        }
    }

    #[test]
    fn test_build_snapshot_orders_and_truncates() {
        let glances = vec![
            glance("10.0.0.3", 50, 1),
            glance("10.0.0.1", 70, 4),
            glance("::1", 70, 9),
            glance("10.0.0.2", 50, 4),
            glance("10.0.0.4", 10, 0),
        ];

        let board = build_snapshot(project_epoch(), 7, glances, 3);
        assert_eq!(board.baseline, 7);

        let by_balance: Vec<_> = board.by_balance.iter().map(|g| g.address).collect();
        assert_eq!(
            by_balance,
            vec![addr("10.0.0.1"), addr("::1"), addr("10.0.0.2")]
        );

        let by_transfers: Vec<_> = board.by_transfers.iter().map(|g| g.address).collect();
        assert_eq!(
            by_transfers,
            vec![addr("::1"), addr("10.0.0.1"), addr("10.0.0.2")]
        );
    }

    #[test]
    fn test_next_boundary() {
        let minute = chrono::Duration::minutes(1);
        let start = project_epoch();

        assert_eq!(next_boundary(start, minute), start + minute);
        assert_eq!(
            next_boundary(start + chrono::Duration::seconds(59), minute),
            start + minute
        );
        assert_eq!(
            next_boundary(start + chrono::Duration::seconds(61), minute),
            start + chrono::Duration::minutes(2)
        );
    }

    #[test]
    fn test_cold_cache_is_empty() {
        let cache = LeaderboardCache::new(10, project_epoch());
        assert!(!cache.is_warm());

        let board = cache.get();
        assert!(board.is_empty());
        assert_eq!(board.timestamp, project_epoch());
    }

    #[test]
    fn test_refresh_swaps_snapshot() {
        let cache = LeaderboardCache::new(10, project_epoch());
        let source = ScriptedSource::default();
        let at = project_epoch() + chrono::Duration::hours(3);

        let before = cache.get();
        cache.refresh(&source, at).unwrap();
        let after = cache.get();

        assert!(cache.is_warm());
        assert!(before.is_empty());
        assert_eq!(after.timestamp, at);
        assert_eq!(after.baseline, 3);
        assert_eq!(after.by_balance.len(), 1);
    }

    #[test]
    fn test_failed_refresh_keeps_previous_snapshot() {
        let cache = LeaderboardCache::new(10, project_epoch());
        let source = ScriptedSource::default();
        let first = project_epoch() + chrono::Duration::hours(1);

        cache.refresh(&source, first).unwrap();
        source.fail.store(true, Ordering::SeqCst);
        assert!(cache
            .refresh(&source, first + chrono::Duration::minutes(1))
            .is_err());

        let board = cache.get();
        assert_eq!(board.timestamp, first);
        assert!(cache.is_warm());
    }

    /// Wall clock driven by Tokio's (pausable) clock
    struct TokioClock {
        origin: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl TokioClock {
        fn new(origin: DateTime<Utc>) -> Self {
            Self {
                origin,
                started: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = chrono::Duration::from_std(self.started.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero());
            self.origin + elapsed
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_fires_on_boundaries() {
        let start = project_epoch() + chrono::Duration::hours(10) + chrono::Duration::seconds(30);
        let source = Arc::new(ScriptedSource::default());
        let cache = Arc::new(LeaderboardCache::new(10, start));
        let metrics = Metrics::new().unwrap();
        let shutdown = CancellationToken::new();

        let task = cache.spawn(
            source.clone(),
            Arc::new(TokioClock::new(start)),
            Duration::from_secs(60),
            metrics.clone(),
            shutdown.clone(),
        );

        // Nothing before the first boundary
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!cache.is_warm());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let first_boundary = project_epoch() + chrono::Duration::minutes(601);
        assert_eq!(cache.get().timestamp, first_boundary);
        assert_eq!(cache.get().baseline, 10);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            cache.get().timestamp,
            first_boundary + chrono::Duration::minutes(1)
        );
        assert_eq!(metrics.leaderboard_refresh_total.get(), 2);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(
            *source.calls.lock(),
            vec![first_boundary, first_boundary + chrono::Duration::minutes(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_survives_failures() {
        let start = project_epoch() + chrono::Duration::hours(1);
        let source = Arc::new(ScriptedSource::default());
        source.fail.store(true, Ordering::SeqCst);
        let cache = Arc::new(LeaderboardCache::new(10, start));
        let metrics = Metrics::new().unwrap();
        let shutdown = CancellationToken::new();

        let task = cache.spawn(
            source.clone(),
            Arc::new(TokioClock::new(start)),
            Duration::from_secs(60),
            metrics.clone(),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!cache.is_warm());
        assert!(cache.get().is_empty());
        assert_eq!(metrics.leaderboard_refresh_failures_total.get(), 1);

        source.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(cache.is_warm());
        assert_eq!(
            cache.get().timestamp,
            start + chrono::Duration::minutes(2)
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_stops_on_shutdown() {
        let start = project_epoch();
        let cache = Arc::new(LeaderboardCache::new(10, start));
        let shutdown = CancellationToken::new();

        let task = cache.spawn(
            Arc::new(ScriptedSource::default()),
            Arc::new(ManualClock::new(start)),
            Duration::from_secs(60),
            Metrics::new().unwrap(),
            shutdown.clone(),
        );

        shutdown.cancel();
        task.await.unwrap();
        assert!(!cache.is_warm());
    }
}
