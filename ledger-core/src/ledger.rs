//! Main ledger orchestration layer
//!
//! This module ties together storage, locking, rate limiting and the leaderboard cache into the
//! operations a transport layer exposes. Callers are identified by an [`Address`] that an
//! upstream identity layer has already resolved; nothing here authenticates.
//!
//! # Request flow
//!
//! - Writes: validate, write-class limiter, then (transfers only) the sender's address lock
//!   around the balance check and append
//! - Balance and glance reads: read-class limiter, then a snapshot read
//! - Feed and leaderboard reads: no limiter
//!
//! # Example
//!
//! ```no_run
//! use ipcoin_ledger::{CallContext, Config, Ledger};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ipcoin_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!     let caller = "203.0.113.7".parse().unwrap();
//!
//!     let ctx = CallContext::with_timeout(Duration::from_secs(5));
//!     let balance = ledger.get_balance(&ctx, caller).await?;
//!     println!("{} has {}", balance.address, balance.available);
//!
//!     ledger.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::{
    clock::{Clock, SystemClock},
    context::CallContext,
    leaderboard::LeaderboardCache,
    limiter::AddressRateLimiter,
    lock::AddressLock,
    metrics::Metrics,
    storage::{LedgerStore, StorageStats},
    types::{Address, Balance, Comment, Feed, GlanceReport, Leaderboard, TransferReceipt},
    Config, Error, Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maximum comment length in characters
pub const MAX_COMMENT_CHARS: usize = 1000;

/// Main ledger interface
pub struct Ledger {
    /// Record store
    store: Arc<LedgerStore>,

    /// Wall clock for record stamps and balances
    clock: Arc<dyn Clock>,

    /// Serializes transfers per sender
    locks: AddressLock,

    /// Balance and glance reads
    read_limiter: AddressRateLimiter,

    /// Transfers and comments
    write_limiter: AddressRateLimiter,

    /// Cached rankings
    leaderboard: Arc<LeaderboardCache>,

    /// Leaderboard refresher
    refresher: Mutex<Option<JoinHandle<()>>>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,

    /// Stops background tasks
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("store", &self.store)
            .field("locks", &self.locks)
            .field("read_limiter", &self.read_limiter)
            .field("write_limiter", &self.write_limiter)
            .finish()
    }
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Open ledger reading time from `clock`
    pub async fn open_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(LedgerStore::open(&config)?);
        let metrics = Metrics::new()?;
        let shutdown = CancellationToken::new();

        let leaderboard = Arc::new(LeaderboardCache::new(config.leaderboard.size, clock.now()));
        let refresher = leaderboard.spawn(
            store.clone(),
            clock.clone(),
            config.leaderboard.refresh_interval(),
            metrics.clone(),
            shutdown.child_token(),
        );

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = ?config.data_dir,
            "Ledger opened"
        );

        Ok(Self {
            store,
            clock,
            locks: AddressLock::new(config.locking.idle_ttl()),
            read_limiter: AddressRateLimiter::new(
                "read",
                config.limits.read,
                config.limits.idle_ttl(),
            ),
            write_limiter: AddressRateLimiter::new(
                "write",
                config.limits.write,
                config.limits.idle_ttl(),
            ),
            leaderboard,
            refresher: Mutex::new(Some(refresher)),
            metrics,
            config,
            shutdown,
        })
    }

    /// Balance of the caller
    pub async fn get_balance(&self, ctx: &CallContext, caller: Address) -> Result<Balance> {
        self.acquire(&self.read_limiter, caller, ctx).await?;
        self.store.get_balance(caller, self.clock.now())
    }

    /// Move `amount` from the caller to `recipient`
    ///
    /// `recipient` is the 4 or 16 byte wire form of an IP address. All argument errors are
    /// reported before any limiter or lock is touched. On success the receipt carries the
    /// sender's balance right after the transfer.
    pub async fn create_transfer(
        &self,
        ctx: &CallContext,
        caller: Address,
        recipient: &[u8],
        amount: i64,
    ) -> Result<TransferReceipt> {
        if amount < 1 {
            return Err(Error::InvalidArgument("invalid amount".to_string()));
        }
        let recipient = Address::from_slice(recipient)
            .ok_or_else(|| Error::InvalidArgument("invalid recipient address".to_string()))?;
        if recipient == caller {
            return Err(Error::InvalidArgument("cannot transfer to self".to_string()));
        }

        self.acquire(&self.write_limiter, caller, ctx).await?;

        let started = Instant::now();
        let result = self
            .locks
            .with_exclusive(caller, ctx, || {
                self.store
                    .create_transfer(caller, recipient, amount, self.clock.now())
            })
            .await
            .and_then(|committed| committed);

        match &result {
            Ok(_) => self
                .metrics
                .record_transfer(started.elapsed().as_secs_f64()),
            Err(Error::InsufficientBalance { .. }) => self.metrics.record_insufficient(),
            Err(Error::Cancelled) => self.metrics.record_cancelled(),
            Err(_) => {}
        }

        result
    }

    /// Leave a comment as the caller
    pub async fn create_comment(
        &self,
        ctx: &CallContext,
        caller: Address,
        message: String,
    ) -> Result<Comment> {
        let length = message.chars().count();
        if length == 0 {
            return Err(Error::InvalidArgument(
                "comment must not be empty".to_string(),
            ));
        }
        if length > MAX_COMMENT_CHARS {
            return Err(Error::InvalidArgument(format!(
                "comment must not be longer than {} characters",
                MAX_COMMENT_CHARS
            )));
        }

        self.acquire(&self.write_limiter, caller, ctx).await?;

        let comment = self.store.create_comment(caller, message, self.clock.now())?;
        self.metrics.record_comment();
        Ok(comment)
    }

    /// Glance at `address`, or at the caller when no address is given
    ///
    /// The read limiter is charged to the caller, not to the address looked at.
    pub async fn get_glance(
        &self,
        ctx: &CallContext,
        caller: Address,
        address: Option<&[u8]>,
    ) -> Result<GlanceReport> {
        let target = parse_optional_address(address)?.unwrap_or(caller);

        self.acquire(&self.read_limiter, caller, ctx).await?;
        self.store.get_glance(target, self.clock.now())
    }

    /// Newest activity, optionally only that involving `address`
    pub fn get_feed(&self, address: Option<&[u8]>) -> Result<Feed> {
        let filter = parse_optional_address(address)?;
        self.store.get_feed(filter, self.clock.now())
    }

    /// Last refreshed leaderboard; empty until the first refresh
    pub fn get_leaderboard(&self) -> Arc<Leaderboard> {
        self.leaderboard.get()
    }

    /// Approximate record counts
    pub fn stats(&self) -> Result<StorageStats> {
        self.store.stats()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the leaderboard refresher and wait for it to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let refresher = self.refresher.lock().take();
        if let Some(handle) = refresher {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Leaderboard refresher did not exit cleanly");
            }
        }

        tracing::info!("Ledger shut down");
    }

    async fn acquire(
        &self,
        limiter: &AddressRateLimiter,
        address: Address,
        ctx: &CallContext,
    ) -> Result<()> {
        let result = limiter.wait(address, ctx).await;
        match &result {
            Err(Error::RateLimited) => self.metrics.record_rate_limited(limiter.class()),
            Err(Error::Cancelled) => self.metrics.record_cancelled(),
            _ => {}
        }
        result
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Empty or missing bytes mean "no address"
fn parse_optional_address(bytes: Option<&[u8]>) -> Result<Option<Address>> {
    match bytes {
        None | Some([]) => Ok(None),
        Some(bytes) => Address::from_slice(bytes)
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument("invalid address".to_string())),
    }
}
