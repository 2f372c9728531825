//! IPCoin Ledger Core
//!
//! Toy currency ledger keyed by network address. Every address receives the same baseline
//! grant, one coin per hour since the project epoch, and can spend it by transferring to other
//! addresses.
//!
//! # Architecture
//!
//! - **Derived balances**: No balance is ever stored; it is recomputed from the transfer log
//! - **Per-sender locking**: Transfers from one sender are serialized, unrelated senders are not
//! - **Per-address rate limits**: Independent token buckets for reads and writes
//! - **Cached leaderboard**: Rankings are recomputed in the background and served from memory
//!
//! # Invariants
//!
//! - Money conservation: Σ(balance - baseline) == 0 over all addresses
//! - No overdraft: a committed transfer never leaves its sender negative
//! - Append-only: Transfers and comments are never modified or deleted
//! - Side-effect free failure: a rejected or cancelled call changes nothing

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod balance;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
mod idle;
pub mod leaderboard;
pub mod ledger;
pub mod limiter;
pub mod lock;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::CallContext;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use types::{
    Address, Balance, Comment, Feed, Glance, GlanceReport, Leaderboard, Transfer,
    TransferReceipt,
};
