//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `transfers` - Append-only transfer log (key: created || transfer_id)
//! - `comments` - Append-only comment log (key: created || comment_id)
//! - `indices` - Per-address secondary indices
//!
//! # Index layout
//!
//! ```text
//! 'c' || address(17) || record_key(24) -> amount (i64 BE)   credit, address is recipient
//! 'd' || address(17) || record_key(24) -> amount (i64 BE)   debit, address is sender
//! 'm' || address(17) || record_key(24) -> empty             comment authored by address
//! ```
//!
//! Transfer index entries carry the amount so a balance is a prefix sum over the index and
//! never needs the records themselves. There is no stored balance anywhere: every read derives
//! it from a RocksDB snapshot, so credits and debits always come from the same point in time.

use crate::{
    balance::{baseline, LedgerTotals},
    error::{Error, Result},
    leaderboard::{build_snapshot, LeaderboardSource},
    types::{
        Address, Balance, Comment, Feed, Glance, GlanceReport, Leaderboard, Transfer,
        TransferReceipt, ADDRESS_KEY_LEN,
    },
    Config,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, Snapshot, WriteBatch,
    DB,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Column family names
const CF_TRANSFERS: &str = "transfers";
const CF_COMMENTS: &str = "comments";
const CF_INDICES: &str = "indices";

/// Index kinds
const IDX_CREDIT: u8 = b'c';
const IDX_DEBIT: u8 = b'd';
const IDX_COMMENT: u8 = b'm';

const RECORD_KEY_LEN: usize = 24;
const INDEX_PREFIX_LEN: usize = 1 + ADDRESS_KEY_LEN;

/// Newest comments and newest transfers returned by a feed
pub const FEED_LIMIT: usize = 100;

/// Commit locks; transfers from one sender always map to the same stripe
const COMMIT_STRIPES: usize = 64;

/// Storage wrapper for RocksDB
pub struct LedgerStore {
    db: DB,
    commit_stripes: Vec<Mutex<()>>,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl LedgerStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_COMMENTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened ledger store");

        Ok(Self {
            db,
            commit_stripes: (0..COMMIT_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    // Column family options

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn commit_stripe(&self, sender: &Address) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        sender.hash(&mut hasher);
        &self.commit_stripes[(hasher.finish() as usize) % COMMIT_STRIPES]
    }

    // Writes

    /// Check the sender's balance and append the transfer as one atomic unit
    ///
    /// Callers must hold the [`AddressLock`](crate::lock::AddressLock) for `sender`. The store
    /// additionally serializes commits per sender stripe, so the balance read and the append
    /// can never interleave with another debit of the same sender.
    pub fn create_transfer(
        &self,
        sender: Address,
        recipient: Address,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<TransferReceipt> {
        if amount < 1 {
            return Err(Error::InvalidArgument("amount must be positive".to_string()));
        }
        if sender == recipient {
            return Err(Error::InvalidArgument(
                "cannot transfer to self".to_string(),
            ));
        }

        let _commit = self.commit_stripe(&sender).lock();

        let available = {
            let snapshot = self.db.snapshot();
            self.activity(&snapshot, &sender)?.0.available(now)
        };
        let remaining = available - amount;
        if remaining < 0 {
            tracing::debug!(
                sender = %sender,
                available,
                requested = amount,
                "Transfer rejected"
            );
            return Err(Error::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        let transfer = Transfer {
            id: Uuid::now_v7(),
            created: now,
            sender,
            recipient,
            amount,
        };
        let record_key = record_key(transfer.created, &transfer.id);
        let amount_bytes = amount.to_be_bytes();

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_TRANSFERS)?,
            record_key,
            bincode::serialize(&transfer)?,
        );
        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            index_key(IDX_CREDIT, &recipient, &record_key),
            amount_bytes,
        );
        batch.put_cf(
            cf_indices,
            index_key(IDX_DEBIT, &sender, &record_key),
            amount_bytes,
        );
        self.db.write(batch)?;

        tracing::info!(
            transfer_id = %transfer.id,
            sender = %sender,
            recipient = %recipient,
            amount,
            "Transfer committed"
        );

        Ok(TransferReceipt {
            transfer,
            sender_balance: Balance {
                timestamp: now,
                address: sender,
                available: remaining,
            },
        })
    }

    /// Append a comment; message validation is the caller's job
    pub fn create_comment(
        &self,
        address: Address,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<Comment> {
        let comment = Comment {
            id: Uuid::now_v7(),
            created: now,
            address,
            message,
        };
        let record_key = record_key(comment.created, &comment.id);

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_COMMENTS)?,
            record_key,
            bincode::serialize(&comment)?,
        );
        batch.put_cf(
            self.cf_handle(CF_INDICES)?,
            index_key(IDX_COMMENT, &address, &record_key),
            b"",
        );
        self.db.write(batch)?;

        tracing::debug!(comment_id = %comment.id, address = %address, "Comment created");

        Ok(comment)
    }

    // Reads

    /// Derive the balance of `address` at `now`
    pub fn get_balance(&self, address: Address, now: DateTime<Utc>) -> Result<Balance> {
        let snapshot = self.db.snapshot();
        let (totals, _) = self.activity(&snapshot, &address)?;
        Ok(Balance {
            timestamp: now,
            address,
            available: totals.available(now),
        })
    }

    /// Balance and activity counts of `address` at `now`
    pub fn get_glance(&self, address: Address, now: DateTime<Utc>) -> Result<GlanceReport> {
        let snapshot = self.db.snapshot();
        let (totals, transfer_count) = self.activity(&snapshot, &address)?;

        let mut comment_count = 0i64;
        scan_prefix(
            &snapshot,
            self.cf_handle(CF_INDICES)?,
            &index_prefix(IDX_COMMENT, &address),
            |_, _| {
                comment_count += 1;
                Ok(())
            },
        )?;

        Ok(GlanceReport {
            glance: Glance {
                timestamp: now,
                address,
                balance: totals.available(now),
                comment_count,
                transfer_count,
            },
            baseline: baseline(now),
        })
    }

    /// Newest comments and transfers, optionally restricted to one address
    ///
    /// With a filter, transfers match when the address is either sender or recipient.
    pub fn get_feed(&self, filter: Option<Address>, now: DateTime<Utc>) -> Result<Feed> {
        let snapshot = self.db.snapshot();
        let cf_comments = self.cf_handle(CF_COMMENTS)?;
        let cf_transfers = self.cf_handle(CF_TRANSFERS)?;

        let (comments, transfers) = match filter {
            None => (
                newest_records(&snapshot, cf_comments, FEED_LIMIT)?,
                newest_records(&snapshot, cf_transfers, FEED_LIMIT)?,
            ),
            Some(address) => {
                let cf_indices = self.cf_handle(CF_INDICES)?;

                let comment_keys = newest_index_entries(
                    &snapshot,
                    cf_indices,
                    &index_prefix(IDX_COMMENT, &address),
                    FEED_LIMIT,
                )?;

                let mut transfer_keys = newest_index_entries(
                    &snapshot,
                    cf_indices,
                    &index_prefix(IDX_CREDIT, &address),
                    FEED_LIMIT,
                )?;
                transfer_keys.extend(newest_index_entries(
                    &snapshot,
                    cf_indices,
                    &index_prefix(IDX_DEBIT, &address),
                    FEED_LIMIT,
                )?);
                transfer_keys.sort_unstable_by(|a, b| b.cmp(a));
                transfer_keys.truncate(FEED_LIMIT);

                (
                    load_records(&snapshot, cf_comments, &comment_keys)?,
                    load_records(&snapshot, cf_transfers, &transfer_keys)?,
                )
            }
        };

        Ok(Feed {
            timestamp: now,
            comments,
            transfers,
        })
    }

    /// Glance of every address that appears in the ledger, from one snapshot
    pub fn get_leaderboard_raw(&self, now: DateTime<Utc>) -> Result<Vec<Glance>> {
        #[derive(Default)]
        struct Activity {
            diff: i64,
            comments: i64,
            transfers: i64,
        }

        let snapshot = self.db.snapshot();
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let mut by_address: HashMap<Address, Activity> = HashMap::new();

        for item in snapshot.iterator_cf(cf_indices, IteratorMode::Start) {
            let (key, value) = item?;
            if key.len() < INDEX_PREFIX_LEN {
                return Err(Error::Storage("Malformed index key".to_string()));
            }
            let address = Address::from_key(&key[1..INDEX_PREFIX_LEN])
                .ok_or_else(|| Error::Storage("Malformed address in index key".to_string()))?;
            let activity = by_address.entry(address).or_default();
            match key[0] {
                IDX_CREDIT => {
                    activity.diff += decode_amount(&value)?;
                    activity.transfers += 1;
                }
                IDX_DEBIT => {
                    activity.diff -= decode_amount(&value)?;
                    activity.transfers += 1;
                }
                IDX_COMMENT => activity.comments += 1,
                other => {
                    return Err(Error::Storage(format!("Unknown index kind {}", other)));
                }
            }
        }

        let baseline = baseline(now);
        Ok(by_address
            .into_iter()
            .map(|(address, activity)| Glance {
                timestamp: now,
                address,
                balance: baseline + activity.diff,
                comment_count: activity.comments,
                transfer_count: activity.transfers,
            })
            .collect())
    }

    /// Credit/debit totals and transfer count of one address
    fn activity(&self, snapshot: &Snapshot<'_>, address: &Address) -> Result<(LedgerTotals, i64)> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let mut totals = LedgerTotals::default();
        let mut count = 0i64;

        scan_prefix(
            snapshot,
            cf_indices,
            &index_prefix(IDX_CREDIT, address),
            |_, value| {
                totals.credits += decode_amount(value)?;
                count += 1;
                Ok(())
            },
        )?;
        scan_prefix(
            snapshot,
            cf_indices,
            &index_prefix(IDX_DEBIT, address),
            |_, value| {
                totals.debits += decode_amount(value)?;
                count += 1;
                Ok(())
            },
        )?;

        Ok((totals, count))
    }

    // Statistics

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_transfers: self.approximate_count(self.cf_handle(CF_TRANSFERS)?)?,
            total_comments: self.approximate_count(self.cf_handle(CF_COMMENTS)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

impl LeaderboardSource for LedgerStore {
    fn leaderboard(&self, now: DateTime<Utc>, size: usize) -> Result<Leaderboard> {
        let glances = self.get_leaderboard_raw(now)?;
        Ok(build_snapshot(now, baseline(now), glances, size))
    }
}

/// Storage statistics (approximate)
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Transfers appended
    pub total_transfers: u64,
    /// Comments appended
    pub total_comments: u64,
}

// Key helpers

/// Time-ordered record key; sign bit flipped so pre-1970 instants still sort first
fn record_key(created: DateTime<Utc>, id: &Uuid) -> [u8; RECORD_KEY_LEN] {
    let sortable = (created.timestamp_micros() as u64) ^ (1 << 63);
    let mut key = [0u8; RECORD_KEY_LEN];
    key[..8].copy_from_slice(&sortable.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn index_prefix(kind: u8, address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(INDEX_PREFIX_LEN + RECORD_KEY_LEN);
    key.push(kind);
    key.extend_from_slice(&address.to_key());
    key
}

fn index_key(kind: u8, address: &Address, record_key: &[u8; RECORD_KEY_LEN]) -> Vec<u8> {
    let mut key = index_prefix(kind, address);
    key.extend_from_slice(record_key);
    key
}

fn decode_amount(value: &[u8]) -> Result<i64> {
    <[u8; 8]>::try_from(value)
        .map(i64::from_be_bytes)
        .map_err(|_| Error::Storage("Malformed amount in index".to_string()))
}

// Snapshot scans

fn scan_prefix<F>(snapshot: &Snapshot<'_>, cf: &ColumnFamily, prefix: &[u8], mut f: F) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    for item in snapshot.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward)) {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        f(&key, &value)?;
    }
    Ok(())
}

/// Record keys of the newest `limit` index entries under `prefix`, newest first
fn newest_index_entries(
    snapshot: &Snapshot<'_>,
    cf: &ColumnFamily,
    prefix: &[u8],
    limit: usize,
) -> Result<Vec<Vec<u8>>> {
    let mut upper = prefix.to_vec();
    upper.extend_from_slice(&[0xFF; RECORD_KEY_LEN]);

    let mut keys = Vec::new();
    for item in snapshot.iterator_cf(cf, IteratorMode::From(upper.as_slice(), Direction::Reverse)) {
        if keys.len() >= limit {
            break;
        }
        let (key, _) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key[prefix.len()..].to_vec());
    }
    Ok(keys)
}

fn newest_records<T: serde::de::DeserializeOwned>(
    snapshot: &Snapshot<'_>,
    cf: &ColumnFamily,
    limit: usize,
) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for item in snapshot.iterator_cf(cf, IteratorMode::End) {
        if records.len() >= limit {
            break;
        }
        let (_, value) = item?;
        records.push(bincode::deserialize(&value)?);
    }
    Ok(records)
}

fn load_records<T: serde::de::DeserializeOwned>(
    snapshot: &Snapshot<'_>,
    cf: &ColumnFamily,
    keys: &[Vec<u8>],
) -> Result<Vec<T>> {
    keys.iter()
        .map(|key| -> Result<T> {
            let value = snapshot
                .get_cf(cf, key)?
                .ok_or_else(|| Error::Storage("Index points at missing record".to_string()))?;
            Ok(bincode::deserialize(&value)?)
        })
        .collect()
}
