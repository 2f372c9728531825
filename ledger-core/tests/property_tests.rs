//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: Σ(balance - baseline) == 0 over every address
//! - No overdraft: committed transfers never take a sender below zero
//! - Baseline monotonicity: an untouched balance grows exactly with the baseline
//! - Leaderboard ordering: rankings are sorted with a deterministic tie-break

use chrono::{DateTime, Duration, Utc};
use ipcoin_ledger::{
    balance::{baseline, project_epoch},
    leaderboard::build_snapshot,
    storage::LedgerStore,
    types::{Address, Glance},
    Config, Error,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use tempfile::TempDir;

/// Small address pool so random transfers collide often
const POOL: u8 = 6;

fn pool_address(index: u8) -> Address {
    Address::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, index + 1)))
}

/// Strategy for generating transfers as (sender, recipient, amount)
fn transfer_strategy() -> impl Strategy<Value = (u8, u8, i64)> {
    (0..POOL, 0..POOL, 1i64..60)
}

/// Strategy for generating instants after the epoch
fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..50_000_000).prop_map(|secs| project_epoch() + Duration::seconds(secs))
}

/// Create test store with temp directory
fn create_test_store() -> (LedgerStore, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();

    (LedgerStore::open(&config).unwrap(), temp_dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: value is only ever moved, never created or destroyed
    #[test]
    fn prop_conservation(
        transfers in prop::collection::vec(transfer_strategy(), 1..40),
        hours in 0i64..200,
    ) {
        let (store, _temp) = create_test_store();
        let now = project_epoch() + Duration::hours(hours);

        for (sender, recipient, amount) in transfers {
            match store.create_transfer(pool_address(sender), pool_address(recipient), amount, now) {
                Ok(_) | Err(Error::InsufficientBalance { .. }) | Err(Error::InvalidArgument(_)) => {}
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {}", e))),
            }
        }

        let base = baseline(now);
        let mut total_diff = 0;
        for index in 0..POOL {
            let balance = store.get_balance(pool_address(index), now).unwrap();
            prop_assert!(balance.available >= 0);
            total_diff += balance.available - base;
        }
        prop_assert_eq!(total_diff, 0);

        let raw: i64 = store.get_leaderboard_raw(now).unwrap().iter().map(|g| g.balance - base).sum();
        prop_assert_eq!(raw, 0);
    }

    /// Property: a sender can never spend more than it holds
    #[test]
    fn prop_no_overdraft(
        amounts in prop::collection::vec(1i64..30, 1..30),
        hours in 0i64..100,
    ) {
        let (store, _temp) = create_test_store();
        let now = project_epoch() + Duration::hours(hours);
        let (sender, recipient) = (pool_address(0), pool_address(1));

        let mut spent = 0;
        for amount in amounts {
            let available = store.get_balance(sender, now).unwrap().available;
            match store.create_transfer(sender, recipient, amount, now) {
                Ok(receipt) => {
                    prop_assert!(amount <= available);
                    prop_assert_eq!(receipt.sender_balance.available, available - amount);
                    spent += amount;
                }
                Err(Error::InsufficientBalance { available: reported, requested }) => {
                    prop_assert!(amount > available);
                    prop_assert_eq!(reported, available);
                    prop_assert_eq!(requested, amount);
                }
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {}", e))),
            }
        }

        prop_assert!(spent <= hours);
        prop_assert_eq!(store.get_balance(sender, now).unwrap().available, hours - spent);
    }

    /// Property: an untouched balance moves exactly with the baseline
    #[test]
    fn prop_baseline_monotonicity(t1 in instant_strategy(), t2 in instant_strategy()) {
        let (store, _temp) = create_test_store();
        let (t1, t2) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        let address = pool_address(3);

        let b1 = store.get_balance(address, t1).unwrap().available;
        let b2 = store.get_balance(address, t2).unwrap().available;

        prop_assert!(b2 >= b1);
        prop_assert_eq!(b2 - b1, baseline(t2) - baseline(t1));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: rankings are sorted, truncated and tie-broken by address
    #[test]
    fn prop_leaderboard_ordering(
        entries in prop::collection::vec((0u8..50, -20i64..20, 0i64..5), 0..40),
        size in 1usize..15,
    ) {
        // One glance per address
        let mut by_address: HashMap<Address, Glance> = HashMap::new();
        for (index, balance, transfers) in entries {
            let address = Address::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, index)));
            by_address.insert(address, Glance {
                timestamp: project_epoch(),
                address,
                balance,
                comment_count: 0,
                transfer_count: transfers,
            });
        }
        let count = by_address.len();

        let board = build_snapshot(project_epoch(), 0, by_address.into_values().collect(), size);

        prop_assert_eq!(board.by_balance.len(), count.min(size));
        prop_assert_eq!(board.by_transfers.len(), count.min(size));

        for pair in board.by_balance.windows(2) {
            prop_assert!(
                pair[0].balance > pair[1].balance
                    || (pair[0].balance == pair[1].balance && pair[0].address < pair[1].address)
            );
        }
        for pair in board.by_transfers.windows(2) {
            prop_assert!(
                pair[0].transfer_count > pair[1].transfer_count
                    || (pair[0].transfer_count == pair[1].transfer_count
                        && pair[0].address < pair[1].address)
            );
        }
    }
}
