//! Core types for the ledger
//!
//! Records (`Transfer`, `Comment`) are immutable once appended. Everything else here is a
//! derived view: balances, glances, feeds and leaderboards are computed from the records and
//! never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Width of an encoded address key (family tag + 16 address bytes)
pub const ADDRESS_KEY_LEN: usize = 17;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// Ledger account key: the IP address of a network endpoint
///
/// No account record exists. An address "exists" once it appears in any record.
/// Ordering follows `IpAddr`: every IPv4 address sorts before every IPv6 address,
/// then bytewise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(IpAddr);

impl Address {
    /// Wrap an IP address
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    /// Parse wire bytes: 4 bytes for IPv4, 16 bytes for IPv6
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            4 => {
                let octets: [u8; 4] = bytes.try_into().ok()?;
                Some(Self(IpAddr::V4(Ipv4Addr::from(octets))))
            }
            16 => {
                let octets: [u8; 16] = bytes.try_into().ok()?;
                Some(Self(IpAddr::V6(Ipv6Addr::from(octets))))
            }
            _ => None,
        }
    }

    /// Wire bytes (4 or 16)
    pub fn as_bytes(&self) -> Vec<u8> {
        match self.0 {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }

    /// Underlying IP address
    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// Fixed-width storage key; preserves `Ord` under bytewise comparison
    pub fn to_key(&self) -> [u8; ADDRESS_KEY_LEN] {
        let mut key = [0u8; ADDRESS_KEY_LEN];
        match self.0 {
            IpAddr::V4(v4) => {
                key[0] = FAMILY_V4;
                key[1..5].copy_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                key[0] = FAMILY_V6;
                key[1..].copy_from_slice(&v6.octets());
            }
        }
        key
    }

    /// Inverse of [`Address::to_key`]
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != ADDRESS_KEY_LEN {
            return None;
        }
        match key[0] {
            FAMILY_V4 => Self::from_slice(&key[1..5]),
            FAMILY_V6 => Self::from_slice(&key[1..]),
            _ => None,
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl std::str::FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<IpAddr>().map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value moved from one address to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID (UUIDv7)
    pub id: Uuid,

    /// Creation instant
    pub created: DateTime<Utc>,

    /// Debited address
    pub sender: Address,

    /// Credited address
    pub recipient: Address,

    /// Always >= 1
    pub amount: i64,
}

/// Free-text message left by an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique comment ID (UUIDv7)
    pub id: Uuid,

    /// Creation instant
    pub created: DateTime<Utc>,

    /// Author
    pub address: Address,

    /// 1..=1000 characters
    pub message: String,
}

/// Derived balance of one address at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Instant the balance was derived for
    pub timestamp: DateTime<Utc>,

    /// Account
    pub address: Address,

    /// Baseline + credits - debits
    pub available: i64,
}

/// Result of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// The appended record
    pub transfer: Transfer,

    /// Sender balance immediately after the transfer
    pub sender_balance: Balance,
}

/// Point-in-time summary of one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glance {
    /// Instant the glance was derived for
    pub timestamp: DateTime<Utc>,

    /// Account
    pub address: Address,

    /// Available balance
    pub balance: i64,

    /// Comments authored
    pub comment_count: i64,

    /// Transfers as sender or recipient
    pub transfer_count: i64,
}

/// Glance plus the baseline it was computed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlanceReport {
    /// The summary
    pub glance: Glance,

    /// Balance of an address with no ledger activity at the same instant
    pub baseline: i64,
}

/// Most recent activity, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    /// Request instant
    pub timestamp: DateTime<Utc>,

    /// Newest comments
    pub comments: Vec<Comment>,

    /// Newest transfers
    pub transfers: Vec<Transfer>,
}

/// Ranked snapshot over all addresses; replaced wholesale, never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    /// Refresh instant
    pub timestamp: DateTime<Utc>,

    /// Baseline at the refresh instant
    pub baseline: i64,

    /// Highest balances first
    pub by_balance: Vec<Glance>,

    /// Most transfers first
    pub by_transfers: Vec<Glance>,
}

impl Leaderboard {
    /// Snapshot served before the first successful refresh
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            baseline: 0,
            by_balance: Vec::new(),
            by_transfers: Vec::new(),
        }
    }

    /// No entries in either ranking
    pub fn is_empty(&self) -> bool {
        self.by_balance.is_empty() && self.by_transfers.is_empty()
    }
}
