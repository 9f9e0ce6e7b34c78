//! Ledger entities.

use bigdecimal::BigDecimal;
use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};
use tally_common::address_to_hex;

/// Placeholder for a name or symbol the contract did not report.
pub const UNKNOWN_METADATA: &str = "N/A";

/// Per-contract supply counters.
///
/// `total_supply == total_minted - total_burned` after every applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: H160,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: BigDecimal,
    pub total_minted: BigDecimal,
    pub total_burned: BigDecimal,
    pub total_transferred: BigDecimal,
    pub event_count: u64,
    pub mint_event_count: u64,
    pub burn_event_count: u64,
    pub transfer_event_count: u64,
}

impl Token {
    /// A token with default metadata and zeroed counters.
    pub fn new(address: H160) -> Self {
        Self {
            address,
            name: UNKNOWN_METADATA.to_string(),
            symbol: UNKNOWN_METADATA.to_string(),
            decimals: 0,
            total_supply: BigDecimal::from(0),
            total_minted: BigDecimal::from(0),
            total_burned: BigDecimal::from(0),
            total_transferred: BigDecimal::from(0),
            event_count: 0,
            mint_event_count: 0,
            burn_event_count: 0,
            transfer_event_count: 0,
        }
    }

    pub fn id(&self) -> String {
        address_to_hex(self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub address: H160,
}

impl Account {
    pub fn new(address: H160) -> Self {
        Self { address }
    }

    pub fn id(&self) -> String {
        address_to_hex(self.address)
    }
}

/// Where a balance change came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub block_number: u64,
    pub timestamp: u64,
    pub transaction_hash: H256,
}

/// Chain position of a log, used as the exactly-once checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl EventPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// Current balance of one account for one token. May be negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: H160,
    pub token: H160,
    pub balance: BigDecimal,
    /// Event that last modified the balance, unset until first stamped
    pub last_modified: Option<Provenance>,
}

impl AccountBalance {
    pub fn new(account: H160, token: H160) -> Self {
        Self {
            account,
            token,
            balance: BigDecimal::from(0),
            last_modified: None,
        }
    }

    pub fn id(&self) -> String {
        balance_id(self.account, self.token)
    }

    pub fn is_negative(&self) -> bool {
        self.balance < BigDecimal::from(0)
    }
}

/// `"{account}-{token}"`
pub fn balance_id(account: H160, token: H160) -> String {
    format!("{}-{}", address_to_hex(account), address_to_hex(token))
}

/// A snapshot waiting for the store to assign its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnapshot {
    pub account: H160,
    pub token: H160,
    pub balance: BigDecimal,
    pub provenance: Provenance,
}

impl NewSnapshot {
    pub fn into_snapshot(self, sequence: u64) -> AccountBalanceSnapshot {
        AccountBalanceSnapshot {
            id: format!("{}-{}", balance_id(self.account, self.token), sequence),
            sequence,
            account_balance: balance_id(self.account, self.token),
            account: self.account,
            token: self.token,
            balance: self.balance,
            provenance: self.provenance,
        }
    }
}

/// Immutable record of a balance right after a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalanceSnapshot {
    /// `"{account}-{token}-{sequence}"`
    pub id: String,
    /// Store-wide creation order
    pub sequence: u64,
    /// Id of the AccountBalance this snapshot belongs to
    pub account_balance: String,
    pub account: H160,
    pub token: H160,
    pub balance: BigDecimal,
    pub provenance: Provenance,
}
