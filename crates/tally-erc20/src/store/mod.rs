//! Entity storage: load by key, upsert in atomic per-event batches.

pub mod memory;
pub mod sqlite;

use primitive_types::H160;
use serde::Serialize;

use crate::error::LedgerResult;
use crate::model::{
    Account, AccountBalance, AccountBalanceSnapshot, EventPosition, NewSnapshot, Token,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Everything one event writes, applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    pub tokens: Vec<Token>,
    pub accounts: Vec<Account>,
    pub balances: Vec<AccountBalance>,
    /// Appended in order, sequence numbers assigned by the store
    pub snapshots: Vec<NewSnapshot>,
    /// Position of the event, recorded so it is never applied twice
    pub checkpoint: Option<EventPosition>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
            && self.accounts.is_empty()
            && self.balances.is_empty()
            && self.snapshots.is_empty()
            && self.checkpoint.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub tokens: u64,
    pub accounts: u64,
    pub balances: u64,
    pub snapshots: u64,
    pub checkpoint: Option<EventPosition>,
}

/// Storage for ledger entities.
///
/// Readers only ever observe whole commits.
pub trait EntityStore: Send + Sync {
    fn load_token(&self, address: H160) -> LedgerResult<Option<Token>>;

    fn load_account(&self, address: H160) -> LedgerResult<Option<Account>>;

    fn load_balance(&self, account: H160, token: H160) -> LedgerResult<Option<AccountBalance>>;

    /// Position of the last committed event.
    fn checkpoint(&self) -> LedgerResult<Option<EventPosition>>;

    /// Applies `writes` atomically.
    fn commit(&self, writes: WriteSet) -> LedgerResult<()>;

    /// All tokens, ordered by address.
    fn tokens(&self) -> LedgerResult<Vec<Token>>;

    /// Balances held by `account`, ordered by token.
    fn balances_of(&self, account: H160) -> LedgerResult<Vec<AccountBalance>>;

    /// Snapshots of one balance in creation order.
    fn snapshots(&self, account: H160, token: H160) -> LedgerResult<Vec<AccountBalanceSnapshot>>;

    /// Latest snapshot with `block_number <= block`.
    fn balance_at(
        &self,
        account: H160,
        token: H160,
        block: u64,
    ) -> LedgerResult<Option<AccountBalanceSnapshot>>;

    /// Balances of `token` that are below zero.
    fn negative_balances(&self, token: H160) -> LedgerResult<Vec<AccountBalance>>;

    fn stats(&self) -> LedgerResult<StoreStats>;
}
