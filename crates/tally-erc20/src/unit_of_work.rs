//! Per-event write buffer.
//!
//! Loads read through the writes already buffered for the event, so a later step
//! sees what an earlier step saved. Nothing reaches the store until `commit`.

use primitive_types::H160;
use std::collections::BTreeMap;

use crate::error::LedgerResult;
use crate::model::{Account, AccountBalance, EventPosition, NewSnapshot, Token};
use crate::store::{EntityStore, WriteSet};

pub struct UnitOfWork<'a> {
    store: &'a dyn EntityStore,
    position: Option<EventPosition>,
    tokens: BTreeMap<H160, Token>,
    accounts: BTreeMap<H160, Account>,
    balances: BTreeMap<(H160, H160), AccountBalance>,
    snapshots: Vec<NewSnapshot>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            position: None,
            tokens: BTreeMap::new(),
            accounts: BTreeMap::new(),
            balances: BTreeMap::new(),
            snapshots: Vec::new(),
        }
    }

    /// Records `position` as the store checkpoint when the unit commits.
    pub fn at_position(mut self, position: EventPosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn load_token(&self, address: H160) -> LedgerResult<Option<Token>> {
        match self.tokens.get(&address) {
            Some(token) => Ok(Some(token.clone())),
            None => self.store.load_token(address),
        }
    }

    pub fn load_account(&self, address: H160) -> LedgerResult<Option<Account>> {
        match self.accounts.get(&address) {
            Some(account) => Ok(Some(*account)),
            None => self.store.load_account(address),
        }
    }

    pub fn load_balance(&self, account: H160, token: H160) -> LedgerResult<Option<AccountBalance>> {
        match self.balances.get(&(account, token)) {
            Some(balance) => Ok(Some(balance.clone())),
            None => self.store.load_balance(account, token),
        }
    }

    pub fn save_token(&mut self, token: Token) {
        self.tokens.insert(token.address, token);
    }

    pub fn save_account(&mut self, account: Account) {
        self.accounts.insert(account.address, account);
    }

    pub fn save_balance(&mut self, balance: AccountBalance) {
        self.balances.insert((balance.account, balance.token), balance);
    }

    pub fn append_snapshot(&mut self, snapshot: NewSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Snapshots buffered so far, in append order.
    pub fn pending_snapshots(&self) -> &[NewSnapshot] {
        &self.snapshots
    }

    pub fn into_write_set(self) -> WriteSet {
        WriteSet {
            tokens: self.tokens.into_values().collect(),
            accounts: self.accounts.into_values().collect(),
            balances: self.balances.into_values().collect(),
            snapshots: self.snapshots,
            checkpoint: self.position,
        }
    }

    /// Hands every buffered write to the store as one atomic commit.
    pub fn commit(self) -> LedgerResult<()> {
        let store = self.store;
        store.commit(self.into_write_set())
    }
}
