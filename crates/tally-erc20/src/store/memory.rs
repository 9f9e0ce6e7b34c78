//! In-memory entity store.

use primitive_types::H160;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{EntityStore, StoreStats, WriteSet};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Account, AccountBalance, AccountBalanceSnapshot, EventPosition, Token};

#[derive(Debug, Default)]
struct State {
    tokens: BTreeMap<H160, Token>,
    accounts: BTreeMap<H160, Account>,
    /// Keyed by (account, token)
    balances: BTreeMap<(H160, H160), AccountBalance>,
    snapshots: Vec<AccountBalanceSnapshot>,
    next_sequence: u64,
    checkpoint: Option<EventPosition>,
}

/// Entity store held entirely in memory, behind one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> LedgerResult<T> {
        let state = self.state.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(f(&state))
    }
}

impl EntityStore for MemoryStore {
    fn load_token(&self, address: H160) -> LedgerResult<Option<Token>> {
        self.read(|s| s.tokens.get(&address).cloned())
    }

    fn load_account(&self, address: H160) -> LedgerResult<Option<Account>> {
        self.read(|s| s.accounts.get(&address).copied())
    }

    fn load_balance(&self, account: H160, token: H160) -> LedgerResult<Option<AccountBalance>> {
        self.read(|s| s.balances.get(&(account, token)).cloned())
    }

    fn checkpoint(&self) -> LedgerResult<Option<EventPosition>> {
        self.read(|s| s.checkpoint)
    }

    fn commit(&self, writes: WriteSet) -> LedgerResult<()> {
        let mut state = self.state.write().map_err(|_| LedgerError::LockPoisoned)?;

        for token in writes.tokens {
            state.tokens.insert(token.address, token);
        }
        for account in writes.accounts {
            state.accounts.insert(account.address, account);
        }
        for balance in writes.balances {
            state
                .balances
                .insert((balance.account, balance.token), balance);
        }
        for snapshot in writes.snapshots {
            state.next_sequence += 1;
            let sequence = state.next_sequence;
            state.snapshots.push(snapshot.into_snapshot(sequence));
        }
        if writes.checkpoint.is_some() {
            state.checkpoint = writes.checkpoint;
        }
        Ok(())
    }

    fn tokens(&self) -> LedgerResult<Vec<Token>> {
        self.read(|s| s.tokens.values().cloned().collect())
    }

    fn balances_of(&self, account: H160) -> LedgerResult<Vec<AccountBalance>> {
        self.read(|s| {
            s.balances
                .range((account, H160::zero())..=(account, H160::repeat_byte(0xff)))
                .map(|(_, balance)| balance.clone())
                .collect()
        })
    }

    fn snapshots(&self, account: H160, token: H160) -> LedgerResult<Vec<AccountBalanceSnapshot>> {
        self.read(|s| {
            s.snapshots
                .iter()
                .filter(|snap| snap.account == account && snap.token == token)
                .cloned()
                .collect()
        })
    }

    fn balance_at(
        &self,
        account: H160,
        token: H160,
        block: u64,
    ) -> LedgerResult<Option<AccountBalanceSnapshot>> {
        self.read(|s| {
            s.snapshots
                .iter()
                .rev()
                .find(|snap| {
                    snap.account == account
                        && snap.token == token
                        && snap.provenance.block_number <= block
                })
                .cloned()
        })
    }

    fn negative_balances(&self, token: H160) -> LedgerResult<Vec<AccountBalance>> {
        self.read(|s| {
            s.balances
                .values()
                .filter(|balance| balance.token == token && balance.is_negative())
                .cloned()
                .collect()
        })
    }

    fn stats(&self) -> LedgerResult<StoreStats> {
        self.read(|s| StoreStats {
            tokens: s.tokens.len() as u64,
            accounts: s.accounts.len() as u64,
            balances: s.balances.len() as u64,
            snapshots: s.snapshots.len() as u64,
            checkpoint: s.checkpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewSnapshot, Provenance};
    use bigdecimal::BigDecimal;

    fn addr(n: u64) -> H160 {
        H160::from_low_u64_be(n)
    }

    fn snapshot(account: H160, token: H160, balance: i64, block: u64) -> NewSnapshot {
        NewSnapshot {
            account,
            token,
            balance: BigDecimal::from(balance),
            provenance: Provenance {
                block_number: block,
                ..Provenance::default()
            },
        }
    }

    #[test]
    fn test_commit_and_load() {
        let store = MemoryStore::new();
        let mut balance = AccountBalance::new(addr(1), addr(10));
        balance.balance = BigDecimal::from(-5);

        store
            .commit(WriteSet {
                tokens: vec![Token::new(addr(10))],
                accounts: vec![Account::new(addr(1))],
                balances: vec![balance.clone()],
                snapshots: vec![snapshot(addr(1), addr(10), -5, 3)],
                checkpoint: Some(EventPosition::new(3, 0)),
            })
            .unwrap();

        assert!(store.load_token(addr(10)).unwrap().is_some());
        assert_eq!(store.load_account(addr(1)).unwrap(), Some(Account::new(addr(1))));
        assert_eq!(store.load_balance(addr(1), addr(10)).unwrap(), Some(balance.clone()));
        assert_eq!(store.checkpoint().unwrap(), Some(EventPosition::new(3, 0)));
        assert_eq!(store.negative_balances(addr(10)).unwrap(), vec![balance]);
        assert_eq!(store.stats().unwrap().snapshots, 1);
    }

    #[test]
    fn test_balances_of_is_scoped_to_account() {
        let store = MemoryStore::new();
        store
            .commit(WriteSet {
                balances: vec![
                    AccountBalance::new(addr(1), addr(10)),
                    AccountBalance::new(addr(1), addr(11)),
                    AccountBalance::new(addr(2), addr(10)),
                ],
                ..WriteSet::default()
            })
            .unwrap();

        let balances = store.balances_of(addr(1)).unwrap();
        assert_eq!(balances.len(), 2);
        assert!(balances.iter().all(|b| b.account == addr(1)));
    }

    #[test]
    fn test_balance_at_picks_latest_snapshot_not_after_block() {
        let store = MemoryStore::new();
        store
            .commit(WriteSet {
                snapshots: vec![
                    snapshot(addr(1), addr(10), 100, 5),
                    snapshot(addr(1), addr(10), 60, 8),
                    snapshot(addr(1), addr(10), 70, 8),
                    snapshot(addr(2), addr(10), 1, 9),
                ],
                ..WriteSet::default()
            })
            .unwrap();

        assert!(store.balance_at(addr(1), addr(10), 4).unwrap().is_none());
        assert_eq!(
            store.balance_at(addr(1), addr(10), 7).unwrap().unwrap().balance,
            BigDecimal::from(100)
        );
        let at_eight = store.balance_at(addr(1), addr(10), 8).unwrap().unwrap();
        assert_eq!(at_eight.balance, BigDecimal::from(70));
        assert_eq!(at_eight.sequence, 3);

        let sequences: Vec<u64> = store
            .snapshots(addr(1), addr(10))
            .unwrap()
            .iter()
            .map(|s| s.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }
}
