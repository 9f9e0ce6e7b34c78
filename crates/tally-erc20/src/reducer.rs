//! Event classification and reduction.
//!
//! One decoded event becomes one atomic commit: token counters, the touched
//! accounts and balances, one snapshot per balance change, and the checkpoint.

use bigdecimal::BigDecimal;
use primitive_types::{H160, U256};
use serde::Serialize;
use std::sync::Arc;
use tally_common::{address_to_hex, MetadataSource, ZERO_ADDRESS};

use crate::error::LedgerResult;
use crate::ledger::{decrease_account_balance, get_or_create_account, increase_account_balance};
use crate::model::{Account, AccountBalance, EventPosition, Provenance};
use crate::numeric::to_decimal;
use crate::registry::TokenRegistry;
use crate::snapshot::save_account_balance_snapshot;
use crate::store::EntityStore;
use crate::unit_of_work::UnitOfWork;

/// Token event as emitted by the contract, amounts still raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEvent {
    Transfer { from: H160, to: H160, value: U256 },
    Mint { to: H160, amount: U256 },
    Burn { burner: H160, value: U256 },
}

impl TokenEvent {
    pub fn raw_amount(&self) -> U256 {
        match *self {
            TokenEvent::Transfer { value, .. } => value,
            TokenEvent::Mint { amount, .. } => amount,
            TokenEvent::Burn { value, .. } => value,
        }
    }

    /// Account debited and account credited, in that order.
    fn parties(&self, kind: EventKind) -> (Option<H160>, Option<H160>) {
        match (*self, kind) {
            (TokenEvent::Transfer { from, .. }, EventKind::Burn) => (Some(from), None),
            (TokenEvent::Transfer { to, .. }, EventKind::Mint) => (None, Some(to)),
            (TokenEvent::Transfer { from, to, .. }, EventKind::Transfer) => (Some(from), Some(to)),
            (TokenEvent::Mint { to, .. }, _) => (None, Some(to)),
            (TokenEvent::Burn { burner, .. }, _) => (Some(burner), None),
        }
    }
}

/// A token event with the context needed to reduce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTokenEvent {
    /// Emitting token contract
    pub contract: H160,
    pub event: TokenEvent,
    pub provenance: Provenance,
    pub position: EventPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Mint,
    Burn,
    Transfer,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
            EventKind::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an event. Generic transfers are classified by the null address,
/// burn first, so a transfer from and to the null address is a burn.
pub fn classify(event: &TokenEvent) -> EventKind {
    match *event {
        TokenEvent::Transfer { to, .. } if to == ZERO_ADDRESS => EventKind::Burn,
        TokenEvent::Transfer { from, .. } if from == ZERO_ADDRESS => EventKind::Mint,
        TokenEvent::Transfer { .. } => EventKind::Transfer,
        TokenEvent::Mint { .. } => EventKind::Mint,
        TokenEvent::Burn { .. } => EventKind::Burn,
    }
}

/// What a reduced event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    pub kind: EventKind,
    pub token: H160,
    pub amount: BigDecimal,
    /// Balances after the event, in the order they were changed
    pub touched: Vec<AccountBalance>,
}

pub struct Reducer {
    registry: TokenRegistry,
    store: Arc<dyn EntityStore>,
}

impl Reducer {
    pub fn new(store: Arc<dyn EntityStore>, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            registry: TokenRegistry::new(metadata),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Applies one event.
    ///
    /// Returns `Ok(None)` when the event is at or before the store checkpoint and
    /// was already applied. On error nothing from the event is written.
    pub async fn reduce(&self, event: &DecodedTokenEvent) -> LedgerResult<Option<EventOutcome>> {
        if let Some(checkpoint) = self.store.checkpoint()? {
            if event.position <= checkpoint {
                tracing::debug!(
                    target: "tally_erc20::reducer",
                    block = event.position.block_number,
                    log_index = event.position.log_index,
                    "Skipping already applied event"
                );
                return Ok(None);
            }
        }

        let mut uow = UnitOfWork::new(self.store.as_ref()).at_position(event.position);

        let mut token = self
            .registry
            .fetch_token_details(&mut uow, event.contract)
            .await?;
        let amount = to_decimal(event.event.raw_amount(), token.decimals);
        let kind = classify(&event.event);

        match kind {
            EventKind::Mint => self.registry.apply_mint(&mut uow, &mut token, &amount),
            EventKind::Burn => self.registry.apply_burn(&mut uow, &mut token, &amount),
            EventKind::Transfer => self.registry.apply_transfer(&mut uow, &mut token, &amount),
        }

        let (debited, credited) = event.event.parties(kind);
        let mut touched = Vec::with_capacity(2);

        if let Some(address) = debited {
            let account = get_or_create_account(&uow, address)?;
            let balance = decrease_account_balance(&uow, &account, token.address, &amount)?;
            touched.push(stamp_and_save(&mut uow, account, balance, &event.provenance));
        }

        if let Some(address) = credited {
            let account = get_or_create_account(&uow, address)?;
            let balance = increase_account_balance(&uow, &account, token.address, &amount)?;
            touched.push(stamp_and_save(&mut uow, account, balance, &event.provenance));
        }

        uow.commit()?;

        metrics::counter!("tally_events_total", "kind" => kind.as_str()).increment(1);
        tracing::debug!(
            target: "tally_erc20::reducer",
            kind = %kind,
            token = %address_to_hex(token.address),
            amount = %amount,
            block = event.provenance.block_number,
            "Reduced event"
        );

        Ok(Some(EventOutcome {
            kind,
            token: token.address,
            amount,
            touched,
        }))
    }
}

fn stamp_and_save(
    uow: &mut UnitOfWork<'_>,
    account: Account,
    mut balance: AccountBalance,
    provenance: &Provenance,
) -> AccountBalance {
    balance.last_modified = Some(*provenance);
    uow.save_account(account);
    uow.save_balance(balance.clone());
    save_account_balance_snapshot(uow, &balance, provenance);
    balance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::model::{AccountBalanceSnapshot, Token};
    use crate::store::{MemoryStore, StoreStats, WriteSet};
    use primitive_types::H256;
    use std::str::FromStr;
    use tally_common::{StaticMetadata, TokenMetadata};

    const TOKEN: u64 = 0x70;
    const A: u64 = 0xa;
    const B: u64 = 0xb;

    fn addr(n: u64) -> H160 {
        H160::from_low_u64_be(n)
    }

    fn metadata(decimals: u8) -> Arc<StaticMetadata> {
        Arc::new(StaticMetadata::new().with_token(
            addr(TOKEN),
            TokenMetadata {
                name: Some("Tally Test".to_string()),
                symbol: Some("TT".to_string()),
                decimals: Some(decimals),
            },
        ))
    }

    fn event(block: u64, log_index: u64, event: TokenEvent) -> DecodedTokenEvent {
        DecodedTokenEvent {
            contract: addr(TOKEN),
            event,
            provenance: Provenance {
                block_number: block,
                timestamp: 1_700_000_000 + block,
                transaction_hash: H256::from_low_u64_be(block * 1000 + log_index),
            },
            position: EventPosition::new(block, log_index),
        }
    }

    fn transfer(from: H160, to: H160, value: u64) -> TokenEvent {
        TokenEvent::Transfer {
            from,
            to,
            value: U256::from(value),
        }
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn balance_of(store: &MemoryStore, account: H160) -> BigDecimal {
        store
            .load_balance(account, addr(TOKEN))
            .unwrap()
            .map(|b| b.balance)
            .unwrap_or_default()
    }

    fn reducer(store: &Arc<MemoryStore>, decimals: u8) -> Reducer {
        Reducer::new(store.clone(), metadata(decimals))
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&transfer(addr(A), addr(B), 1)), EventKind::Transfer);
        assert_eq!(classify(&transfer(ZERO_ADDRESS, addr(B), 1)), EventKind::Mint);
        assert_eq!(classify(&transfer(addr(A), ZERO_ADDRESS, 1)), EventKind::Burn);
        assert_eq!(classify(&transfer(ZERO_ADDRESS, ZERO_ADDRESS, 1)), EventKind::Burn);
        assert_eq!(
            classify(&TokenEvent::Mint {
                to: addr(A),
                amount: U256::one()
            }),
            EventKind::Mint
        );
    }

    #[tokio::test]
    async fn test_plain_transfer_with_decimals() {
        let store = Arc::new(MemoryStore::new());
        let reducer = reducer(&store, 2);

        let outcome = reducer
            .reduce(&event(1, 0, transfer(addr(A), addr(B), 500)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.kind, EventKind::Transfer);
        assert_eq!(outcome.amount, dec("5.00"));
        assert_eq!(balance_of(&store, addr(A)), dec("-5"));
        assert_eq!(balance_of(&store, addr(B)), dec("5"));

        let token = store.load_token(addr(TOKEN)).unwrap().unwrap();
        assert_eq!(token.total_transferred, dec("5"));
        assert_eq!(token.transfer_event_count, 1);
        assert_eq!(token.event_count, 1);
        assert_eq!(token.total_supply, BigDecimal::from(0));

        assert_eq!(store.snapshots(addr(A), addr(TOKEN)).unwrap().len(), 1);
        assert_eq!(store.snapshots(addr(B), addr(TOKEN)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mint_and_burn_by_transfer() {
        let store = Arc::new(MemoryStore::new());
        let reducer = reducer(&store, 0);

        reducer
            .reduce(&event(1, 0, transfer(ZERO_ADDRESS, addr(A), 100)))
            .await
            .unwrap();
        let outcome = reducer
            .reduce(&event(2, 0, transfer(addr(A), ZERO_ADDRESS, 40)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.kind, EventKind::Burn);
        assert_eq!(outcome.touched.len(), 1);
        assert_eq!(balance_of(&store, addr(A)), BigDecimal::from(60));
        assert!(store.load_balance(ZERO_ADDRESS, addr(TOKEN)).unwrap().is_none());

        let token = store.load_token(addr(TOKEN)).unwrap().unwrap();
        assert_eq!(token.total_minted, BigDecimal::from(100));
        assert_eq!(token.total_burned, BigDecimal::from(40));
        assert_eq!(token.total_supply, BigDecimal::from(60));
        assert_eq!(token.total_transferred, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_null_to_null_is_a_burn() {
        let store = Arc::new(MemoryStore::new());
        let reducer = reducer(&store, 0);

        let outcome = reducer
            .reduce(&event(1, 0, transfer(ZERO_ADDRESS, ZERO_ADDRESS, 7)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.kind, EventKind::Burn);
        assert_eq!(balance_of(&store, ZERO_ADDRESS), BigDecimal::from(-7));
        let token = store.load_token(addr(TOKEN)).unwrap().unwrap();
        assert_eq!(token.total_supply, BigDecimal::from(-7));
        assert_eq!(token.burn_event_count, 1);
    }

    #[tokio::test]
    async fn test_explicit_mint_and_burn_touch_one_party() {
        let store = Arc::new(MemoryStore::new());
        let reducer = reducer(&store, 1);

        let mint = reducer
            .reduce(&event(
                1,
                0,
                TokenEvent::Mint {
                    to: addr(A),
                    amount: U256::from(25),
                },
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mint.amount, dec("2.5"));
        assert_eq!(mint.touched.len(), 1);

        let burn = reducer
            .reduce(&event(
                2,
                0,
                TokenEvent::Burn {
                    burner: addr(A),
                    value: U256::from(5),
                },
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(burn.kind, EventKind::Burn);

        assert_eq!(balance_of(&store, addr(A)), dec("2"));
        assert!(store.load_account(ZERO_ADDRESS).unwrap().is_none());
        let token = store.load_token(addr(TOKEN)).unwrap().unwrap();
        assert_eq!(token.total_supply, dec("2"));
        assert_eq!(token.mint_event_count, 1);
        assert_eq!(token.burn_event_count, 1);
    }

    #[tokio::test]
    async fn test_self_transfer_keeps_balance_with_two_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let reducer = reducer(&store, 0);

        reducer
            .reduce(&event(1, 0, transfer(ZERO_ADDRESS, addr(A), 10)))
            .await
            .unwrap();
        let outcome = reducer
            .reduce(&event(2, 0, transfer(addr(A), addr(A), 4)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.touched[0].balance, BigDecimal::from(6));
        assert_eq!(outcome.touched[1].balance, BigDecimal::from(10));
        assert_eq!(balance_of(&store, addr(A)), BigDecimal::from(10));

        let balances: Vec<BigDecimal> = store
            .snapshots(addr(A), addr(TOKEN))
            .unwrap()
            .into_iter()
            .map(|s| s.balance)
            .collect();
        assert_eq!(
            balances,
            vec![
                BigDecimal::from(10),
                BigDecimal::from(6),
                BigDecimal::from(10)
            ]
        );
    }

    #[tokio::test]
    async fn test_provenance_is_stamped() {
        let store = Arc::new(MemoryStore::new());
        let reducer = reducer(&store, 0);
        let transfer_event = event(9, 3, transfer(addr(A), addr(B), 1));

        reducer.reduce(&transfer_event).await.unwrap();

        let balance = store.load_balance(addr(B), addr(TOKEN)).unwrap().unwrap();
        assert_eq!(balance.last_modified, Some(transfer_event.provenance));
        assert_eq!(store.checkpoint().unwrap(), Some(EventPosition::new(9, 3)));
    }

    #[tokio::test]
    async fn test_replayed_event_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let reducer = reducer(&store, 0);
        let mint = event(3, 1, transfer(ZERO_ADDRESS, addr(A), 10));

        assert!(reducer.reduce(&mint).await.unwrap().is_some());
        assert!(reducer.reduce(&mint).await.unwrap().is_none());
        assert!(reducer
            .reduce(&event(3, 0, transfer(ZERO_ADDRESS, addr(A), 10)))
            .await
            .unwrap()
            .is_none());

        assert_eq!(balance_of(&store, addr(A)), BigDecimal::from(10));
        assert_eq!(store.stats().unwrap().snapshots, 1);
    }

    /// Store whose reads or commits can be made to fail.
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryStore,
        fail_token_reads: bool,
        fail_commits: bool,
    }

    impl EntityStore for FailingStore {
        fn load_token(&self, address: H160) -> LedgerResult<Option<Token>> {
            if self.fail_token_reads {
                return Err(LedgerError::Storage("token table unavailable".to_string()));
            }
            self.inner.load_token(address)
        }

        fn load_account(&self, address: H160) -> LedgerResult<Option<Account>> {
            self.inner.load_account(address)
        }

        fn load_balance(&self, account: H160, token: H160) -> LedgerResult<Option<AccountBalance>> {
            self.inner.load_balance(account, token)
        }

        fn checkpoint(&self) -> LedgerResult<Option<EventPosition>> {
            self.inner.checkpoint()
        }

        fn commit(&self, writes: WriteSet) -> LedgerResult<()> {
            if self.fail_commits {
                return Err(LedgerError::Storage("disk full".to_string()));
            }
            self.inner.commit(writes)
        }

        fn tokens(&self) -> LedgerResult<Vec<Token>> {
            self.inner.tokens()
        }

        fn balances_of(&self, account: H160) -> LedgerResult<Vec<AccountBalance>> {
            self.inner.balances_of(account)
        }

        fn snapshots(&self, account: H160, token: H160) -> LedgerResult<Vec<AccountBalanceSnapshot>> {
            self.inner.snapshots(account, token)
        }

        fn balance_at(
            &self,
            account: H160,
            token: H160,
            block: u64,
        ) -> LedgerResult<Option<AccountBalanceSnapshot>> {
            self.inner.balance_at(account, token, block)
        }

        fn negative_balances(&self, token: H160) -> LedgerResult<Vec<AccountBalance>> {
            self.inner.negative_balances(token)
        }

        fn stats(&self) -> LedgerResult<StoreStats> {
            self.inner.stats()
        }
    }

    #[tokio::test]
    async fn test_unresolvable_token_aborts_event() {
        let store = Arc::new(FailingStore {
            fail_token_reads: true,
            ..FailingStore::default()
        });
        let reducer = Reducer::new(store.clone(), metadata(0));

        let err = reducer
            .reduce(&event(1, 0, transfer(addr(A), addr(B), 1)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::TokenUnresolvable { address, .. } if address == addr(TOKEN)
        ));
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_state() {
        let store = Arc::new(FailingStore {
            fail_commits: true,
            ..FailingStore::default()
        });
        let reducer = Reducer::new(store.clone(), metadata(0));

        let err = reducer
            .reduce(&event(1, 0, transfer(ZERO_ADDRESS, addr(A), 1)))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }
}
