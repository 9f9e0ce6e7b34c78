//! SQLite entity store
//!
//! Addresses and hashes are stored as lowercase `0x` hex TEXT, decimals as their
//! canonical string (exact, any precision). Snapshot sequence numbers come from
//! `AUTOINCREMENT`, so they never repeat even across restarts.

use bigdecimal::BigDecimal;
use primitive_types::{H160, H256};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tally_common::{address_to_hex, hash_to_hex, parse_address, parse_hash};

use super::{EntityStore, StoreStats, WriteSet};
use crate::error::{LedgerError, LedgerResult};
use crate::model::{
    Account, AccountBalance, AccountBalanceSnapshot, EventPosition, NewSnapshot, Provenance,
    Token,
};

const TOKEN_COLUMNS: &str = "address, name, symbol, decimals, total_supply, total_minted, \
    total_burned, total_transferred, event_count, mint_event_count, burn_event_count, \
    transfer_event_count";

const BALANCE_COLUMNS: &str = "account, token, balance, block_number, timestamp, tx_hash";

const SNAPSHOT_COLUMNS: &str = "sequence, account, token, balance, block_number, timestamp, tx_hash";

/// Entity store backed by a single SQLite database
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open the database (`:memory:` for a private in-memory database)
    pub fn new(db_path: &str) -> LedgerResult<Self> {
        let conn = Connection::open(db_path)?;

        // - WAL mode: readers (HTTP API) don't block the writer
        // - synchronous=NORMAL: safe with WAL
        // - busy_timeout: 5s wait for lock
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-64000;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;",
        )?;

        tracing::info!(target: "tally_erc20::storage", "SQLite configured: WAL mode, 64MB cache, NORMAL sync");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tokens (
                address TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                decimals INTEGER NOT NULL,
                total_supply TEXT NOT NULL,
                total_minted TEXT NOT NULL,
                total_burned TEXT NOT NULL,
                total_transferred TEXT NOT NULL,
                event_count INTEGER NOT NULL,
                mint_event_count INTEGER NOT NULL,
                burn_event_count INTEGER NOT NULL,
                transfer_event_count INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                address TEXT PRIMARY KEY
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                id TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                token TEXT NOT NULL,
                balance TEXT NOT NULL,
                block_number INTEGER,
                timestamp INTEGER,
                tx_hash TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_balances_account ON balances(account, token)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_balances_token ON balances(token)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                account TEXT NOT NULL,
                token TEXT NOT NULL,
                balance TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                tx_hash TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_pair_block ON snapshots(account, token, block_number DESC)",
            [],
        )?;

        // Single row: last committed event
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoint (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                block_number INTEGER NOT NULL,
                log_index INTEGER NOT NULL
            )",
            [],
        )?;

        tracing::info!(target: "tally_erc20::storage", db_path = %db_path, "Database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }
}

fn conversion_error(
    idx: usize,
    err: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err)
}

fn address_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<H160> {
    let raw: String = row.get(idx)?;
    parse_address(&raw).map_err(|e| conversion_error(idx, e.into()))
}

fn hash_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<H256> {
    let raw: String = row.get(idx)?;
    parse_hash(&raw).map_err(|e| conversion_error(idx, e.into()))
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<BigDecimal> {
    let raw: String = row.get(idx)?;
    BigDecimal::from_str(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn u64_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    Ok(value as u64)
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        address: address_col(row, 0)?,
        name: row.get(1)?,
        symbol: row.get(2)?,
        decimals: u64_col(row, 3)? as u8,
        total_supply: decimal_col(row, 4)?,
        total_minted: decimal_col(row, 5)?,
        total_burned: decimal_col(row, 6)?,
        total_transferred: decimal_col(row, 7)?,
        event_count: u64_col(row, 8)?,
        mint_event_count: u64_col(row, 9)?,
        burn_event_count: u64_col(row, 10)?,
        transfer_event_count: u64_col(row, 11)?,
    })
}

fn balance_from_row(row: &Row<'_>) -> rusqlite::Result<AccountBalance> {
    let block_number: Option<i64> = row.get(3)?;
    let last_modified = match block_number {
        Some(block_number) => Some(Provenance {
            block_number: block_number as u64,
            timestamp: u64_col(row, 4)?,
            transaction_hash: hash_col(row, 5)?,
        }),
        None => None,
    };

    Ok(AccountBalance {
        account: address_col(row, 0)?,
        token: address_col(row, 1)?,
        balance: decimal_col(row, 2)?,
        last_modified,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<AccountBalanceSnapshot> {
    let sequence = u64_col(row, 0)?;
    let account = address_col(row, 1)?;
    let token = address_col(row, 2)?;
    let snapshot = NewSnapshot {
        account,
        token,
        balance: decimal_col(row, 3)?,
        provenance: Provenance {
            block_number: u64_col(row, 4)?,
            timestamp: u64_col(row, 5)?,
            transaction_hash: hash_col(row, 6)?,
        },
    };
    Ok(snapshot.into_snapshot(sequence))
}

impl EntityStore for SqliteStore {
    fn load_token(&self, address: H160) -> LedgerResult<Option<Token>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE address = ?1"))?;
        let token = stmt
            .query_row(params![address_to_hex(address)], token_from_row)
            .optional()?;
        Ok(token)
    }

    fn load_account(&self, address: H160) -> LedgerResult<Option<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT address FROM accounts WHERE address = ?1")?;
        let account = stmt
            .query_row(params![address_to_hex(address)], |row| {
                Ok(Account::new(address_col(row, 0)?))
            })
            .optional()?;
        Ok(account)
    }

    fn load_balance(&self, account: H160, token: H160) -> LedgerResult<Option<AccountBalance>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances WHERE account = ?1 AND token = ?2"
        ))?;
        let balance = stmt
            .query_row(
                params![address_to_hex(account), address_to_hex(token)],
                balance_from_row,
            )
            .optional()?;
        Ok(balance)
    }

    fn checkpoint(&self) -> LedgerResult<Option<EventPosition>> {
        let conn = self.lock()?;
        let position = conn
            .query_row(
                "SELECT block_number, log_index FROM checkpoint WHERE id = 0",
                [],
                |row| Ok(EventPosition::new(u64_col(row, 0)?, u64_col(row, 1)?)),
            )
            .optional()?;
        Ok(position)
    }

    /// One transaction per commit: either every row lands or none does.
    fn commit(&self, writes: WriteSet) -> LedgerResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        {
            let mut token_stmt = tx.prepare_cached(&format!(
                "INSERT INTO tokens ({TOKEN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(address) DO UPDATE SET
                    name = excluded.name,
                    symbol = excluded.symbol,
                    decimals = excluded.decimals,
                    total_supply = excluded.total_supply,
                    total_minted = excluded.total_minted,
                    total_burned = excluded.total_burned,
                    total_transferred = excluded.total_transferred,
                    event_count = excluded.event_count,
                    mint_event_count = excluded.mint_event_count,
                    burn_event_count = excluded.burn_event_count,
                    transfer_event_count = excluded.transfer_event_count"
            ))?;
            for token in &writes.tokens {
                token_stmt.execute(params![
                    address_to_hex(token.address),
                    token.name,
                    token.symbol,
                    i64::from(token.decimals),
                    token.total_supply.to_string(),
                    token.total_minted.to_string(),
                    token.total_burned.to_string(),
                    token.total_transferred.to_string(),
                    token.event_count as i64,
                    token.mint_event_count as i64,
                    token.burn_event_count as i64,
                    token.transfer_event_count as i64,
                ])?;
            }

            let mut account_stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO accounts (address) VALUES (?1)")?;
            for account in &writes.accounts {
                account_stmt.execute(params![address_to_hex(account.address)])?;
            }

            let mut balance_stmt = tx.prepare_cached(
                "INSERT INTO balances (id, account, token, balance, block_number, timestamp, tx_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    balance = excluded.balance,
                    block_number = excluded.block_number,
                    timestamp = excluded.timestamp,
                    tx_hash = excluded.tx_hash",
            )?;
            for balance in &writes.balances {
                let provenance = balance.last_modified;
                balance_stmt.execute(params![
                    balance.id(),
                    address_to_hex(balance.account),
                    address_to_hex(balance.token),
                    balance.balance.to_string(),
                    provenance.map(|p| p.block_number as i64),
                    provenance.map(|p| p.timestamp as i64),
                    provenance.map(|p| hash_to_hex(p.transaction_hash)),
                ])?;
            }

            let mut snapshot_stmt = tx.prepare_cached(
                "INSERT INTO snapshots (account, token, balance, block_number, timestamp, tx_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for snapshot in &writes.snapshots {
                snapshot_stmt.execute(params![
                    address_to_hex(snapshot.account),
                    address_to_hex(snapshot.token),
                    snapshot.balance.to_string(),
                    snapshot.provenance.block_number as i64,
                    snapshot.provenance.timestamp as i64,
                    hash_to_hex(snapshot.provenance.transaction_hash),
                ])?;
            }

            if let Some(position) = writes.checkpoint {
                tx.execute(
                    "INSERT INTO checkpoint (id, block_number, log_index) VALUES (0, ?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET
                        block_number = excluded.block_number,
                        log_index = excluded.log_index",
                    params![position.block_number as i64, position.log_index as i64],
                )?;
            }
        }

        tx.commit()?;

        tracing::trace!(
            target: "tally_erc20::storage",
            tokens = writes.tokens.len(),
            balances = writes.balances.len(),
            snapshots = writes.snapshots.len(),
            "Committed write set"
        );

        Ok(())
    }

    fn tokens(&self) -> LedgerResult<Vec<Token>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY address"))?;
        let tokens = stmt
            .query_map([], token_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tokens)
    }

    fn balances_of(&self, account: H160) -> LedgerResult<Vec<AccountBalance>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances WHERE account = ?1 ORDER BY token"
        ))?;
        let balances = stmt
            .query_map(params![address_to_hex(account)], balance_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(balances)
    }

    fn snapshots(&self, account: H160, token: H160) -> LedgerResult<Vec<AccountBalanceSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE account = ?1 AND token = ?2
             ORDER BY sequence"
        ))?;
        let snapshots = stmt
            .query_map(
                params![address_to_hex(account), address_to_hex(token)],
                snapshot_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    fn balance_at(
        &self,
        account: H160,
        token: H160,
        block: u64,
    ) -> LedgerResult<Option<AccountBalanceSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE account = ?1 AND token = ?2 AND block_number <= ?3
             ORDER BY sequence DESC
             LIMIT 1"
        ))?;
        let snapshot = stmt
            .query_row(
                params![address_to_hex(account), address_to_hex(token), block as i64],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn negative_balances(&self, token: H160) -> LedgerResult<Vec<AccountBalance>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances
             WHERE token = ?1 AND balance LIKE '-%'
             ORDER BY account"
        ))?;
        let balances = stmt
            .query_map(params![address_to_hex(token)], balance_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(balances)
    }

    fn stats(&self) -> LedgerResult<StoreStats> {
        let count = |conn: &Connection, table: &str| -> LedgerResult<u64> {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(count as u64)
        };

        let checkpoint = self.checkpoint()?;
        let conn = self.lock()?;
        Ok(StoreStats {
            tokens: count(&conn, "tokens")?,
            accounts: count(&conn, "accounts")?,
            balances: count(&conn, "balances")?,
            snapshots: count(&conn, "snapshots")?,
            checkpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn addr(n: u64) -> H160 {
        H160::from_low_u64_be(n)
    }

    fn provenance(block_number: u64) -> Provenance {
        Provenance {
            block_number,
            timestamp: 1_700_000_000 + block_number,
            transaction_hash: H256::from_low_u64_be(block_number),
        }
    }

    fn sample_writes() -> WriteSet {
        let mut token = Token::new(addr(10));
        token.name = "Test".to_string();
        token.symbol = "TST".to_string();
        token.decimals = 18;
        token.total_supply = BigDecimal::from_str("1.5").unwrap();
        token.total_minted = BigDecimal::from_str("1.5").unwrap();
        token.event_count = 1;
        token.mint_event_count = 1;

        let mut balance = AccountBalance::new(addr(1), addr(10));
        balance.balance = BigDecimal::from_str("1.500000000000000000").unwrap();
        balance.last_modified = Some(provenance(5));

        WriteSet {
            tokens: vec![token],
            accounts: vec![Account::new(addr(1))],
            balances: vec![balance.clone()],
            snapshots: vec![NewSnapshot {
                account: addr(1),
                token: addr(10),
                balance: balance.balance.clone(),
                provenance: provenance(5),
            }],
            checkpoint: Some(EventPosition::new(5, 2)),
        }
    }

    #[test]
    fn test_round_trip() {
        let store = SqliteStore::new(":memory:").unwrap();
        let writes = sample_writes();
        store.commit(writes.clone()).unwrap();

        assert_eq!(store.load_token(addr(10)).unwrap(), Some(writes.tokens[0].clone()));
        assert_eq!(store.load_account(addr(1)).unwrap(), Some(Account::new(addr(1))));
        assert_eq!(
            store.load_balance(addr(1), addr(10)).unwrap(),
            Some(writes.balances[0].clone())
        );
        assert_eq!(store.checkpoint().unwrap(), Some(EventPosition::new(5, 2)));
        assert!(store.load_token(addr(11)).unwrap().is_none());

        let stats = store.stats().unwrap();
        assert_eq!(stats.tokens, 1);
        assert_eq!(stats.accounts, 1);
        assert_eq!(stats.balances, 1);
        assert_eq!(stats.snapshots, 1);
    }

    #[test]
    fn test_upsert_and_point_in_time() {
        let store = SqliteStore::new(":memory:").unwrap();
        store.commit(sample_writes()).unwrap();

        let mut balance = AccountBalance::new(addr(1), addr(10));
        balance.balance = BigDecimal::from(-2);
        balance.last_modified = Some(provenance(9));
        store
            .commit(WriteSet {
                balances: vec![balance.clone()],
                snapshots: vec![NewSnapshot {
                    account: addr(1),
                    token: addr(10),
                    balance: BigDecimal::from(-2),
                    provenance: provenance(9),
                }],
                checkpoint: Some(EventPosition::new(9, 0)),
                ..WriteSet::default()
            })
            .unwrap();

        assert_eq!(store.load_balance(addr(1), addr(10)).unwrap(), Some(balance.clone()));
        assert_eq!(store.balances_of(addr(1)).unwrap().len(), 1);
        assert_eq!(store.negative_balances(addr(10)).unwrap(), vec![balance.clone()]);

        assert!(store.balance_at(addr(1), addr(10), 4).unwrap().is_none());
        let at_eight = store.balance_at(addr(1), addr(10), 8).unwrap().unwrap();
        assert_eq!(at_eight.balance, BigDecimal::from_str("1.5").unwrap());
        let at_nine = store.balance_at(addr(1), addr(10), 9).unwrap().unwrap();
        assert_eq!(at_nine.balance, BigDecimal::from(-2));
        assert!(at_nine.sequence > at_eight.sequence);

        let snapshots = store.snapshots(addr(1), addr(10)).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].account_balance, balance.id());
        assert!(snapshots[1].id.ends_with(&format!("-{}", snapshots[1].sequence)));
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::new(path).unwrap();
            store.commit(sample_writes()).unwrap();
        }

        let store = SqliteStore::new(path).unwrap();
        assert_eq!(store.tokens().unwrap().len(), 1);
        assert_eq!(store.checkpoint().unwrap(), Some(EventPosition::new(5, 2)));
    }
}
