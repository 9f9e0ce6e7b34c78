//! ERC20 ledger for Tally
//!
//! Materializes token supply counters, per-account balances and a balance
//! history from ERC20 Transfer, Mint and Burn logs.
//!
//! # Components
//!
//! - [`Erc20Decoder`]: decodes Transfer, Mint and Burn logs (standard and legacy layouts)
//! - [`Reducer`]: classifies one event and applies it atomically
//! - [`TokenRegistry`]: creates tokens on first sight and owns their counters
//! - [`ledger`]: accounts and balances (balances may go negative)
//! - [`snapshot`]: append-only balance history
//! - [`Erc20Sink`]: feeds decoded envelopes to the reducer under an error policy
//! - [`MemoryStore`] / [`SqliteStore`]: entity storage
//! - [`api`]: HTTP query routes
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_common::MetadataFetcher;
//! use tally_erc20::{Erc20Decoder, Erc20Sink, SqliteStore};
//!
//! let store = Arc::new(SqliteStore::new("./erc20.db")?);
//! let metadata = Arc::new(MetadataFetcher::new("http://localhost:8545")?);
//! let sink = Erc20Sink::new(store, metadata);
//! let decoder = Arc::new(Erc20Decoder::new());
//! ```

pub mod api;
pub mod decoder;
pub mod error;
pub mod ledger;
pub mod model;
pub mod numeric;
pub mod reducer;
pub mod registry;
pub mod sink;
pub mod snapshot;
pub mod store;
pub mod unit_of_work;

pub use decoder::{Erc20Decoder, BURN_TOPIC, MINT_TOPIC, TOKEN_EVENT_TYPE, TRANSFER_TOPIC};
pub use error::{LedgerError, LedgerResult};
pub use model::{
    Account, AccountBalance, AccountBalanceSnapshot, EventPosition, Provenance, Token,
};
pub use numeric::to_decimal;
pub use reducer::{classify, DecodedTokenEvent, EventKind, EventOutcome, Reducer, TokenEvent};
pub use registry::TokenRegistry;
pub use sink::{Erc20Sink, SinkStats};
pub use store::{EntityStore, MemoryStore, SqliteStore, StoreStats, WriteSet};
pub use unit_of_work::UnitOfWork;
