//! Configuration for the ERC20 ledger indexer

use anyhow::Result;
use clap::Parser;
use tally::etl::ContractFilter;
use tally::ErrorPolicy;
use tally_common::parse_address;

/// ERC20 ledger indexer
///
/// Replays ERC20 Transfer, Mint and Burn logs into token supply counters,
/// account balances and a balance history.
#[derive(Parser, Debug)]
#[command(name = "tally-erc20")]
#[command(about = "Materialize ERC20 supply and balances from chain logs", long_about = None)]
pub struct Config {
    /// JSON-lines file with one raw log per line, in chain order
    #[arg(long)]
    pub input: String,

    /// Database path (`:memory:` for an in-memory database)
    #[arg(long, default_value = "./erc20-ledger.db")]
    pub db_path: String,

    /// Ethereum JSON-RPC URL used for token metadata (name, symbol, decimals)
    #[arg(long, env = "ETH_RPC_URL", default_value = "http://localhost:8545")]
    pub rpc_url: String,

    /// Do not query token metadata; every token gets the defaults
    #[arg(long)]
    pub offline: bool,

    /// Logs per batch
    #[arg(long, default_value = "500")]
    pub batch_size: usize,

    /// What to do when an event cannot be applied (halt or skip)
    #[arg(long, default_value = "halt")]
    pub on_error: ErrorPolicy,

    /// Host for the HTTP API
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP API
    #[arg(long, default_value = "3000")]
    pub port: u16,

    /// Keep serving the HTTP API after the input is drained
    #[arg(long)]
    pub serve: bool,

    /// Only index these token contracts (comma-separated hex addresses)
    ///
    /// Example: --contracts 0x123...,0x456...
    #[arg(long, value_delimiter = ',')]
    pub contracts: Vec<String>,
}

impl Config {
    /// Allow-list built from `--contracts`, empty when none were given.
    pub fn contract_filter(&self) -> Result<ContractFilter> {
        let contracts = self
            .contracts
            .iter()
            .map(|s| parse_address(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(ContractFilter::new().allow_contracts(contracts))
    }
}
