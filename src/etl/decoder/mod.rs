pub mod context;

use async_trait::async_trait;
use primitive_types::H160;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use super::envelope::Envelope;
use super::log::RawLog;

pub use context::DecoderContext;

/// Decoder transforms raw logs into typed envelopes
///
/// # Design
/// Decoders are responsible for:
/// - Examining raw logs.
/// - Filtering the logs they recognise (by topic signature and layout).
/// - Creating typed `Envelope` wrappers with specific `TypeId`s.
/// - Skipping logs they don't recognise.
///
/// Anything a sink needs from the original log (block number, transaction hash, emitting
/// contract) belongs in the envelope body or metadata. Sinks never walk `batch.logs`.
///
/// # Example
///
/// ```rust,ignore
/// use tally::etl::decoder::Decoder;
/// use tally::etl::envelope::Envelope;
/// use tally::etl::log::RawLog;
///
/// pub struct MyDecoder;
///
/// #[async_trait::async_trait]
/// impl Decoder for MyDecoder {
///     fn decoder_name(&self) -> &str {
///         "my_decoder"
///     }
///
///     async fn decode_log(&self, log: &RawLog) -> anyhow::Result<Vec<Envelope>> {
///         let body = MyEvent { /* decoded fields */ };
///         Ok(vec![Envelope::new(id, Box::new(body), log.metadata())])
///     }
/// }
/// ```
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Returns the unique name of this decoder
    ///
    /// Hashed into a `DecoderId`, so it must be unique and stable.
    fn decoder_name(&self) -> &str;

    /// Decode a single log into typed envelopes
    ///
    /// Returns an empty Vec if the decoder is not interested in this log.
    async fn decode_log(&self, log: &RawLog) -> anyhow::Result<Vec<Envelope>>;

    /// Decode multiple logs into typed envelopes, preserving input order.
    async fn decode(&self, logs: &[RawLog]) -> anyhow::Result<Vec<Envelope>> {
        let mut all_envelopes = Vec::new();
        for log in logs {
            let envelopes = self.decode_log(log).await?;
            all_envelopes.extend(envelopes);
        }
        Ok(all_envelopes)
    }
}

/// Decoder identifier based on decoder name hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderId(u64);

impl DecoderId {
    /// Creates a DecoderId from a decoder name (deterministic)
    pub fn new(name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        DecoderId(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Contract filtering strategy (allow-list + blacklist)
///
/// 1. **Allow-list**: when non-empty, only these contracts reach the decoders.
/// 2. **Blacklist**: contracts discarded before any decoder logic.
///
/// An empty filter lets every contract through.
///
/// # Example
///
/// ```rust,ignore
/// let filter = ContractFilter::new()
///     .allow_contract(usdc)
///     .blacklist_contract(noisy);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub allowed: HashSet<H160>,

    pub blacklist: HashSet<H160>,
}

impl ContractFilter {
    /// Create empty filter (process all contracts)
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a contract should be processed
    pub fn allows(&self, contract: H160) -> bool {
        if self.blacklist.contains(&contract) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(&contract)
    }

    /// Validate configuration (no contract both allowed and blacklisted)
    pub fn validate(&self) -> anyhow::Result<()> {
        for addr in &self.allowed {
            if self.blacklist.contains(addr) {
                anyhow::bail!(
                    "Contract {:#x} appears in both allow-list and blacklist",
                    addr
                );
            }
        }
        Ok(())
    }

    pub fn allow_contract(mut self, contract: H160) -> Self {
        self.allowed.insert(contract);
        self
    }

    pub fn allow_contracts(mut self, contracts: impl IntoIterator<Item = H160>) -> Self {
        self.allowed.extend(contracts);
        self
    }

    pub fn blacklist_contract(mut self, contract: H160) -> Self {
        self.blacklist.insert(contract);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.blacklist.is_empty()
    }
}
