//! Token metadata lookup for ERC20 contracts.
//!
//! Each of `name()`, `symbol()` and `decimals()` is an independent call that may
//! fail (revert, missing method, RPC error). Failures surface as
//! [`MetadataOutcome::Unavailable`] and the caller substitutes its default.

use anyhow::{Context, Result};
use async_trait::async_trait;
use primitive_types::{H160, U256};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::{word_at, word_to_u256, word_to_usize, WORD_SIZE};

/// `name()`
const NAME_SELECTOR: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
/// `symbol()`
const SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
/// `decimals()`
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

/// Result of a single metadata call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome<T> {
    Available(T),
    Unavailable,
}

impl<T> MetadataOutcome<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// The value, or `default` when the call failed.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Available(value) => value,
            Self::Unavailable => default,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable => None,
        }
    }
}

impl<T> From<Option<T>> for MetadataOutcome<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unavailable, Self::Available)
    }
}

/// Token metadata, `None` where the contract did not answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// A failable source of on-chain token metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn name(&self, contract: H160) -> MetadataOutcome<String>;

    async fn symbol(&self, contract: H160) -> MetadataOutcome<String>;

    async fn decimals(&self, contract: H160) -> MetadataOutcome<u8>;

    /// Fetch all three fields, each independently.
    async fn fetch_erc20_metadata(&self, contract: H160) -> TokenMetadata {
        TokenMetadata {
            name: self.name(contract).await.into_option(),
            symbol: self.symbol(contract).await.into_option(),
            decimals: self.decimals(contract).await.into_option(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<String>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Fetches token metadata with `eth_call` JSON-RPC requests.
pub struct MetadataFetcher {
    client: reqwest::Client,
    rpc_url: String,
    block_tag: String,
    next_id: AtomicU64,
}

impl MetadataFetcher {
    pub fn new(rpc_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            block_tag: "latest".to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Block tag or hex block number the calls are made against.
    pub fn with_block_tag(mut self, block_tag: impl Into<String>) -> Self {
        self.block_tag = block_tag.into();
        self
    }

    /// Performs `eth_call` and returns the raw return data.
    async fn call(&self, contract: H160, selector: [u8; 4]) -> Result<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_call",
            "params": [
                {
                    "to": format!("{contract:#x}"),
                    "data": format!("0x{}", hex::encode(selector)),
                },
                self.block_tag,
            ],
        });

        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .context("eth_call request failed")?
            .error_for_status()
            .context("eth_call returned an HTTP error")?
            .json()
            .await
            .context("Invalid JSON-RPC response")?;

        if let Some(error) = response.error {
            anyhow::bail!("eth_call error {}: {}", error.code, error.message);
        }

        let result = response
            .result
            .context("JSON-RPC response has neither result nor error")?;
        let raw = result.strip_prefix("0x").unwrap_or(&result);
        hex::decode(raw).context("eth_call result is not hex")
    }

    async fn fetch_string(&self, contract: H160, fn_name: &str, selector: [u8; 4]) -> MetadataOutcome<String> {
        match self.call(contract, selector).await {
            Ok(result) => {
                let decoded = decode_string_result(&result);
                if decoded.is_none() {
                    tracing::debug!(
                        target: "tally_common::metadata",
                        contract = %format!("{:#x}", contract),
                        fn_name = fn_name,
                        len = result.len(),
                        "Undecodable string result"
                    );
                }
                decoded.into()
            }
            Err(e) => {
                tracing::debug!(
                    target: "tally_common::metadata",
                    contract = %format!("{:#x}", contract),
                    fn_name = fn_name,
                    error = %e,
                    "Failed to fetch string"
                );
                MetadataOutcome::Unavailable
            }
        }
    }
}

#[async_trait]
impl MetadataSource for MetadataFetcher {
    async fn name(&self, contract: H160) -> MetadataOutcome<String> {
        self.fetch_string(contract, "name", NAME_SELECTOR).await
    }

    async fn symbol(&self, contract: H160) -> MetadataOutcome<String> {
        self.fetch_string(contract, "symbol", SYMBOL_SELECTOR).await
    }

    async fn decimals(&self, contract: H160) -> MetadataOutcome<u8> {
        match self.call(contract, DECIMALS_SELECTOR).await {
            Ok(result) => {
                let Some(value) = word_at(&result, 0).and_then(word_to_u256) else {
                    tracing::debug!(
                        target: "tally_common::metadata",
                        contract = %format!("{:#x}", contract),
                        len = result.len(),
                        "Empty decimals result"
                    );
                    return MetadataOutcome::Unavailable;
                };
                decode_decimals(value).map_or_else(
                    || {
                        tracing::warn!(
                            target: "tally_common::metadata",
                            contract = %format!("{:#x}", contract),
                            value = %value,
                            "Unexpected decimals value"
                        );
                        MetadataOutcome::Unavailable
                    },
                    MetadataOutcome::Available,
                )
            }
            Err(e) => {
                tracing::debug!(
                    target: "tally_common::metadata",
                    contract = %format!("{:#x}", contract),
                    error = %e,
                    "Failed to fetch decimals"
                );
                MetadataOutcome::Unavailable
            }
        }
    }
}

fn decode_decimals(value: U256) -> Option<u8> {
    if value > U256::from(u8::MAX) {
        return None;
    }
    Some(value.low_u32() as u8)
}

/// Decode a string result from a contract call.
///
/// Handles two return formats:
/// 1. **ABI `string`**: `[offset, ..., len, utf8 bytes padded to 32]`
/// 2. **`bytes32`** (older tokens such as MKR): the string left-aligned in one word,
///    right-padded with zeros
pub fn decode_string_result(result: &[u8]) -> Option<String> {
    if result.is_empty() {
        return None;
    }

    if let Some(s) = decode_abi_string(result) {
        return Some(s);
    }

    decode_bytes32_string(word_at(result, 0)?)
}

fn decode_abi_string(result: &[u8]) -> Option<String> {
    if result.len() < 2 * WORD_SIZE {
        return None;
    }
    let offset = word_to_usize(word_at(result, 0)?)?;
    let len_word = result.get(offset..offset.checked_add(WORD_SIZE)?)?;
    let len = word_to_usize(len_word)?;
    let start = offset + WORD_SIZE;
    let bytes = result.get(start..start.checked_add(len)?)?;

    match std::str::from_utf8(bytes) {
        Ok(s) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    }
}

fn decode_bytes32_string(word: &[u8]) -> Option<String> {
    let end = word.iter().position(|&b| b == 0).unwrap_or(word.len());
    match std::str::from_utf8(&word[..end]) {
        Ok(s) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    }
}

/// In-memory metadata, for offline runs and tests.
///
/// Contracts without an entry, and fields left `None`, are unavailable.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    tokens: HashMap<H160, TokenMetadata>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, contract: H160, metadata: TokenMetadata) -> Self {
        self.tokens.insert(contract, metadata);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn name(&self, contract: H160) -> MetadataOutcome<String> {
        self.tokens
            .get(&contract)
            .and_then(|m| m.name.clone())
            .into()
    }

    async fn symbol(&self, contract: H160) -> MetadataOutcome<String> {
        self.tokens
            .get(&contract)
            .and_then(|m| m.symbol.clone())
            .into()
    }

    async fn decimals(&self, contract: H160) -> MetadataOutcome<u8> {
        self.tokens.get(&contract).and_then(|m| m.decimals).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::Value;

    fn abi_string(s: &str) -> Vec<u8> {
        let mut out = vec![0u8; 64];
        out[31] = 0x20;
        out[63] = s.len() as u8;
        let mut body = s.as_bytes().to_vec();
        body.resize(s.len().div_ceil(32) * 32, 0);
        out.extend(body);
        out
    }

    fn bytes32_string(s: &str) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.resize(32, 0);
        out
    }

    #[test]
    fn test_decode_abi_string() {
        assert_eq!(
            decode_string_result(&abi_string("Wrapped Ether")),
            Some("Wrapped Ether".to_string())
        );
    }

    #[test]
    fn test_decode_long_abi_string() {
        let long = "A token name that does not fit in a single word";
        assert_eq!(decode_string_result(&abi_string(long)), Some(long.to_string()));
    }

    #[test]
    fn test_decode_bytes32() {
        assert_eq!(
            decode_string_result(&bytes32_string("MKR")),
            Some("MKR".to_string())
        );
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode_string_result(&[]), None);
        assert_eq!(decode_string_result(&[0u8; 32]), None);
    }

    #[test]
    fn test_decode_truncated_abi_string_falls_back() {
        let mut truncated = abi_string("USDC");
        truncated.truncate(64);
        // The offset word starts with zero bytes, so it is no bytes32 name either.
        assert_eq!(decode_string_result(&truncated), None);
    }

    #[test]
    fn test_decode_decimals() {
        assert_eq!(decode_decimals(U256::from(18)), Some(18));
        assert_eq!(decode_decimals(U256::from(255)), Some(255));
        assert_eq!(decode_decimals(U256::from(256)), None);
    }

    #[test]
    fn test_outcome_helpers() {
        assert_eq!(MetadataOutcome::Available(6u8).unwrap_or(0), 6);
        assert_eq!(MetadataOutcome::<u8>::Unavailable.unwrap_or(0), 0);
        assert_eq!(MetadataOutcome::from(Some(1u8)), MetadataOutcome::Available(1));
        assert!(!MetadataOutcome::<u8>::from(None).is_available());
    }

    #[tokio::test]
    async fn test_static_metadata() {
        let token = H160::from_low_u64_be(1);
        let source = StaticMetadata::new().with_token(
            token,
            TokenMetadata {
                name: Some("Dai".to_string()),
                symbol: None,
                decimals: Some(18),
            },
        );

        let metadata = source.fetch_erc20_metadata(token).await;
        assert_eq!(metadata.name.as_deref(), Some("Dai"));
        assert_eq!(metadata.symbol, None);
        assert_eq!(metadata.decimals, Some(18));

        let unknown = source.fetch_erc20_metadata(H160::from_low_u64_be(2)).await;
        assert_eq!(unknown, TokenMetadata::default());
    }

    /// JSON-RPC node answering `name()` with an ABI string, `symbol()` with
    /// bytes32 and reverting on `decimals()`.
    async fn spawn_node() -> String {
        async fn handler(Json(request): Json<Value>) -> Json<Value> {
            let id = request["id"].clone();
            let data = request["params"][0]["data"].as_str().unwrap_or_default();
            let result = match data {
                "0x06fdde03" => Some(abi_string("Test Token")),
                "0x95d89b41" => Some(bytes32_string("TST")),
                _ => None,
            };
            Json(match result {
                Some(bytes) => json!({"jsonrpc": "2.0", "id": id, "result": format!("0x{}", hex::encode(bytes))}),
                None => json!({"jsonrpc": "2.0", "id": id, "error": {"code": 3, "message": "execution reverted"}}),
            })
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(handler));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_fetcher_against_node() {
        let url = spawn_node().await;
        let fetcher = MetadataFetcher::new(url).unwrap();
        let token = H160::from_low_u64_be(0x42);

        assert_eq!(
            fetcher.name(token).await,
            MetadataOutcome::Available("Test Token".to_string())
        );
        assert_eq!(
            fetcher.symbol(token).await,
            MetadataOutcome::Available("TST".to_string())
        );
        assert_eq!(fetcher.decimals(token).await, MetadataOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_fetcher_unreachable_node() {
        let fetcher = MetadataFetcher::new("http://127.0.0.1:1/").unwrap();
        let metadata = fetcher
            .fetch_erc20_metadata(H160::from_low_u64_be(0x42))
            .await;
        assert_eq!(metadata, TokenMetadata::default());
    }
}
