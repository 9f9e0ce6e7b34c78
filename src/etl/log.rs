//! Raw EVM log as delivered by the event source.

use std::collections::HashMap;

use anyhow::{Context, Result};
use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};

/// A single undecoded log record.
///
/// Field names follow the `eth_getLogs` JSON shape, with the block timestamp
/// inlined so downstream sinks never need a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Emitting contract
    pub address: H160,
    pub topics: Vec<H256>,
    /// Hex encoded, `0x` prefix optional
    #[serde(default)]
    pub data: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl RawLog {
    /// Decodes the hex `data` field.
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        let raw = self.data.strip_prefix("0x").unwrap_or(&self.data);
        hex::decode(raw).with_context(|| {
            format!(
                "Invalid log data in tx {:#x} (log index {})",
                self.transaction_hash, self.log_index
            )
        })
    }

    /// Position of this log in chain order.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    /// Metadata map attached to decoded envelopes.
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("address".to_string(), format!("{:#x}", self.address));
        metadata.insert(
            "tx_hash".to_string(),
            format!("{:#x}", self.transaction_hash),
        );
        metadata.insert("block_number".to_string(), self.block_number.to_string());
        metadata.insert("log_index".to_string(), self.log_index.to_string());
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_log_line() {
        let line = r#"{
            "address": "0x00000000000000000000000000000000000000aa",
            "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
            "data": "0x01ff",
            "blockNumber": 12,
            "blockTimestamp": 1700000000,
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000ab",
            "logIndex": 3
        }"#;

        let log: RawLog = serde_json::from_str(line).unwrap();
        assert_eq!(log.address, H160::from_low_u64_be(0xaa));
        assert_eq!(log.topics.len(), 1);
        assert_eq!(log.data_bytes().unwrap(), vec![0x01, 0xff]);
        assert_eq!(log.position(), (12, 3));
        assert_eq!(log.metadata()["block_number"], "12");
    }

    #[test]
    fn test_invalid_data_is_an_error() {
        let log = RawLog {
            address: H160::zero(),
            topics: vec![],
            data: "0xzz".to_string(),
            block_number: 1,
            block_timestamp: 1,
            transaction_hash: H256::zero(),
            log_index: 0,
        };
        assert!(log.data_bytes().is_err());
    }
}
