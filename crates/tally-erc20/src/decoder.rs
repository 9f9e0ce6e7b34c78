//! ERC20 log decoder (Transfer, Mint, Burn)

use anyhow::Result;
use async_trait::async_trait;
use primitive_types::{H160, H256, U256};
use std::any::Any;
use tally::etl::{Decoder, Envelope, RawLog, TypeId, TypedBody};
use tally_common::{address_to_hex, topic_to_address, word_at, word_to_address, word_to_u256};

use crate::model::{EventPosition, Provenance};
use crate::reducer::{DecodedTokenEvent, TokenEvent};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: H256 = H256([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

/// keccak256("Mint(address,uint256)")
pub const MINT_TOPIC: H256 = H256([
    0x0f, 0x67, 0x98, 0xa5, 0x60, 0x79, 0x3a, 0x54, 0xc3, 0xbc, 0xfe, 0x86, 0xa9, 0x3c, 0xde, 0x1e,
    0x73, 0x08, 0x7d, 0x94, 0x4c, 0x0e, 0xa2, 0x05, 0x44, 0x13, 0x7d, 0x41, 0x21, 0x39, 0x68, 0x85,
]);

/// keccak256("Burn(address,uint256)")
pub const BURN_TOPIC: H256 = H256([
    0xcc, 0x16, 0xf5, 0xdb, 0xb4, 0x87, 0x32, 0x80, 0x81, 0x5c, 0x1e, 0xe0, 0x9d, 0xbd, 0x06, 0x73,
    0x6c, 0xff, 0xcc, 0x18, 0x44, 0x12, 0xcf, 0x7a, 0x71, 0xa0, 0xfd, 0xb7, 0x5d, 0x39, 0x7c, 0xa5,
]);

pub const TOKEN_EVENT_TYPE: &str = "erc20.token_event";

impl TypedBody for DecodedTokenEvent {
    fn envelope_type_id(&self) -> TypeId {
        TypeId::new(TOKEN_EVENT_TYPE)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// ERC20 event decoder
///
/// Each event comes in two layouts:
///
/// Standard (parties indexed):
/// - topics[0]: event signature
/// - topics[1..]: party addresses
/// - data[0]: amount
///
/// Legacy (nothing indexed):
/// - topics[0]: event signature
/// - data[..]: party addresses, then amount
///
/// Logs with the right signature but another shape are skipped, not errors.
/// A Transfer with 4 topics is an ERC721 transfer sharing the same signature.
pub struct Erc20Decoder;

impl Erc20Decoder {
    pub fn new() -> Self {
        Self
    }

    /// Transfer(from, to, value)
    ///
    /// - standard: 3 topics, 1 data word
    /// - legacy: 1 topic, 3 data words
    fn decode_transfer(log: &RawLog, data: &[u8]) -> Option<TokenEvent> {
        let (from, to, value) = match (log.topics.len(), data.len()) {
            (3, 32) => (
                topic_to_address(&log.topics[1])?,
                topic_to_address(&log.topics[2])?,
                word_to_u256(word_at(data, 0)?)?,
            ),
            (1, 96) => (
                word_to_address(word_at(data, 0)?)?,
                word_to_address(word_at(data, 1)?)?,
                word_to_u256(word_at(data, 2)?)?,
            ),
            _ => return None,
        };
        Some(TokenEvent::Transfer { from, to, value })
    }

    /// Mint(to, amount) and Burn(burner, value) share the same layout.
    ///
    /// - standard: 2 topics, 1 data word
    /// - legacy: 1 topic, 2 data words
    fn decode_party_amount(log: &RawLog, data: &[u8]) -> Option<(H160, U256)> {
        match (log.topics.len(), data.len()) {
            (2, 32) => Some((
                topic_to_address(&log.topics[1])?,
                word_to_u256(word_at(data, 0)?)?,
            )),
            (1, 64) => Some((
                word_to_address(word_at(data, 0)?)?,
                word_to_u256(word_at(data, 1)?)?,
            )),
            _ => None,
        }
    }

    fn skip(log: &RawLog, event: &str) {
        tracing::warn!(
            target: "tally_erc20::decoder",
            token = %address_to_hex(log.address),
            tx_hash = %format!("{:#x}", log.transaction_hash),
            log_index = log.log_index,
            topics = log.topics.len(),
            data_len = log.data.len(),
            "Malformed {} event, skipping",
            event
        );
    }
}

impl Default for Erc20Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Decoder for Erc20Decoder {
    fn decoder_name(&self) -> &str {
        "erc20"
    }

    async fn decode_log(&self, log: &RawLog) -> Result<Vec<Envelope>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(Vec::new());
        };

        let name = if *topic0 == TRANSFER_TOPIC {
            "Transfer"
        } else if *topic0 == MINT_TOPIC {
            "Mint"
        } else if *topic0 == BURN_TOPIC {
            "Burn"
        } else {
            return Ok(Vec::new());
        };

        if *topic0 == TRANSFER_TOPIC && log.topics.len() == 4 {
            tracing::trace!(
                target: "tally_erc20::decoder",
                token = %address_to_hex(log.address),
                "Skipping ERC721 Transfer"
            );
            return Ok(Vec::new());
        }

        let Ok(data) = log.data_bytes() else {
            Self::skip(log, name);
            return Ok(Vec::new());
        };

        let event = if *topic0 == TRANSFER_TOPIC {
            Self::decode_transfer(log, &data)
        } else if *topic0 == MINT_TOPIC {
            Self::decode_party_amount(log, &data).map(|(to, amount)| TokenEvent::Mint { to, amount })
        } else {
            Self::decode_party_amount(log, &data)
                .map(|(burner, value)| TokenEvent::Burn { burner, value })
        };

        let Some(event) = event else {
            Self::skip(log, name);
            return Ok(Vec::new());
        };

        let body = DecodedTokenEvent {
            contract: log.address,
            event,
            provenance: Provenance {
                block_number: log.block_number,
                timestamp: log.block_timestamp,
                transaction_hash: log.transaction_hash,
            },
            position: EventPosition::new(log.block_number, log.log_index),
        };

        let envelope_id = format!("erc20_{:#x}_{}", log.transaction_hash, log.log_index);
        Ok(vec![Envelope::new(
            envelope_id,
            Box::new(body),
            log.metadata(),
        )])
    }
}
