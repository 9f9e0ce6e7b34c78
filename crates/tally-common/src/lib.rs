//! Common utilities for Tally token indexers
//!
//! Conversions between EVM wire types (32-byte ABI words, log topics) and the
//! `primitive-types` values the indexers work with, plus token metadata lookup.

pub mod metadata;

use anyhow::{Context, Result};
use primitive_types::{H160, H256, U256};

pub use metadata::{
    MetadataFetcher, MetadataOutcome, MetadataSource, StaticMetadata, TokenMetadata,
};

/// The null address, used as counterparty for mints and burns.
pub const ZERO_ADDRESS: H160 = H160([0u8; 20]);

/// Size of an ABI-encoded word.
pub const WORD_SIZE: usize = 32;

// ===== Hex rendering =====

/// Lowercase, `0x`-prefixed, full width (40 hex digits).
pub fn address_to_hex(address: H160) -> String {
    format!("{address:#x}")
}

pub fn hash_to_hex(hash: H256) -> String {
    format!("{hash:#x}")
}

/// Parse a 20-byte address, with or without `0x` prefix.
pub fn parse_address(s: &str) -> Result<H160> {
    let raw = s.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).with_context(|| format!("Invalid address '{s}'"))?;
    if bytes.len() != 20 {
        anyhow::bail!("Invalid address '{}': expected 20 bytes, got {}", s, bytes.len());
    }
    Ok(H160::from_slice(&bytes))
}

/// Parse a 32-byte hash, with or without `0x` prefix.
pub fn parse_hash(s: &str) -> Result<H256> {
    let raw = s.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).with_context(|| format!("Invalid hash '{s}'"))?;
    if bytes.len() != 32 {
        anyhow::bail!("Invalid hash '{}': expected 32 bytes, got {}", s, bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

// ===== ABI words =====

/// Address stored in an indexed topic (left-padded to 32 bytes).
///
/// Returns None when the padding is not zero, which means the topic does not
/// hold an address.
pub fn topic_to_address(topic: &H256) -> Option<H160> {
    word_to_address(topic.as_bytes())
}

/// Address stored in a 32-byte ABI word.
pub fn word_to_address(word: &[u8]) -> Option<H160> {
    if word.len() != WORD_SIZE || word[..12].iter().any(|&b| b != 0) {
        return None;
    }
    Some(H160::from_slice(&word[12..]))
}

/// Unsigned integer stored in a 32-byte ABI word.
pub fn word_to_u256(word: &[u8]) -> Option<U256> {
    if word.len() != WORD_SIZE {
        return None;
    }
    Some(U256::from_big_endian(word))
}

/// Word `index` of ABI-encoded `data`.
pub fn word_at(data: &[u8], index: usize) -> Option<&[u8]> {
    let start = index.checked_mul(WORD_SIZE)?;
    data.get(start..start + WORD_SIZE)
}

/// Small unsigned integer (offsets, lengths) stored in a 32-byte ABI word.
pub fn word_to_usize(word: &[u8]) -> Option<usize> {
    if word.len() != WORD_SIZE || word[..24].iter().any(|&b| b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(tail)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_is_full_width() {
        assert_eq!(
            address_to_hex(ZERO_ADDRESS),
            "0x0000000000000000000000000000000000000000"
        );
        assert_eq!(
            address_to_hex(H160::from_low_u64_be(0xabc)),
            "0x0000000000000000000000000000000000000abc"
        );
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address("0x00000000000000000000000000000000000000AB").unwrap();
        assert_eq!(addr, H160::from_low_u64_be(0xab));
        assert_eq!(
            parse_address("00000000000000000000000000000000000000ab").unwrap(),
            addr
        );
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn test_parse_hash() {
        let hash = H256::from_low_u64_be(0xab);
        assert_eq!(parse_hash(&hash_to_hex(hash)).unwrap(), hash);
        assert!(parse_hash("0xab").is_err());
    }

    #[test]
    fn test_topic_to_address() {
        let addr = H160::from_low_u64_be(0xdead);
        let topic = H256::from(addr);
        assert_eq!(topic_to_address(&topic), Some(addr));

        let not_an_address = H256::repeat_byte(0xff);
        assert_eq!(topic_to_address(&not_an_address), None);
    }

    #[test]
    fn test_words() {
        let mut data = vec![0u8; 64];
        data[31] = 7;
        data[63] = 0x40;

        assert_eq!(word_at(&data, 0).and_then(word_to_u256), Some(U256::from(7)));
        assert_eq!(word_at(&data, 1).and_then(word_to_usize), Some(64));
        assert_eq!(word_at(&data, 2), None);
    }
}
