//! Extractor trait for fetching raw logs from various sources

pub mod jsonl;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::etl::log::RawLog;

pub use jsonl::JsonLinesExtractor;
pub use memory::MemoryExtractor;

/// Block context information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
}

/// Extraction batch with logs and their deduplicated block context
///
/// Multiple logs from the same block share a single `BlockContext`:
/// ```rust,ignore
/// let block = &batch.blocks[&block_number];
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExtractionBatch {
    /// Logs in chain order
    pub logs: Vec<RawLog>,

    /// Block context (deduplicated by block_number)
    pub blocks: HashMap<u64, BlockContext>,

    /// Opaque cursor for resuming after this batch
    pub cursor: Option<String>,
}

impl ExtractionBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a batch, collecting block context from the logs themselves.
    pub fn from_logs(logs: Vec<RawLog>, cursor: Option<String>) -> Self {
        let mut blocks = HashMap::new();
        for log in &logs {
            blocks
                .entry(log.block_number)
                .or_insert_with(|| BlockContext {
                    number: log.block_number,
                    timestamp: log.block_timestamp,
                });
        }
        Self {
            logs,
            blocks,
            cursor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }
}

/// Extractor trait for fetching log batches
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract the next batch of logs
    ///
    /// The cursor is an opaque string that allows resuming from a previous extraction.
    /// - None: continue from the extractor's internal state
    /// - Some(cursor): resume from the given cursor
    ///
    /// # Return Value Semantics
    ///
    /// - Non-empty batch: process logs, call `extract()` again
    /// - Empty batch + `is_finished() = false`: source has nothing yet, sleep and retry
    /// - Empty batch + `is_finished() = true`: source exhausted, stop calling
    async fn extract(&mut self, cursor: Option<String>) -> Result<ExtractionBatch>;

    /// Returns `true` once the extractor will not produce more data.
    fn is_finished(&self) -> bool;
}
