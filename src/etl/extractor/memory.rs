//! Extractor serving a fixed list of logs, used by tests and embedders.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{ExtractionBatch, Extractor};
use crate::etl::log::RawLog;

pub struct MemoryExtractor {
    logs: Vec<RawLog>,
    /// Index of the next log to hand out
    position: usize,
    batch_size: usize,
}

impl MemoryExtractor {
    pub fn new(logs: Vec<RawLog>, batch_size: usize) -> Self {
        Self {
            logs,
            position: 0,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl Extractor for MemoryExtractor {
    async fn extract(&mut self, cursor: Option<String>) -> Result<ExtractionBatch> {
        if let Some(cursor) = cursor {
            self.position = cursor
                .parse::<usize>()
                .with_context(|| format!("Invalid cursor '{cursor}'"))?
                .min(self.logs.len());
        }

        let end = (self.position + self.batch_size).min(self.logs.len());
        let logs = self.logs[self.position..end].to_vec();
        self.position = end;

        tracing::debug!(
            target: "tally::etl::memory_extractor",
            "Serving {} logs ({} remaining)",
            logs.len(),
            self.logs.len() - self.position
        );

        Ok(ExtractionBatch::from_logs(
            logs,
            Some(self.position.to_string()),
        ))
    }

    fn is_finished(&self) -> bool {
        self.position >= self.logs.len()
    }
}
