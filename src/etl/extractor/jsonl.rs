//! Extractor reading raw logs from a JSON-lines file.
//!
//! One `RawLog` object per line, in chain order. Blank lines are ignored.
//! The cursor is the number of lines consumed so far.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::{ExtractionBatch, Extractor};
use crate::etl::log::RawLog;

pub struct JsonLinesExtractor {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    /// Lines consumed so far (1-based number of the last line read)
    line_number: usize,
    batch_size: usize,
    finished: bool,
}

impl JsonLinesExtractor {
    pub async fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        tracing::info!(
            target: "tally::etl::jsonl_extractor",
            path = %path.display(),
            batch_size,
            "Opened JSON-lines log source"
        );

        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_number: 0,
            batch_size: batch_size.max(1),
            finished: false,
        })
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        let line = self
            .lines
            .next_line()
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        match line {
            Some(line) => {
                self.line_number += 1;
                Ok(Some(line))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Fast-forwards to the line recorded in `cursor`.
    async fn seek(&mut self, cursor: &str) -> Result<()> {
        let target: usize = cursor
            .parse()
            .with_context(|| format!("Invalid cursor '{cursor}'"))?;
        if target < self.line_number {
            anyhow::bail!(
                "Cursor {} is behind the current position {} of {}",
                target,
                self.line_number,
                self.path.display()
            );
        }
        while self.line_number < target {
            if self.next_line().await?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Extractor for JsonLinesExtractor {
    async fn extract(&mut self, cursor: Option<String>) -> Result<ExtractionBatch> {
        if let Some(cursor) = cursor.as_deref() {
            self.seek(cursor).await?;
        }

        let mut logs = Vec::with_capacity(self.batch_size);
        while logs.len() < self.batch_size {
            let Some(line) = self.next_line().await? else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let log: RawLog = serde_json::from_str(trimmed).with_context(|| {
                format!(
                    "Malformed log at {}:{}",
                    self.path.display(),
                    self.line_number
                )
            })?;
            logs.push(log);
        }

        tracing::debug!(
            target: "tally::etl::jsonl_extractor",
            count = logs.len(),
            line = self.line_number,
            finished = self.finished,
            "Extracted log batch"
        );

        Ok(ExtractionBatch::from_logs(
            logs,
            Some(self.line_number.to_string()),
        ))
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn line(block: u64, index: u64) -> String {
        format!(
            r#"{{"address":"0x00000000000000000000000000000000000000aa","topics":[],"data":"0x","blockNumber":{block},"blockTimestamp":{ts},"transactionHash":"0x00000000000000000000000000000000000000000000000000000000000000ab","logIndex":{index}}}"#,
            ts = 1_700_000_000 + block
        )
    }

    fn fixture(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for l in lines {
            writeln!(file, "{l}").unwrap();
        }
        file
    }

    #[tokio::test]
    async fn test_reads_in_batches() {
        let file = fixture(&[line(1, 0), String::new(), line(1, 1), line(2, 0)]);
        let mut extractor = JsonLinesExtractor::open(file.path(), 2).await.unwrap();

        let first = extractor.extract(None).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.blocks.len(), 1);
        assert_eq!(first.cursor.as_deref(), Some("3"));
        assert!(!extractor.is_finished());

        let second = extractor.extract(None).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.logs[0].block_number, 2);
        assert!(extractor.is_finished());
    }

    #[tokio::test]
    async fn test_resume_from_cursor() {
        let file = fixture(&[line(1, 0), line(2, 0), line(3, 0)]);
        let mut extractor = JsonLinesExtractor::open(file.path(), 10).await.unwrap();

        let batch = extractor.extract(Some("2".to_string())).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.logs[0].block_number, 3);
    }

    #[tokio::test]
    async fn test_malformed_line_is_an_error() {
        let file = fixture(&[line(1, 0), "{not json".to_string()]);
        let mut extractor = JsonLinesExtractor::open(file.path(), 10).await.unwrap();

        let err = extractor.extract(None).await.unwrap_err();
        assert!(format!("{err:#}").contains(":2"));
    }
}
