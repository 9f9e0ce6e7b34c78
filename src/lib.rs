//! Tally - sequential ETL core for materializing ledgers from chain logs.
//!
//! Logs flow through three stages: an [`Extractor`] produces batches of raw logs,
//! the [`DecoderContext`] turns them into typed envelopes and the sinks apply them.
//! Batches are handled one at a time, in order, so a sink always observes the state
//! left by every earlier log.

pub mod etl;
pub mod http;

// Re-export commonly used types for sink authors
pub use async_trait::async_trait;
pub use axum;
pub use tokio;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio_util::sync::CancellationToken;

use etl::decoder::ContractFilter;
use etl::extractor::Extractor;
use etl::sink::Sink;
use etl::{Decoder, DecoderContext, MultiSink};
use http::create_http_router;

/// What to do when a batch (or an event inside it) fails to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop and surface the error. The cursor is not advanced.
    #[default]
    Halt,
    /// Log the error and move on.
    Skip,
}

impl FromStr for ErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "halt" => Ok(Self::Halt),
            "skip" => Ok(Self::Skip),
            other => anyhow::bail!("Unknown error policy '{other}' (expected halt or skip)"),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt => f.write_str("halt"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

/// Live pipeline counters, shared with the HTTP health endpoint.
#[derive(Debug, Default)]
pub struct PipelineProgress {
    logs: AtomicU64,
    envelopes: AtomicU64,
    last_block: AtomicU64,
    failed_batches: AtomicU64,
    finished: AtomicBool,
}

impl PipelineProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_batch(&self, logs: usize, envelopes: usize, last_block: Option<u64>) {
        self.logs.fetch_add(logs as u64, Ordering::Relaxed);
        self.envelopes.fetch_add(envelopes as u64, Ordering::Relaxed);
        if let Some(block) = last_block {
            self.last_block.fetch_max(block, Ordering::Relaxed);
        }
    }

    pub fn logs(&self) -> u64 {
        self.logs.load(Ordering::Relaxed)
    }

    pub fn envelopes(&self) -> u64 {
        self.envelopes.load(Ordering::Relaxed)
    }

    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::Relaxed)
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Summary returned when the pipeline stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches: u64,
    pub logs: u64,
    pub envelopes: u64,
    pub failed_batches: u64,
    /// Cursor after the last batch that was fully handled
    pub cursor: Option<String>,
}

/// Configuration for the pipeline with pluggable extractor, decoders and sinks.
pub struct TallyConfig {
    pub extractor: Box<dyn Extractor>,
    pub decoders: Vec<Arc<dyn Decoder>>,
    pub sinks: Vec<Arc<dyn Sink>>,
    pub contract_filter: ContractFilter,
    pub error_policy: ErrorPolicy,
    /// Wait between polls when the extractor has nothing yet
    pub poll_interval: Duration,
    /// Cursor to resume from
    pub start_cursor: Option<String>,
}

impl TallyConfig {
    pub fn builder(extractor: Box<dyn Extractor>) -> TallyConfigBuilder {
        TallyConfigBuilder {
            extractor,
            decoders: Vec::new(),
            sinks: Vec::new(),
            contract_filter: None,
            error_policy: None,
            poll_interval: None,
            start_cursor: None,
        }
    }
}

/// Builder for TallyConfig.
pub struct TallyConfigBuilder {
    extractor: Box<dyn Extractor>,
    decoders: Vec<Arc<dyn Decoder>>,
    sinks: Vec<Arc<dyn Sink>>,
    contract_filter: Option<ContractFilter>,
    error_policy: Option<ErrorPolicy>,
    poll_interval: Option<Duration>,
    start_cursor: Option<String>,
}

impl TallyConfigBuilder {
    pub fn add_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub fn add_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_contract_filter(mut self, filter: ContractFilter) -> Self {
        self.contract_filter = Some(filter);
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn start_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    pub fn build(self) -> TallyConfig {
        TallyConfig {
            extractor: self.extractor,
            decoders: self.decoders,
            sinks: self.sinks,
            contract_filter: self.contract_filter.unwrap_or_default(),
            error_policy: self.error_policy.unwrap_or_default(),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_secs(3)),
            start_cursor: self.start_cursor,
        }
    }
}

/// Assembled pipeline: extractor, decoders and sinks wired together.
pub struct Pipeline {
    extractor: Box<dyn Extractor>,
    decoder_context: DecoderContext,
    multi_sink: Arc<MultiSink>,
    error_policy: ErrorPolicy,
    poll_interval: Duration,
    cursor: Option<String>,
    progress: Arc<PipelineProgress>,
}

impl Pipeline {
    pub fn new(config: TallyConfig) -> anyhow::Result<Self> {
        tracing::info!(
            target: "tally::main",
            "Building pipeline with {} sink(s) and {} decoder(s), error policy: {}",
            config.sinks.len(),
            config.decoders.len(),
            config.error_policy
        );

        let decoder_context = DecoderContext::new(config.decoders, config.contract_filter)
            .context("Invalid decoder configuration")?;

        Ok(Self {
            extractor: config.extractor,
            decoder_context,
            multi_sink: Arc::new(MultiSink::new(config.sinks)),
            error_policy: config.error_policy,
            poll_interval: config.poll_interval,
            cursor: config.start_cursor,
            progress: Arc::new(PipelineProgress::new()),
        })
    }

    pub fn progress(&self) -> Arc<PipelineProgress> {
        self.progress.clone()
    }

    /// Core routes (`/health`) merged with every sink's routes.
    pub fn router(&self) -> Router {
        create_http_router(self.progress.clone()).merge(self.multi_sink.build_routes())
    }

    /// Runs until the extractor is exhausted, the token is cancelled, or a batch
    /// fails under [`ErrorPolicy::Halt`].
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<PipelineStats> {
        tracing::info!(target: "tally::etl", "Starting ETL pipeline...");

        let mut stats = PipelineStats {
            cursor: self.cursor.clone(),
            ..PipelineStats::default()
        };

        loop {
            if shutdown.is_cancelled() {
                tracing::info!(target: "tally::etl", "Shutdown requested, stopping ETL loop");
                break;
            }

            let batch = self
                .extractor
                .extract(self.cursor.take())
                .await
                .context("Extract failed")?;
            let new_cursor = batch.cursor.clone();

            if batch.is_empty() {
                if new_cursor.is_some() {
                    self.cursor = new_cursor.clone();
                    stats.cursor = new_cursor;
                }
                if self.extractor.is_finished() {
                    tracing::info!(target: "tally::etl", "Extractor finished, stopping ETL loop");
                    break;
                }
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::info!(target: "tally::etl", "Shutdown requested while waiting for logs");
                        break;
                    }
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            }

            tracing::debug!(target: "tally::etl", "Extracted {} logs", batch.len());

            let envelopes = self
                .decoder_context
                .decode(&batch.logs)
                .await
                .context("Decode failed")?;

            if let Err(e) = self.multi_sink.process(&envelopes, &batch).await {
                match self.error_policy {
                    ErrorPolicy::Halt => {
                        tracing::error!(
                            target: "tally::etl",
                            cursor = ?stats.cursor,
                            "Sink processing failed, halting: {:#}",
                            e
                        );
                        return Err(e.context("Sink processing failed"));
                    }
                    ErrorPolicy::Skip => {
                        tracing::error!(
                            target: "tally::etl",
                            "Sink processing failed, skipping batch: {:#}",
                            e
                        );
                        stats.failed_batches += 1;
                        self.progress.failed_batches.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            stats.batches += 1;
            stats.logs += batch.len() as u64;
            stats.envelopes += envelopes.len() as u64;
            self.progress.record_batch(
                batch.len(),
                envelopes.len(),
                batch.blocks.keys().max().copied(),
            );

            // Advance only once the batch has been handled.
            self.cursor = new_cursor.clone();
            stats.cursor = new_cursor;

            tracing::info!(
                target: "tally::etl",
                logs = batch.len(),
                envelopes = envelopes.len(),
                cursor = ?stats.cursor,
                "ETL cycle complete"
            );

            if self.extractor.is_finished() {
                tracing::info!(target: "tally::etl", "Extractor finished, stopping ETL loop");
                break;
            }
        }

        self.progress.finished.store(true, Ordering::Relaxed);
        tracing::info!(
            target: "tally::etl",
            batches = stats.batches,
            logs = stats.logs,
            "ETL loop completed gracefully"
        );
        Ok(stats)
    }
}

/// Builds a pipeline from `config` and runs it to completion.
///
/// The caller is responsible for initializing the tracing subscriber.
pub async fn run(config: TallyConfig, shutdown: CancellationToken) -> anyhow::Result<PipelineStats> {
    Pipeline::new(config)?.run(shutdown).await
}
