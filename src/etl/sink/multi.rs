//! MultiSink runs multiple sinks in sequence
//!
//! Each sink processes the same envelopes and filters by TypeId internally.
//! The first failing sink aborts the batch.

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use std::sync::Arc;

use super::Sink;
use crate::etl::envelope::{Envelope, TypeId};
use crate::etl::extractor::ExtractionBatch;

/// MultiSink runs multiple sinks and merges their routes
pub struct MultiSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }
}

#[async_trait]
impl Sink for MultiSink {
    fn name(&self) -> &'static str {
        "multi"
    }

    fn interested_types(&self) -> Vec<TypeId> {
        let mut types: Vec<TypeId> = Vec::new();
        for sink in &self.sinks {
            for type_id in sink.interested_types() {
                if !types.contains(&type_id) {
                    types.push(type_id);
                }
            }
        }
        types
    }

    async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> anyhow::Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.process(envelopes, batch).await {
                tracing::error!(
                    target: "tally::etl::multi_sink",
                    "Sink '{}' failed: {:#}",
                    sink.name(),
                    e
                );
                return Err(e).with_context(|| format!("Sink '{}' failed", sink.name()));
            }
        }

        tracing::debug!(
            target: "tally::etl::multi_sink",
            "Processed {} envelopes across {} sinks",
            envelopes.len(),
            self.sinks.len()
        );

        Ok(())
    }

    fn build_routes(&self) -> Router {
        let mut router = Router::new();
        for sink in &self.sinks {
            router = router.merge(sink.build_routes());
        }
        router
    }
}
