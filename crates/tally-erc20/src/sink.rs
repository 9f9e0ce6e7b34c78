//! ERC20 ledger sink
//!
//! Reduces token events into the entity store, one event at a time, in the order
//! the envelopes arrive. Each event either lands completely or not at all.
//!
//! When an event fails the configured [`ErrorPolicy`] decides: `Halt` returns the
//! error so the pipeline stops before advancing its cursor, `Skip` logs it and
//! moves on to the next event.

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tally::etl::{Envelope, ExtractionBatch, Sink, TypeId};
use tally::ErrorPolicy;
use tally_common::{address_to_hex, MetadataSource};

use crate::api;
use crate::decoder::TOKEN_EVENT_TYPE;
use crate::reducer::{DecodedTokenEvent, Reducer};
use crate::store::EntityStore;

/// Counters since the sink was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub applied: u64,
    /// Already applied before, skipped by checkpoint
    pub replayed: u64,
    /// Failed and skipped under [`ErrorPolicy::Skip`]
    pub failed: u64,
}

pub struct Erc20Sink {
    reducer: Reducer,
    store: Arc<dyn EntityStore>,
    error_policy: ErrorPolicy,
    applied: AtomicU64,
    replayed: AtomicU64,
    failed: AtomicU64,
}

impl Erc20Sink {
    pub fn new(store: Arc<dyn EntityStore>, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            reducer: Reducer::new(store.clone(), metadata),
            store,
            error_policy: ErrorPolicy::default(),
            applied: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            applied: self.applied.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Sink for Erc20Sink {
    fn name(&self) -> &str {
        "erc20"
    }

    fn interested_types(&self) -> Vec<TypeId> {
        vec![TypeId::new(TOKEN_EVENT_TYPE)]
    }

    async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> Result<()> {
        let token_event_type = TypeId::new(TOKEN_EVENT_TYPE);
        let mut applied = 0u64;

        for envelope in envelopes {
            if envelope.type_id != token_event_type {
                continue;
            }
            let Some(event) = envelope.downcast_ref::<DecodedTokenEvent>() else {
                continue;
            };

            match self.reducer.reduce(event).await {
                Ok(Some(_)) => {
                    applied += 1;
                    self.applied.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {
                    self.replayed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => match self.error_policy {
                    ErrorPolicy::Halt => {
                        tracing::error!(
                            target: "tally_erc20::sink",
                            envelope = %envelope.id,
                            token = %address_to_hex(event.contract),
                            error = %e,
                            "Failed to apply event"
                        );
                        return Err(anyhow::Error::new(e)
                            .context(format!("Failed to apply event {}", envelope.id)));
                    }
                    ErrorPolicy::Skip => {
                        tracing::error!(
                            target: "tally_erc20::sink",
                            envelope = %envelope.id,
                            token = %address_to_hex(event.contract),
                            error = %e,
                            "Failed to apply event, skipping"
                        );
                        self.failed.fetch_add(1, Ordering::Relaxed);
                    }
                },
            }
        }

        if applied > 0 {
            tracing::info!(
                target: "tally_erc20::sink",
                count = applied,
                blocks = batch.blocks.len(),
                "Applied token events"
            );

            if let Ok(stats) = self.store.stats() {
                tracing::info!(
                    target: "tally_erc20::sink",
                    tokens = stats.tokens,
                    accounts = stats.accounts,
                    snapshots = stats.snapshots,
                    "Total statistics"
                );
            }
        }

        Ok(())
    }

    fn build_routes(&self) -> Router {
        api::router(self.store.clone())
    }
}
