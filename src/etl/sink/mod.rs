pub mod multi;

use async_trait::async_trait;
use axum::Router;

use super::envelope::{Envelope, TypeId};
use super::extractor::ExtractionBatch;

pub use multi::MultiSink;

/// Sink trait - processes envelopes and exposes query routes
///
/// Sinks receive every envelope of a batch and pick the ones whose `TypeId` they
/// declared in `interested_types`. Envelopes arrive in chain order and a sink must
/// finish one before looking at the next when its state depends on ordering.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Get the type IDs this sink is interested in
    fn interested_types(&self) -> Vec<TypeId>;

    /// Process a batch of envelopes with their block context
    ///
    /// - `envelopes`: decoded envelopes, in the order of the logs they came from.
    /// - `batch`: the extraction batch, with `batch.blocks` deduplicated by block number.
    ///
    /// An error means the batch was not fully applied. The pipeline decides
    /// whether to halt or continue.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch) -> Result<()> {
    ///     for envelope in envelopes {
    ///         if let Some(event) = envelope.downcast_ref::<MyEvent>() {
    ///             let block = &batch.blocks[&event.block_number];
    ///             self.apply(event, block.timestamp).await?;
    ///         }
    ///     }
    ///     Ok(())
    /// }
    /// ```
    async fn process(&self, envelopes: &[Envelope], batch: &ExtractionBatch)
        -> anyhow::Result<()>;

    /// Build HTTP routes for this sink
    ///
    /// The routes are merged into the main HTTP router.
    ///
    /// ```rust,ignore
    /// fn build_routes(&self) -> Router {
    ///     Router::new()
    ///         .route("/my-sink/status", get(status_handler))
    ///         .with_state(self.state.clone())
    /// }
    /// ```
    fn build_routes(&self) -> Router;
}
