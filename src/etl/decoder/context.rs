//! DecoderContext routes logs to every registered decoder.
//!
//! - Decoders are identified by their `decoder_name()` (hashed to DecoderId)
//! - Each decoder decides if it can decode a log (structural filtering)
//! - Contract filtering (allow-list/blacklist) happens before any decoder runs
//! - Decoders are always called in sorted DecoderId order

use async_trait::async_trait;
use std::sync::Arc;

use super::{ContractFilter, Decoder, DecoderId};
use crate::etl::envelope::Envelope;
use crate::etl::log::RawLog;

pub struct DecoderContext {
    /// Sorted by id
    decoders: Vec<(DecoderId, Arc<dyn Decoder>)>,

    contract_filter: ContractFilter,
}

impl DecoderContext {
    pub fn new(
        decoders: Vec<Arc<dyn Decoder>>,
        contract_filter: ContractFilter,
    ) -> anyhow::Result<Self> {
        contract_filter.validate()?;

        let mut registered: Vec<(DecoderId, Arc<dyn Decoder>)> = Vec::with_capacity(decoders.len());
        for decoder in decoders {
            let name = decoder.decoder_name();
            let id = DecoderId::new(name);

            if registered.iter().any(|(existing, _)| *existing == id) {
                anyhow::bail!("Duplicate decoder name '{name}' (id: {id:?})");
            }

            tracing::debug!(
                target: "tally::etl::decoder_context",
                "Registered decoder '{}' with ID {:?}",
                name,
                id
            );
            registered.push((id, decoder));
        }
        registered.sort_by_key(|(id, _)| *id);

        let filter_desc = if contract_filter.is_empty() {
            "none (all contracts)".to_string()
        } else {
            format!(
                "{} allowed, {} blacklisted",
                contract_filter.allowed.len(),
                contract_filter.blacklist.len()
            )
        };

        tracing::info!(
            target: "tally::etl::decoder_context",
            "Initialized DecoderContext with {} decoders and filter: {}",
            registered.len(),
            filter_desc
        );

        Ok(Self {
            decoders: registered,
            contract_filter,
        })
    }

    pub fn decoder_ids(&self) -> Vec<DecoderId> {
        self.decoders.iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait]
impl Decoder for DecoderContext {
    fn decoder_name(&self) -> &str {
        "context"
    }

    async fn decode_log(&self, log: &RawLog) -> anyhow::Result<Vec<Envelope>> {
        if !self.contract_filter.allows(log.address) {
            tracing::trace!(
                target: "tally::etl::decoder_context",
                contract = %format!("{:#x}", log.address),
                "Skipping filtered contract"
            );
            return Ok(Vec::new());
        }

        let mut all_envelopes = Vec::new();
        for (_, decoder) in &self.decoders {
            match decoder.decode_log(log).await {
                Ok(envelopes) => {
                    if !envelopes.is_empty() {
                        tracing::trace!(
                            target: "tally::etl::decoder_context",
                            "Decoder '{}' decoded log from {:#x} into {} envelope(s)",
                            decoder.decoder_name(),
                            log.address,
                            envelopes.len()
                        );
                    }
                    all_envelopes.extend(envelopes);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "tally::etl::decoder_context",
                        block = log.block_number,
                        log_index = log.log_index,
                        "Decoder '{}' failed: {}",
                        decoder.decoder_name(),
                        e
                    );
                }
            }
        }

        Ok(all_envelopes)
    }

    async fn decode(&self, logs: &[RawLog]) -> anyhow::Result<Vec<Envelope>> {
        let mut all_envelopes = Vec::new();
        for log in logs {
            let envelopes = self.decode_log(log).await?;
            all_envelopes.extend(envelopes);
        }

        tracing::debug!(
            target: "tally::etl::decoder_context",
            "Decoded {} logs into {} envelopes across {} decoders",
            logs.len(),
            all_envelopes.len(),
            self.decoders.len(),
        );

        Ok(all_envelopes)
    }
}
