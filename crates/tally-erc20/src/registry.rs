//! Token registry: one `Token` per contract, created on first sight.

use bigdecimal::BigDecimal;
use primitive_types::H160;
use std::sync::Arc;
use tally_common::{address_to_hex, MetadataSource, TokenMetadata};

use crate::error::{LedgerError, LedgerResult};
use crate::model::{Token, UNKNOWN_METADATA};
use crate::unit_of_work::UnitOfWork;

pub struct TokenRegistry {
    metadata: Arc<dyn MetadataSource>,
}

impl TokenRegistry {
    pub fn new(metadata: Arc<dyn MetadataSource>) -> Self {
        Self { metadata }
    }

    /// Loads the token for `address`, creating it if this is the first event seen.
    ///
    /// A new token has its metadata queried once (name, symbol, decimals, each
    /// independently) and is saved right away with defaults for whatever the
    /// contract did not report. Later calls return the saved record and never
    /// query metadata again.
    pub async fn fetch_token_details(
        &self,
        uow: &mut UnitOfWork<'_>,
        address: H160,
    ) -> LedgerResult<Token> {
        let existing = uow
            .load_token(address)
            .map_err(|e| LedgerError::token_unresolvable(address, e))?;
        if let Some(token) = existing {
            return Ok(token);
        }

        let metadata = self.metadata.fetch_erc20_metadata(address).await;
        let token = with_metadata(Token::new(address), metadata);

        tracing::info!(
            target: "tally_erc20::registry",
            token = %address_to_hex(address),
            name = %token.name,
            symbol = %token.symbol,
            decimals = token.decimals,
            "Created token"
        );
        metrics::counter!("tally_tokens_created_total").increment(1);

        uow.save_token(token.clone());
        Ok(token)
    }

    pub fn apply_mint(&self, uow: &mut UnitOfWork<'_>, token: &mut Token, amount: &BigDecimal) {
        token.event_count += 1;
        token.mint_event_count += 1;
        token.total_minted += amount;
        token.total_supply += amount;
        uow.save_token(token.clone());
    }

    pub fn apply_burn(&self, uow: &mut UnitOfWork<'_>, token: &mut Token, amount: &BigDecimal) {
        token.event_count += 1;
        token.burn_event_count += 1;
        token.total_burned += amount;
        token.total_supply -= amount;
        uow.save_token(token.clone());
    }

    pub fn apply_transfer(&self, uow: &mut UnitOfWork<'_>, token: &mut Token, amount: &BigDecimal) {
        token.event_count += 1;
        token.transfer_event_count += 1;
        token.total_transferred += amount;
        uow.save_token(token.clone());
    }
}

/// Substitutes defaults for unavailable fields.
fn with_metadata(mut token: Token, metadata: TokenMetadata) -> Token {
    token.name = metadata.name.unwrap_or_else(|| UNKNOWN_METADATA.to_string());
    token.symbol = metadata
        .symbol
        .unwrap_or_else(|| UNKNOWN_METADATA.to_string());
    token.decimals = metadata.decimals.unwrap_or(0);
    token
}
