use primitive_types::H160;

/// Errors raised while reducing token events into the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The token record could neither be loaded nor created. The event is aborted.
    #[error("token {address:#x} could not be resolved")]
    TokenUnresolvable {
        address: H160,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("malformed event: {0}")]
    Decode(String),
}

impl LedgerError {
    pub fn token_unresolvable(address: H160, source: LedgerError) -> Self {
        Self::TokenUnresolvable {
            address,
            source: Box::new(source),
        }
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
