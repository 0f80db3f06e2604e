//! Error taxonomy surfaced by the editing, caching and publishing layers.

use thiserror::Error as ThisError;

/// Failures reported to callers of session operations.
///
/// Inner layers (file store, ledger, config) work with `anyhow` and are folded
/// into one of these variants at the component boundary.
#[derive(Debug, ThisError)]
pub enum MarketError {
    /// A required draft field is missing; raised before any I/O.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Content-store put/get failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Account fetch or transaction submission failure.
    #[error("chain error: {0}")]
    Chain(String),

    /// The listing account does not exist.
    #[error("listing not found: {0}")]
    NotFound(String),

    /// Write path attempted without a signer.
    #[error("no wallet connected")]
    WalletDisconnected,
}

impl MarketError {
    /// User-facing validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    pub fn chain(err: anyhow::Error) -> Self {
        Self::Chain(format!("{err:#}"))
    }
}

pub type MarketResult<T> = std::result::Result<T, MarketError>;
