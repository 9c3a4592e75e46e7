//! Pool error types.

use thiserror::Error;

/// Errors surfaced to transaction submitters.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The transaction is structurally invalid or targets another chain.
    #[error("bad tx: {0}")]
    BadTx(String),

    /// The transaction is well-formed but unacceptable right now (size,
    /// features, quota, pool full, non-executable under strict add).
    #[error("tx rejected: {0}")]
    Rejected(String),

    /// A resource failure while evaluating the transaction (state view
    /// construction). Not a verdict on the transaction itself.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
