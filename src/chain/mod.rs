//! Interface the disbursement worker uses to move tokens on-chain.

use std::fmt;

use async_trait::async_trait;

#[cfg(test)]
pub mod scripted;

/// Identity of a broadcast transfer; persisted as the claim's `tx_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHandle(String);

impl TxHandle {
    pub fn new(hash: impl Into<String>) -> Self {
        let hash = hash.into();
        assert!(!hash.is_empty(), "Transaction handle must not be empty");
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final observation of a broadcast transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Reverted,
    /// No final receipt within the wait bound; the transfer may still land.
    TimedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Rejected before anything was broadcast.
    #[error("transfer submission failed: {0}")]
    Submission(String),
    /// The request left but no answer came back; the node may have
    /// broadcast the transfer.
    #[error("transfer submission outcome unknown: {0}")]
    SubmissionUnknown(String),
    #[error("node returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Broadcasts a transfer of `amount` base units to `to`.
    async fn submit(&self, to: &str, amount: u128) -> Result<TxHandle, ChainError>;

    /// Waits, bounded, until the transfer is final.
    async fn await_confirmation(&self, handle: &TxHandle) -> Confirmation;

    async fn ping(&self) -> bool;
}
