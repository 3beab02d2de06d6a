//! Claim persistence.
//!
//! The store is the only state shared between intake and any number of
//! disbursement workers, so every exclusivity guarantee lives here:
//! - one row per wallet, enforced by a unique index on `lower(recipient_address)`
//! - a claim is handed to at most one worker at a time via row locks
//!   (`FOR UPDATE SKIP LOCKED`), and once its transfer is broadcast the
//!   committed `tx_hash` keeps it out of every later selection
//! - terminal writes are conditional on the row still being `PENDING`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;

use crate::claims::{Claim, NewClaim, Resolution};

mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PgClaimStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a claim already exists for wallet {wallet}")]
    Duplicate { wallet: String },
    #[error("claim {id} is no longer pending")]
    NotPending { id: i64 },
    #[error("stored claim {id} is malformed: {reason}")]
    Malformed { id: i64, reason: String },
    #[error("claim store unavailable: {0}")]
    Unavailable(#[from] DbErr),
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Inserts a `PENDING` claim unless the wallet already has one, in a
    /// single constrained write.
    async fn insert_claim(&self, claim: NewClaim) -> Result<Claim, StoreError>;

    /// Case-insensitive lookup by wallet.
    async fn find_by_wallet(&self, wallet: &str) -> Result<Option<Claim>, StoreError>;

    /// Locks the oldest `PENDING` claim that has not been broadcast, skipping
    /// rows locked by other workers. The lock lasts until the returned handle
    /// commits a write or is dropped.
    async fn lock_next_pending(&self) -> Result<Option<Box<dyn ClaimLock>>, StoreError>;

    /// Takes the oldest in-flight claim whose `updated_at` is before
    /// `older_than` and bumps `updated_at`, leasing it to the caller for
    /// another stale window.
    async fn lease_stale_in_flight(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Option<Claim>, StoreError>;

    /// Writes a terminal status if the claim is still `PENDING`.
    async fn resolve(&self, id: i64, resolution: Resolution) -> Result<Claim, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// A claim row held exclusively by one worker.
#[async_trait]
pub trait ClaimLock: Send {
    fn claim(&self) -> &Claim;

    /// Durably records the broadcast transaction and releases the lock.
    async fn record_broadcast(self: Box<Self>, tx_hash: &str) -> Result<Claim, StoreError>;

    /// Writes a terminal status and releases the lock.
    async fn resolve(self: Box<Self>, resolution: Resolution) -> Result<Claim, StoreError>;
}
