//! In-memory claim store for tests. Mirrors the PostgreSQL semantics the
//! worker relies on: case-insensitive uniqueness, skip-locked selection and
//! conditional terminal writes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::DbErr;

use crate::claims::{Claim, ClaimStatus, NewClaim, Resolution, normalize_wallet};

use super::{ClaimLock, ClaimStore, StoreError};

#[derive(Clone, Default)]
pub struct MemoryClaimStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<Claim>,
    locked: HashSet<i64>,
    next_id: i64,
    offline: bool,
    /// Every status change as (claim id, new status)
    transitions: Vec<(i64, ClaimStatus)>,
}

impl MemoryState {
    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable(DbErr::Custom(
                "memory store offline".to_string(),
            )));
        }
        Ok(())
    }

    fn row_mut(&mut self, id: i64) -> Option<&mut Claim> {
        self.rows.iter_mut().find(|row| row.id == id)
    }

    fn set_tx_hash(&mut self, id: i64, tx_hash: &str) -> Result<Claim, StoreError> {
        self.ensure_online()?;
        let row = self
            .row_mut(id)
            .filter(|row| row.status == ClaimStatus::Pending)
            .ok_or(StoreError::NotPending { id })?;
        row.tx_hash = Some(tx_hash.to_string());
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    fn resolve(&mut self, id: i64, resolution: Resolution) -> Result<Claim, StoreError> {
        self.ensure_online()?;
        let row = self
            .row_mut(id)
            .filter(|row| row.status == ClaimStatus::Pending)
            .ok_or(StoreError::NotPending { id })?;
        row.status = resolution.status();
        row.updated_at = Utc::now();
        match resolution {
            Resolution::Completed { tx_hash } => row.tx_hash = Some(tx_hash),
            Resolution::Failed { message } => row.error_message = Some(message),
        }
        let updated = row.clone();
        self.transitions.push((id, updated.status));
        Ok(updated)
    }
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().expect("memory store poisoned")
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn claims(&self) -> Vec<Claim> {
        self.state().rows.clone()
    }

    pub fn claim(&self, id: i64) -> Claim {
        self.state()
            .rows
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .expect("claim exists")
    }

    pub fn transitions(&self) -> Vec<(i64, ClaimStatus)> {
        self.state().transitions.clone()
    }

    /// Simulates a worker that broadcast and then crashed.
    pub fn mark_in_flight(&self, id: i64, tx_hash: &str, age: Duration) {
        let mut state = self.state();
        let row = state.row_mut(id).expect("claim exists");
        row.tx_hash = Some(tx_hash.to_string());
        row.updated_at = Utc::now() - age;
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn insert_claim(&self, new_claim: NewClaim) -> Result<Claim, StoreError> {
        let mut state = self.state();
        state.ensure_online()?;
        let key = normalize_wallet(&new_claim.recipient_address);
        if state
            .rows
            .iter()
            .any(|row| normalize_wallet(&row.recipient_address) == key)
        {
            return Err(StoreError::Duplicate {
                wallet: new_claim.recipient_address,
            });
        }

        state.next_id += 1;
        let now = Utc::now();
        let claim = Claim {
            id: state.next_id,
            recipient_address: new_claim.recipient_address,
            book_id: new_claim.book_id,
            passphrase_hash: new_claim.passphrase_hash,
            status: ClaimStatus::Pending,
            tx_hash: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.rows.push(claim.clone());
        Ok(claim)
    }

    async fn find_by_wallet(&self, wallet: &str) -> Result<Option<Claim>, StoreError> {
        let state = self.state();
        state.ensure_online()?;
        let key = normalize_wallet(wallet);
        Ok(state
            .rows
            .iter()
            .find(|row| normalize_wallet(&row.recipient_address) == key)
            .cloned())
    }

    async fn lock_next_pending(&self) -> Result<Option<Box<dyn ClaimLock>>, StoreError> {
        let mut state = self.state();
        state.ensure_online()?;
        let next = state
            .rows
            .iter()
            .filter(|row| row.status == ClaimStatus::Pending && row.tx_hash.is_none())
            .filter(|row| !state.locked.contains(&row.id))
            .min_by_key(|row| (row.created_at, row.id))
            .cloned();

        Ok(next.map(|claim| {
            state.locked.insert(claim.id);
            Box::new(MemoryClaimLock {
                inner: Arc::clone(&self.inner),
                claim,
            }) as Box<dyn ClaimLock>
        }))
    }

    async fn lease_stale_in_flight(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Option<Claim>, StoreError> {
        let mut state = self.state();
        state.ensure_online()?;
        let stale_id = state
            .rows
            .iter()
            .filter(|row| row.is_in_flight() && row.updated_at < older_than)
            .filter(|row| !state.locked.contains(&row.id))
            .min_by_key(|row| (row.updated_at, row.id))
            .map(|row| row.id);

        Ok(stale_id.and_then(|id| {
            let row = state.row_mut(id)?;
            row.updated_at = Utc::now();
            Some(row.clone())
        }))
    }

    async fn resolve(&self, id: i64, resolution: Resolution) -> Result<Claim, StoreError> {
        self.state().resolve(id, resolution)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.state().ensure_online()
    }
}

struct MemoryClaimLock {
    inner: Arc<Mutex<MemoryState>>,
    claim: Claim,
}

impl MemoryClaimLock {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().expect("memory store poisoned")
    }
}

#[async_trait]
impl ClaimLock for MemoryClaimLock {
    fn claim(&self) -> &Claim {
        &self.claim
    }

    async fn record_broadcast(self: Box<Self>, tx_hash: &str) -> Result<Claim, StoreError> {
        self.state().set_tx_hash(self.claim.id, tx_hash)
    }

    async fn resolve(self: Box<Self>, resolution: Resolution) -> Result<Claim, StoreError> {
        self.state().resolve(self.claim.id, resolution)
    }
}

impl Drop for MemoryClaimLock {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.lock() {
            state.locked.remove(&self.claim.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_claim(wallet: &str) -> NewClaim {
        NewClaim {
            recipient_address: wallet.to_string(),
            book_id: None,
            passphrase_hash: None,
        }
    }

    #[tokio::test]
    async fn duplicate_wallet_rejected_case_insensitively() {
        let store = MemoryClaimStore::new();
        store
            .insert_claim(new_claim("0xAB00000000000000000000000000000000000001"))
            .await
            .unwrap();
        let err = store
            .insert_claim(new_claim("0xab00000000000000000000000000000000000001"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.claims().len(), 1);
    }

    #[tokio::test]
    async fn locked_rows_are_skipped_until_released() {
        let store = MemoryClaimStore::new();
        let first = store
            .insert_claim(new_claim("0x0000000000000000000000000000000000000001"))
            .await
            .unwrap();
        let second = store
            .insert_claim(new_claim("0x0000000000000000000000000000000000000002"))
            .await
            .unwrap();

        let lock_a = store.lock_next_pending().await.unwrap().unwrap();
        let lock_b = store.lock_next_pending().await.unwrap().unwrap();
        assert_eq!(lock_a.claim().id, first.id);
        assert_eq!(lock_b.claim().id, second.id);
        assert!(store.lock_next_pending().await.unwrap().is_none());

        drop(lock_b);
        let again = store.lock_next_pending().await.unwrap().unwrap();
        assert_eq!(again.claim().id, second.id);
    }
}
