use std::sync::Arc;

use tracing::{info, warn};

use crate::claims::{
    Claim, MAX_BOOK_ID_LEN, MAX_PASSPHRASE_LEN, NewClaim, hash_passphrase,
    validate_wallet_address,
};
use crate::models::claim::ClaimRequest;
use crate::store::{ClaimStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(String),
    #[error("already claimed")]
    DuplicateClaim { wallet: String },
    #[error(transparent)]
    Store(StoreError),
}

/// Accepts claim requests. At most one claim per wallet is guaranteed by the
/// store's unique index, so concurrent requests for one wallet race safely.
#[derive(Clone)]
pub struct IntakeService {
    store: Arc<dyn ClaimStore>,
}

impl IntakeService {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, request: &ClaimRequest) -> Result<Claim, IntakeError> {
        let new_claim = prepare_claim(request)?;
        match self.store.insert_claim(new_claim).await {
            Ok(claim) => {
                info!(
                    claim_id = claim.id,
                    wallet = %claim.recipient_address,
                    "Claim registered"
                );
                Ok(claim)
            }
            Err(StoreError::Duplicate { wallet }) => {
                info!(wallet = %wallet, "Duplicate claim rejected");
                Err(IntakeError::DuplicateClaim { wallet })
            }
            Err(err) => {
                warn!("Claim insert failed: {err}");
                Err(IntakeError::Store(err))
            }
        }
    }

    pub async fn lookup(&self, wallet: &str) -> Result<Option<Claim>, IntakeError> {
        let wallet = validate_wallet_address(wallet)
            .map_err(|err| IntakeError::Validation(err.to_string()))?;
        self.store
            .find_by_wallet(&wallet)
            .await
            .map_err(IntakeError::Store)
    }
}

fn prepare_claim(request: &ClaimRequest) -> Result<NewClaim, IntakeError> {
    let recipient_address = validate_wallet_address(&request.wallet)
        .map_err(|err| IntakeError::Validation(err.to_string()))?;

    let soluna = request.soluna.trim();
    if soluna.len() > MAX_BOOK_ID_LEN {
        return Err(IntakeError::Validation(format!(
            "soluna exceeds {MAX_BOOK_ID_LEN} bytes"
        )));
    }
    let phrase = request.phrase.trim();
    if phrase.len() > MAX_PASSPHRASE_LEN {
        return Err(IntakeError::Validation(format!(
            "phrase exceeds {MAX_PASSPHRASE_LEN} bytes"
        )));
    }

    Ok(NewClaim {
        recipient_address,
        book_id: (!soluna.is_empty()).then(|| soluna.to_string()),
        passphrase_hash: (!phrase.is_empty()).then(|| hash_passphrase(phrase)),
    })
}
