use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claims::{Claim, ClaimStatus};

/// Body of `POST /claim`. Missing fields read as empty strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub wallet: String,
    /// Claim context, stored as `book_id`
    #[serde(default)]
    pub soluna: String,
    /// Only its SHA-256 digest is stored
    #[serde(default)]
    pub phrase: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimView {
    pub id: i64,
    pub recipient_address: String,
    pub book_id: Option<String>,
    pub status: ClaimStatus,
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Claim> for ClaimView {
    fn from(claim: Claim) -> Self {
        Self {
            id: claim.id,
            recipient_address: claim.recipient_address,
            book_id: claim.book_id,
            status: claim.status,
            tx_hash: claim.tx_hash,
            error_message: claim.error_message,
            created_at: claim.created_at,
            updated_at: claim.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub ok: bool,
    pub claim: ClaimView,
}
