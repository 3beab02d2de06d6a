//! Airdrop claim rows; the system of record for disbursement state.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "claims")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Destination wallet, unique under `lower(...)`
    #[sea_orm(column_type = "String(StringLen::N(64))")]
    pub recipient_address: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub book_id: Option<String>,
    /// SHA-256 hex of the claim passphrase
    #[sea_orm(column_type = "String(StringLen::N(64))", nullable)]
    pub passphrase_hash: Option<String>,
    /// PENDING, COMPLETED or FAILED
    #[sea_orm(column_type = "String(StringLen::N(16))")]
    pub status: String,
    #[sea_orm(column_type = "String(StringLen::N(128))", nullable)]
    pub tx_hash: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
