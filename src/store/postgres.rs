use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::{Expr, Func, LockBehavior, LockType, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select, SqlErr, TransactionTrait,
    UpdateMany,
};
use tracing::debug;

use crate::claims::{Claim, ClaimStatus, NewClaim, Resolution, normalize_wallet};
use crate::entities::claim;

use super::{ClaimLock, ClaimStore, StoreError};

/// PostgreSQL-backed claim store.
#[derive(Clone)]
pub struct PgClaimStore {
    database: Arc<DatabaseConnection>,
}

impl PgClaimStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self {
            database: Arc::new(database),
        }
    }
}

#[async_trait]
impl ClaimStore for PgClaimStore {
    async fn insert_claim(&self, new_claim: NewClaim) -> Result<Claim, StoreError> {
        let now = fixed_now();
        let model = claim::ActiveModel {
            id: NotSet,
            recipient_address: Set(new_claim.recipient_address.clone()),
            book_id: Set(new_claim.book_id),
            passphrase_hash: Set(new_claim.passphrase_hash),
            status: Set(ClaimStatus::Pending.as_str().to_string()),
            tx_hash: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match model.insert(&*self.database).await {
            Ok(inserted) => to_claim(inserted),
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Err(StoreError::Duplicate {
                    wallet: new_claim.recipient_address,
                }),
                _ => Err(err.into()),
            },
        }
    }

    async fn find_by_wallet(&self, wallet: &str) -> Result<Option<Claim>, StoreError> {
        wallet_query(wallet)
            .one(&*self.database)
            .await?
            .map(to_claim)
            .transpose()
    }

    async fn lock_next_pending(&self) -> Result<Option<Box<dyn ClaimLock>>, StoreError> {
        let txn = self.database.begin().await?;
        let row = next_pending_query().one(&txn).await?;

        match row {
            Some(model) => {
                let claim = to_claim(model)?;
                debug!(claim_id = claim.id, "Locked pending claim");
                Ok(Some(Box::new(PgClaimLock { txn, claim })))
            }
            None => {
                txn.commit().await?;
                Ok(None)
            }
        }
    }

    async fn lease_stale_in_flight(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Option<Claim>, StoreError> {
        let txn = self.database.begin().await?;
        let row = stale_in_flight_query(older_than).one(&txn).await?;

        let Some(model) = row else {
            txn.commit().await?;
            return Ok(None);
        };

        let leased = conditional_update(
            &txn,
            model.id,
            vec![(claim::Column::UpdatedAt, Expr::value(fixed_now()))],
        )
        .await?;
        txn.commit().await?;
        Ok(Some(leased))
    }

    async fn resolve(&self, id: i64, resolution: Resolution) -> Result<Claim, StoreError> {
        conditional_update(&*self.database, id, resolution_changes(&resolution)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.database.ping().await?;
        Ok(())
    }
}

/// Row lock held by an open transaction. Dropping it rolls back and frees
/// the row for the next worker.
struct PgClaimLock {
    txn: DatabaseTransaction,
    claim: Claim,
}

#[async_trait]
impl ClaimLock for PgClaimLock {
    fn claim(&self) -> &Claim {
        &self.claim
    }

    async fn record_broadcast(self: Box<Self>, tx_hash: &str) -> Result<Claim, StoreError> {
        assert!(!tx_hash.is_empty(), "Broadcast tx hash must not be empty");
        let PgClaimLock { txn, claim: locked } = *self;
        let updated = conditional_update(
            &txn,
            locked.id,
            vec![
                (claim::Column::TxHash, Expr::value(tx_hash.to_string())),
                (claim::Column::UpdatedAt, Expr::value(fixed_now())),
            ],
        )
        .await?;
        txn.commit().await?;
        Ok(updated)
    }

    async fn resolve(self: Box<Self>, resolution: Resolution) -> Result<Claim, StoreError> {
        let PgClaimLock { txn, claim: locked } = *self;
        let updated = conditional_update(&txn, locked.id, resolution_changes(&resolution)).await?;
        txn.commit().await?;
        Ok(updated)
    }
}

fn wallet_query(wallet: &str) -> Select<claim::Entity> {
    claim::Entity::find().filter(
        Expr::expr(Func::lower(Expr::col(claim::Column::RecipientAddress)))
            .eq(normalize_wallet(wallet)),
    )
}

/// Oldest unbroadcast `PENDING` row not locked by another worker.
fn next_pending_query() -> Select<claim::Entity> {
    claim::Entity::find()
        .filter(claim::Column::Status.eq(ClaimStatus::Pending.as_str()))
        .filter(claim::Column::TxHash.is_null())
        .order_by_asc(claim::Column::CreatedAt)
        .order_by_asc(claim::Column::Id)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
}

fn stale_in_flight_query(older_than: DateTime<Utc>) -> Select<claim::Entity> {
    claim::Entity::find()
        .filter(claim::Column::Status.eq(ClaimStatus::Pending.as_str()))
        .filter(claim::Column::TxHash.is_not_null())
        .filter(claim::Column::UpdatedAt.lt(to_fixed_offset(older_than)))
        .order_by_asc(claim::Column::UpdatedAt)
        .order_by_asc(claim::Column::Id)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
}

fn conditional_update_query(
    id: i64,
    changes: Vec<(claim::Column, SimpleExpr)>,
) -> UpdateMany<claim::Entity> {
    let mut update = claim::Entity::update_many()
        .filter(claim::Column::Id.eq(id))
        .filter(claim::Column::Status.eq(ClaimStatus::Pending.as_str()));
    for (column, value) in changes {
        update = update.col_expr(column, value);
    }
    update
}

fn resolution_changes(resolution: &Resolution) -> Vec<(claim::Column, SimpleExpr)> {
    let mut changes = vec![
        (
            claim::Column::Status,
            Expr::value(resolution.status().as_str()),
        ),
        (claim::Column::UpdatedAt, Expr::value(fixed_now())),
    ];
    match resolution {
        Resolution::Completed { tx_hash } => {
            assert!(!tx_hash.is_empty(), "Completed claims require a tx hash");
            changes.push((claim::Column::TxHash, Expr::value(tx_hash.clone())));
        }
        Resolution::Failed { message } => {
            assert!(!message.is_empty(), "Failed claims require an error message");
            changes.push((claim::Column::ErrorMessage, Expr::value(message.clone())));
        }
    }
    changes
}

/// `UPDATE claims SET ... WHERE id = $1 AND status = 'PENDING' RETURNING *`
async fn conditional_update<C: ConnectionTrait>(
    connection: &C,
    id: i64,
    changes: Vec<(claim::Column, SimpleExpr)>,
) -> Result<Claim, StoreError> {
    let mut updated = conditional_update_query(id, changes)
        .exec_with_returning(connection)
        .await?;
    match updated.pop() {
        Some(model) => to_claim(model),
        None => Err(StoreError::NotPending { id }),
    }
}

fn to_claim(model: claim::Model) -> Result<Claim, StoreError> {
    let status = model
        .status
        .parse::<ClaimStatus>()
        .map_err(|err| StoreError::Malformed {
            id: model.id,
            reason: err.to_string(),
        })?;
    Ok(Claim {
        id: model.id,
        recipient_address: model.recipient_address,
        book_id: model.book_id,
        passphrase_hash: model.passphrase_hash,
        status,
        tx_hash: model.tx_hash,
        error_message: model.error_message,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn to_fixed_offset(time: DateTime<Utc>) -> DateTime<FixedOffset> {
    time.fixed_offset()
}

fn fixed_now() -> DateTime<FixedOffset> {
    to_fixed_offset(Utc::now())
}
