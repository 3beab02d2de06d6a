use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::ConnectionTrait;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Claims::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Claims::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Claims::RecipientAddress)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Claims::BookId).text().null())
                    .col(ColumnDef::new(Claims::PassphraseHash).string_len(64).null())
                    .col(
                        ColumnDef::new(Claims::Status)
                            .string_len(16)
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(ColumnDef::new(Claims::TxHash).string_len(128).null())
                    .col(ColumnDef::new(Claims::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(Claims::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Claims::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Worker batch selection scans PENDING rows oldest first
        manager
            .create_index(
                Index::create()
                    .name("idx_claims_status_created")
                    .table(Claims::Table)
                    .col(Claims::Status)
                    .col(Claims::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_claims_tx_hash")
                    .table(Claims::Table)
                    .col(Claims::TxHash)
                    .to_owned(),
            )
            .await?;

        // Expression index and check constraint have no sea-query builder form
        let connection = manager.get_connection();
        connection
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_claims_recipient_lower \
                 ON claims (lower(recipient_address))",
            )
            .await?;
        connection
            .execute_unprepared(
                "ALTER TABLE claims ADD CONSTRAINT ck_claims_status \
                 CHECK (status IN ('PENDING', 'COMPLETED', 'FAILED'))",
            )
            .await?;
        connection
            .execute_unprepared(
                "ALTER TABLE claims ADD CONSTRAINT ck_claims_completed_tx_hash \
                 CHECK (status <> 'COMPLETED' OR (tx_hash IS NOT NULL AND tx_hash <> ''))",
            )
            .await?;
        connection
            .execute_unprepared(
                "ALTER TABLE claims ADD CONSTRAINT ck_claims_failed_error \
                 CHECK (status <> 'FAILED' OR error_message IS NOT NULL)",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Claims::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Claims {
    Table,
    Id,
    RecipientAddress,
    BookId,
    PassphraseHash,
    Status,
    TxHash,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}
