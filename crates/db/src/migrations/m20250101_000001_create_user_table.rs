//! Create user table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(User::Id)
                            .string_len(120)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(User::PasswordHash).string_len(256).not_null())
                    .col(ColumnDef::new(User::Name).string_len(100).not_null())
                    .col(
                        ColumnDef::new(User::IsSuperuser)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(User::LastLogin).timestamp_with_time_zone())
                    .col(ColumnDef::new(User::ResetToken).string_len(64))
                    .col(ColumnDef::new(User::ResetTokenExpiresAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Unique index: reset_token (NULLs excluded by Postgres semantics)
        manager
            .create_index(
                Index::create()
                    .name("idx_user_reset_token")
                    .table(User::Table)
                    .col(User::ResetToken)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum User {
    Table,
    Id,
    PasswordHash,
    Name,
    IsSuperuser,
    CreatedAt,
    LastLogin,
    ResetToken,
    ResetTokenExpiresAt,
}
