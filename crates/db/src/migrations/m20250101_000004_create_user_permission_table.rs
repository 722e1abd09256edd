//! Create user permission table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserPermission::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserPermission::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserPermission::UserId)
                            .string_len(120)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserPermission::GroupId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserPermission::Granted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UserPermission::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_permission_user")
                            .from(UserPermission::Table, UserPermission::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_permission_group")
                            .from(UserPermission::Table, UserPermission::GroupId)
                            .to(Group::Table, Group::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (user_id, group_id) - at most one row per pair
        manager
            .create_index(
                Index::create()
                    .name("idx_user_permission_user_group")
                    .table(UserPermission::Table)
                    .col(UserPermission::UserId)
                    .col(UserPermission::GroupId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: group_id (for path and subtree permission queries)
        manager
            .create_index(
                Index::create()
                    .name("idx_user_permission_group_id")
                    .table(UserPermission::Table)
                    .col(UserPermission::GroupId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserPermission::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum UserPermission {
    Table,
    Id,
    UserId,
    GroupId,
    Granted,
    CreatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}

#[derive(Iden)]
enum Group {
    Table,
    Id,
}
