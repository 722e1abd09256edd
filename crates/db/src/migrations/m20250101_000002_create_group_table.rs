//! Create group table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Group::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Group::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Group::ParentId).string_len(64))
                    .col(ColumnDef::new(Group::Name).string_len(100).not_null())
                    .col(ColumnDef::new(Group::Level).string_len(64))
                    .col(ColumnDef::new(Group::Street).string_len(100))
                    .col(ColumnDef::new(Group::Zip).string_len(10))
                    .col(ColumnDef::new(Group::City).string_len(100))
                    .col(ColumnDef::new(Group::Website).string_len(200))
                    .col(ColumnDef::new(Group::Instagram).string_len(200))
                    .col(ColumnDef::new(Group::Facebook).string_len(200))
                    .col(
                        ColumnDef::new(Group::Display)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Group::Attributes).json_binary())
                    .col(
                        ColumnDef::new(Group::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Group::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_group_parent")
                            .from(Group::Table, Group::ParentId)
                            .to(Group::Table, Group::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: parent_id (for listing children)
        manager
            .create_index(
                Index::create()
                    .name("idx_group_parent_id")
                    .table(Group::Table)
                    .col(Group::ParentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Group::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Group {
    Table,
    Id,
    ParentId,
    Name,
    Level,
    Street,
    Zip,
    City,
    Website,
    Instagram,
    Facebook,
    Display,
    Attributes,
    CreatedAt,
    UpdatedAt,
}
