//! Create event table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Event::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Event::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Event::GroupId).string_len(64).not_null())
                    .col(ColumnDef::new(Event::Title).string_len(120).not_null())
                    .col(ColumnDef::new(Event::Email).string_len(120))
                    .col(ColumnDef::new(Event::Tel).string_len(32))
                    .col(ColumnDef::new(Event::Lat).double())
                    .col(ColumnDef::new(Event::Lon).double())
                    .col(
                        ColumnDef::new(Event::StartsAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Event::EndsAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Event::Description).text())
                    .col(ColumnDef::new(Event::Photo).blob())
                    .col(
                        ColumnDef::new(Event::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Event::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_group")
                            .from(Event::Table, Event::GroupId)
                            .to(Group::Table, Group::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: group_id (for listing a group's events)
        manager
            .create_index(
                Index::create()
                    .name("idx_event_group_id")
                    .table(Event::Table)
                    .col(Event::GroupId)
                    .to_owned(),
            )
            .await?;

        // Index: starts_at (for current-event queries)
        manager
            .create_index(
                Index::create()
                    .name("idx_event_starts_at")
                    .table(Event::Table)
                    .col(Event::StartsAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Event::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Event {
    Table,
    Id,
    GroupId,
    Title,
    Email,
    Tel,
    Lat,
    Lon,
    StartsAt,
    EndsAt,
    Description,
    Photo,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Group {
    Table,
    Id,
}
