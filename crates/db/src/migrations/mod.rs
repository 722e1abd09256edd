//! Database migrations.

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_user_table;
mod m20250101_000002_create_group_table;
mod m20250101_000003_create_event_table;
mod m20250101_000004_create_user_permission_table;

/// Migration runner for all scoutreg tables.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_user_table::Migration),
            Box::new(m20250101_000002_create_group_table::Migration),
            Box::new(m20250101_000003_create_event_table::Migration),
            Box::new(m20250101_000004_create_user_permission_table::Migration),
        ]
    }
}
