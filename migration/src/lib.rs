pub use sea_orm_migration::prelude::*;

mod m20260801_000001_create_data_sources;
mod m20260801_000002_create_mapping_rules;
mod m20260802_000003_create_integration_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_000001_create_data_sources::Migration),
            Box::new(m20260801_000002_create_mapping_rules::Migration),
            Box::new(m20260802_000003_create_integration_logs::Migration),
        ]
    }
}
