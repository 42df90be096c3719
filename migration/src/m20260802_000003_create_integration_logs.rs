use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // integration_log: no FK to data_source, run history outlives the source
        manager
            .create_table(
                Table::create()
                    .table(IntegrationLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IntegrationLog::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IntegrationLog::SourceSystem)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IntegrationLog::DataSourceId).uuid().null())
                    .col(
                        ColumnDef::new(IntegrationLog::RecordCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(IntegrationLog::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(IntegrationLog::RunTimestamp)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(IntegrationLog::ErrorLog).text().null())
                    .col(
                        ColumnDef::new(IntegrationLog::DurationSeconds)
                            .double()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_integration_log_ds_run")
                    .table(IntegrationLog::Table)
                    .col(IntegrationLog::DataSourceId)
                    .col(IntegrationLog::RunTimestamp)
                    .to_owned(),
            )
            .await?;

        // integration_log_record
        manager
            .create_table(
                Table::create()
                    .table(IntegrationLogRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IntegrationLogRecord::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IntegrationLogRecord::LogId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationLogRecord::Record)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationLogRecord::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_log_record_log")
                            .from(IntegrationLogRecord::Table, IntegrationLogRecord::LogId)
                            .to(IntegrationLog::Table, IntegrationLog::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_log_record_log")
                    .table(IntegrationLogRecord::Table)
                    .col(IntegrationLogRecord::LogId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IntegrationLogRecord::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IntegrationLog::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum IntegrationLog {
    Table,
    Id,
    SourceSystem,
    DataSourceId,
    RecordCount,
    Status,
    RunTimestamp,
    ErrorLog,
    DurationSeconds,
}

#[derive(Iden)]
enum IntegrationLogRecord {
    Table,
    Id,
    LogId,
    Record,
    CreatedAt,
}
