use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MappingRule::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MappingRule::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MappingRule::DataSourceId).uuid().not_null())
                    .col(ColumnDef::new(MappingRule::SourceField).string().not_null())
                    .col(ColumnDef::new(MappingRule::TargetField).string().not_null())
                    .col(
                        ColumnDef::new(MappingRule::Transformation)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(MappingRule::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MappingRule::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mapping_rule_datasource")
                            .from(MappingRule::Table, MappingRule::DataSourceId)
                            .to(DataSource::Table, DataSource::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .unique()
                    .name("uq_mapping_rule_ds_source_target")
                    .table(MappingRule::Table)
                    .col(MappingRule::DataSourceId)
                    .col(MappingRule::SourceField)
                    .col(MappingRule::TargetField)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MappingRule::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum MappingRule {
    Table,
    Id,
    DataSourceId,
    SourceField,
    TargetField,
    Transformation,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum DataSource {
    Table,
    Id,
}
