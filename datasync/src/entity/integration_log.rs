use sea_orm::entity::prelude::*;
use uuid::Uuid;

/// One sync run. Not tied to `data_source` by a foreign key so the audit
/// trail survives a hard delete of its source.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "integration_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source_system: String,
    pub data_source_id: Option<Uuid>,
    pub record_count: i64,
    pub status: String,
    pub run_timestamp: DateTime,
    pub error_log: Option<String>,
    pub duration_seconds: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::integration_log_record::Entity")]
    IntegrationLogRecord,
}

impl Related<super::integration_log_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IntegrationLogRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
