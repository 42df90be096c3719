use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integration_log_record")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub log_id: Uuid,
    /// JSON text of the transformed record
    pub record: String,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::integration_log::Entity",
        from = "Column::LogId",
        to = "super::integration_log::Column::Id",
        on_delete = "Cascade"
    )]
    IntegrationLog,
}

impl Related<super::integration_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IntegrationLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
