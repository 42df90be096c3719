use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "data_source")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub ds_type: String,
    /// JSON text: non-secret connection params (base_url, host, path, table, ...)
    pub config: String,
    /// AES-256-GCM encrypted base64: secret params (password, api_key, ...)
    pub secure_config: String,
    /// JSON text naming the destination table(s)
    pub module: String,
    pub status: String,
    pub query: Option<String>,
    pub last_sync: Option<DateTime>,
    /// Seconds between scheduled syncs
    pub sync_frequency: i64,
    /// Soft-delete flag
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::mapping_rule::Entity")]
    MappingRule,
}

impl Related<super::mapping_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MappingRule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
