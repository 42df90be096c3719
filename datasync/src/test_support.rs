use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use uuid::Uuid;

use crate::entity::data_source;

pub const TEST_KEY: [u8; 32] = [42u8; 32];

pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

/// An active webhook source writing to `sales`, with no secrets.
pub async fn create_source(db: &DatabaseConnection, name: &str) -> data_source::Model {
    let now = Utc::now().naive_utc();
    data_source::ActiveModel {
        id: Set(Uuid::now_v7()),
        name: Set(name.to_string()),
        ds_type: Set("webhook".to_string()),
        config: Set(r#"{"method":"POST"}"#.to_string()),
        secure_config: Set(String::new()),
        module: Set(r#"{"table":"sales"}"#.to_string()),
        status: Set("active".to_string()),
        query: Set(None),
        last_sync: Set(None),
        sync_frequency: Set(3600),
        is_active: Set(true),
        created_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}
