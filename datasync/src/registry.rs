//! Durable store of data-source definitions.

use chrono::{NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::crypto;
use crate::entity::{data_source, mapping_rule};
use crate::error::{PipelineError, Result};
use crate::model::{ConnectionConfig, DataSourceType, ModuleSpec, SourceStatus};
use crate::source_types;

pub const DEFAULT_SYNC_FREQUENCY: i64 = 3600;

fn default_sync_frequency() -> i64 {
    DEFAULT_SYNC_FREQUENCY
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDataSource {
    pub name: String,
    #[serde(rename = "type")]
    pub ds_type: DataSourceType,
    #[serde(default)]
    pub connection_config: Value,
    #[serde(default)]
    pub module: Value,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: i64,
    #[serde(default)]
    pub status: Option<SourceStatus>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Partial update. Absent fields are left untouched; `connection_config` is
/// merged field by field (see [`source_types::merge_config`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDataSource {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub connection_config: Option<Value>,
    #[serde(default)]
    pub module: Option<Value>,
    /// An empty string clears the stored query.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub sync_frequency: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSourceFilter {
    #[serde(default, rename = "type")]
    pub ds_type: Option<DataSourceType>,
    #[serde(default)]
    pub status: Option<SourceStatus>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// Read model of a data source. Secret values never leave the registry;
/// only the names of the configured secret fields are exposed.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceView {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub ds_type: String,
    pub connection_config: Value,
    pub secret_fields: Vec<String>,
    pub module: Value,
    pub status: String,
    pub query: Option<String>,
    pub last_sync: Option<NaiveDateTime>,
    pub sync_frequency: i64,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A data source with its connection config decrypted, ready for a strategy.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub model: data_source::Model,
    pub ds_type: DataSourceType,
    pub status: SourceStatus,
    pub config: Map<String, Value>,
    pub secrets: Map<String, Value>,
}

impl ResolvedSource {
    pub fn id(&self) -> Uuid {
        self.model.id
    }

    pub fn connection(&self) -> std::result::Result<ConnectionConfig, String> {
        ConnectionConfig::decode(self.ds_type, self.config.clone(), self.secrets.clone())
    }

    pub fn module(&self) -> std::result::Result<ModuleSpec, String> {
        ModuleSpec::parse(&self.model.module)
    }

    /// Stored source query, falling back to the `query` connection field.
    pub fn query(&self) -> Option<String> {
        self.model
            .query
            .clone()
            .or_else(|| self.config.get("query").and_then(Value::as_str).map(str::to_string))
            .filter(|q| !q.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct DataSourceRegistry {
    db: DatabaseConnection,
    master_key: [u8; 32],
}

fn parse_object(raw: &str, what: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(PipelineError::validation(format!("{what} is not a JSON object"))),
    }
}

/// Validate a module document and return its stored text form.
fn module_text(module: &Value) -> Result<String> {
    match module {
        Value::Null => Ok("{}".to_string()),
        Value::Object(map) if map.is_empty() => Ok("{}".to_string()),
        other => {
            let spec: ModuleSpec = serde_json::from_value(other.clone())
                .map_err(|e| PipelineError::validation(format!("Invalid module: {e}")))?;
            spec.destination_tables().map_err(PipelineError::validation)?;
            Ok(other.to_string())
        }
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PipelineError::validation("name is required"));
    }
    Ok(name.to_string())
}

fn validate_frequency(secs: i64) -> Result<i64> {
    if secs <= 0 {
        return Err(PipelineError::validation("sync_frequency must be positive"));
    }
    Ok(secs)
}

impl DataSourceRegistry {
    pub fn new(db: DatabaseConnection, master_key: [u8; 32]) -> Self {
        Self { db, master_key }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn create(&self, input: CreateDataSource) -> Result<data_source::Model> {
        let name = validate_name(&input.name)?;
        let sync_frequency = validate_frequency(input.sync_frequency)?;
        let module = module_text(&input.module)?;

        let (config, secure) = source_types::split_config(input.ds_type, input.connection_config)
            .map_err(|e| PipelineError::validation(e.to_string()))?;
        let secure_str = crypto::seal_secrets(&secure, &self.master_key)?;

        let now = Utc::now().naive_utc();
        let model = data_source::ActiveModel {
            id: Set(Uuid::now_v7()),
            name: Set(name),
            ds_type: Set(input.ds_type.as_str().to_string()),
            config: Set(Value::Object(config).to_string()),
            secure_config: Set(secure_str),
            module: Set(module),
            status: Set(input.status.unwrap_or(SourceStatus::Inactive).as_str().to_string()),
            query: Set(input.query.filter(|q| !q.trim().is_empty())),
            last_sync: Set(None),
            sync_frequency: Set(sync_frequency),
            is_active: Set(true),
            created_by: Set(input.created_by),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(data_source_id = %model.id, ds_type = %model.ds_type, "data source created");
        Ok(model)
    }

    /// Excludes soft-deleted sources.
    pub async fn get(&self, id: Uuid) -> Result<Option<data_source::Model>> {
        Ok(data_source::Entity::find_by_id(id)
            .filter(data_source::Column::IsActive.eq(true))
            .one(&self.db)
            .await?)
    }

    pub async fn get_view(&self, id: Uuid) -> Result<Option<DataSourceView>> {
        match self.get(id).await? {
            Some(model) => Ok(Some(self.view(model)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, filter: &DataSourceFilter) -> Result<Vec<data_source::Model>> {
        let mut query = data_source::Entity::find();
        if !filter.include_deleted {
            query = query.filter(data_source::Column::IsActive.eq(true));
        }
        if let Some(t) = filter.ds_type {
            query = query.filter(data_source::Column::DsType.eq(t.as_str()));
        }
        if let Some(s) = filter.status {
            query = query.filter(data_source::Column::Status.eq(s.as_str()));
        }
        if let Some(ref search) = filter.search
            && !search.trim().is_empty()
        {
            query = query.filter(data_source::Column::Name.contains(search.trim()));
        }
        Ok(query
            .order_by_asc(data_source::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// `Ok(None)` when the id does not resolve.
    pub async fn update(
        &self,
        id: Uuid,
        patch: UpdateDataSource,
    ) -> Result<Option<data_source::Model>> {
        let Some(model) = self.get(id).await? else {
            return Ok(None);
        };
        let ds_type = parse_type(&model)?;
        let mut active = model.clone().into_active_model();

        if let Some(name) = patch.name {
            active.name = Set(validate_name(&name)?);
        }
        if let Some(module) = patch.module {
            active.module = Set(module_text(&module)?);
        }
        if let Some(query) = patch.query {
            active.query = Set(Some(query).filter(|q| !q.trim().is_empty()));
        }
        if let Some(freq) = patch.sync_frequency {
            active.sync_frequency = Set(validate_frequency(freq)?);
        }
        if let Some(input) = patch.connection_config {
            let existing_config = parse_object(&model.config, "config")?;
            let existing_secure = crypto::open_secrets(&model.secure_config, &self.master_key)?;
            let (config, secure) =
                source_types::merge_config(ds_type, existing_config, existing_secure, input)
                    .map_err(|e| PipelineError::validation(e.to_string()))?;
            active.config = Set(Value::Object(config).to_string());
            active.secure_config = Set(crypto::seal_secrets(&secure, &self.master_key)?);
        }
        active.updated_at = Set(Utc::now().naive_utc());

        Ok(Some(active.update(&self.db).await?))
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: SourceStatus,
    ) -> Result<Option<data_source::Model>> {
        let Some(model) = self.get(id).await? else {
            return Ok(None);
        };
        let mut active = model.into_active_model();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Utc::now().naive_utc());
        Ok(Some(active.update(&self.db).await?))
    }

    /// Marks the source deleted and inactive. Returns false when nothing matched.
    pub async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let Some(model) = self.get(id).await? else {
            return Ok(false);
        };
        let mut active = model.into_active_model();
        active.is_active = Set(false);
        active.status = Set(SourceStatus::Inactive.as_str().to_string());
        active.updated_at = Set(Utc::now().naive_utc());
        active.update(&self.db).await?;
        tracing::info!(data_source_id = %id, "data source soft-deleted");
        Ok(true)
    }

    /// Removes the row and its mapping rules. Integration logs are kept.
    pub async fn hard_delete(&self, id: Uuid) -> Result<bool> {
        let txn = self.db.begin().await?;
        mapping_rule::Entity::delete_many()
            .filter(mapping_rule::Column::DataSourceId.eq(id))
            .exec(&txn)
            .await?;
        let res = data_source::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        if res.rows_affected > 0 {
            tracing::info!(data_source_id = %id, "data source deleted");
        }
        Ok(res.rows_affected > 0)
    }

    pub async fn list_active(&self) -> Result<Vec<data_source::Model>> {
        self.list(&DataSourceFilter {
            status: Some(SourceStatus::Active),
            ..Default::default()
        })
        .await
    }

    /// Active sources never synced, or whose last sync is older than their frequency.
    pub async fn list_active_due(&self, now: NaiveDateTime) -> Result<Vec<data_source::Model>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|ds| is_due(ds, now))
            .collect())
    }

    pub async fn touch_last_sync(&self, id: Uuid) -> Result<()> {
        let now = Utc::now().naive_utc();
        data_source::Entity::update_many()
            .col_expr(data_source::Column::LastSync, sea_orm::sea_query::Expr::value(now))
            .col_expr(data_source::Column::UpdatedAt, sea_orm::sea_query::Expr::value(now))
            .filter(data_source::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub fn resolve(&self, model: data_source::Model) -> Result<ResolvedSource> {
        let ds_type = parse_type(&model)?;
        let status = model
            .status
            .parse::<SourceStatus>()
            .map_err(PipelineError::Validation)?;
        let config = parse_object(&model.config, "config")?;
        let secrets = crypto::open_secrets(&model.secure_config, &self.master_key)?;
        Ok(ResolvedSource {
            model,
            ds_type,
            status,
            config,
            secrets,
        })
    }

    pub fn view(&self, model: data_source::Model) -> Result<DataSourceView> {
        let config = parse_object(&model.config, "config")?;
        let secrets = crypto::open_secrets(&model.secure_config, &self.master_key)?;
        let module = if model.module.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&model.module)?
        };
        Ok(DataSourceView {
            id: model.id,
            name: model.name,
            ds_type: model.ds_type,
            connection_config: Value::Object(config),
            secret_fields: secrets.keys().cloned().collect(),
            module,
            status: model.status,
            query: model.query,
            last_sync: model.last_sync,
            sync_frequency: model.sync_frequency,
            is_active: model.is_active,
            created_by: model.created_by,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

fn parse_type(model: &data_source::Model) -> Result<DataSourceType> {
    model
        .ds_type
        .parse::<DataSourceType>()
        .map_err(PipelineError::Validation)
}

pub fn is_due(ds: &data_source::Model, now: NaiveDateTime) -> bool {
    match ds.last_sync {
        None => true,
        Some(last) => last + chrono::Duration::seconds(ds.sync_frequency) < now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use serde_json::json;

    async fn registry() -> DataSourceRegistry {
        DataSourceRegistry::new(setup_db().await, [7u8; 32])
    }

    fn api_source(name: &str) -> CreateDataSource {
        serde_json::from_value(json!({
            "name": name,
            "type": "api",
            "connection_config": {
                "base_url": "https://api.example.com",
                "endpoint": "/orders",
                "api_key": "s3cr3t",
                "not_a_field": 1
            },
            "module": {"table": "sales"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_splits_and_hides_secrets() {
        let reg = registry().await;
        let model = reg.create(api_source("orders")).await.unwrap();

        let stored: Value = serde_json::from_str(&model.config).unwrap();
        assert!(stored.get("api_key").is_none());
        assert!(stored.get("not_a_field").is_none());
        assert_eq!(stored["method"], "GET");
        assert_eq!(model.status, "inactive");

        let view = reg.get_view(model.id).await.unwrap().unwrap();
        assert_eq!(view.secret_fields, vec!["api_key".to_string()]);
        assert!(view.connection_config.get("api_key").is_none());

        let resolved = reg.resolve(model).unwrap();
        assert_eq!(resolved.secrets["api_key"], "s3cr3t");
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let reg = registry().await;

        let mut missing = api_source("x");
        missing.connection_config = json!({"endpoint": "/a"});
        assert!(matches!(reg.create(missing).await, Err(PipelineError::Validation(_))));

        let mut bad_module = api_source("x");
        bad_module.module = json!("sales; drop table x");
        assert!(matches!(reg.create(bad_module).await, Err(PipelineError::Validation(_))));

        let blank = api_source("  ");
        assert!(matches!(reg.create(blank).await, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_merges_config_and_keeps_secret() {
        let reg = registry().await;
        let model = reg.create(api_source("orders")).await.unwrap();

        let patch: UpdateDataSource = serde_json::from_value(json!({
            "name": "orders v2",
            "connection_config": {"endpoint": "/v2/orders", "api_key": ""}
        }))
        .unwrap();
        let updated = reg.update(model.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.name, "orders v2");

        let resolved = reg.resolve(updated).unwrap();
        assert_eq!(resolved.config["endpoint"], "/v2/orders");
        assert_eq!(resolved.config["base_url"], "https://api.example.com");
        assert_eq!(resolved.secrets["api_key"], "s3cr3t");
    }

    #[tokio::test]
    async fn test_update_missing_id_is_none() {
        let reg = registry().await;
        let out = reg
            .update(Uuid::now_v7(), UpdateDataSource::default())
            .await
            .unwrap();
        assert!(out.is_none());
        assert!(
            reg.update_status(Uuid::now_v7(), SourceStatus::Active)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_soft_delete_hides_and_hard_delete_removes() {
        let reg = registry().await;
        let a = reg.create(api_source("a")).await.unwrap();
        let b = reg.create(api_source("b")).await.unwrap();

        assert!(reg.soft_delete(a.id).await.unwrap());
        assert!(reg.get(a.id).await.unwrap().is_none());
        assert!(!reg.soft_delete(a.id).await.unwrap());

        let listed = reg.list(&DataSourceFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        let all = reg
            .list(&DataSourceFilter {
                include_deleted: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        assert!(reg.hard_delete(b.id).await.unwrap());
        assert!(!reg.hard_delete(b.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_active_due() {
        let reg = registry().await;
        let never = reg.create(api_source("never")).await.unwrap();
        let recent = reg.create(api_source("recent")).await.unwrap();
        let stale = reg.create(api_source("stale")).await.unwrap();
        let inactive = reg.create(api_source("inactive")).await.unwrap();

        for id in [never.id, recent.id, stale.id] {
            reg.update_status(id, SourceStatus::Active).await.unwrap();
        }
        reg.touch_last_sync(recent.id).await.unwrap();

        let mut stale_model = reg.get(stale.id).await.unwrap().unwrap().into_active_model();
        stale_model.last_sync = Set(Some(Utc::now().naive_utc() - chrono::Duration::hours(2)));
        stale_model.update(reg.db()).await.unwrap();

        let due: Vec<Uuid> = reg
            .list_active_due(Utc::now().naive_utc())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert!(due.contains(&never.id));
        assert!(due.contains(&stale.id));
        assert!(!due.contains(&recent.id));
        assert!(!due.contains(&inactive.id));
    }
}
