//! Per-data-source field mapping rules.

use chrono::{NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set, Statement,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::formula::MAX_FORMULA_LEN;
use crate::engine::{FieldMapping, Transformation};
use crate::entity::{data_source, mapping_rule};
use crate::error::{PipelineError, Result, is_unique_violation};

#[derive(Debug, Clone, Deserialize)]
pub struct NewMappingRule {
    pub source_field: String,
    pub target_field: String,
    /// Either a JSON object or its encoded text.
    #[serde(default)]
    pub transformation: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingRulePatch {
    #[serde(default)]
    pub source_field: Option<String>,
    #[serde(default)]
    pub target_field: Option<String>,
    #[serde(default)]
    pub transformation: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingRuleView {
    pub id: i32,
    pub data_source_id: Uuid,
    pub source_field: String,
    pub target_field: String,
    pub transformation: Transformation,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<mapping_rule::Model> for MappingRuleView {
    fn from(m: mapping_rule::Model) -> Self {
        let transformation = stored_transformation(&m);
        Self {
            id: m.id,
            data_source_id: m.data_source_id,
            source_field: m.source_field,
            target_field: m.target_field,
            transformation,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

fn stored_transformation(m: &mapping_rule::Model) -> Transformation {
    serde_json::from_str(&m.transformation).unwrap_or_else(|e| {
        tracing::warn!(rule_id = m.id, error = %e, "stored transformation unreadable, using defaults");
        Transformation::default()
    })
}

/// Accepts a structured transformation or its JSON text.
pub fn parse_transformation(raw: Option<&Value>) -> Result<Transformation> {
    let invalid = |e: serde_json::Error| PipelineError::validation(format!("Invalid transformation: {e}"));
    let parsed: Transformation = match raw {
        None | Some(Value::Null) => return Ok(Transformation::default()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Transformation::default()),
        Some(Value::String(s)) => serde_json::from_str(s).map_err(invalid)?,
        Some(v @ Value::Object(_)) => serde_json::from_value(v.clone()).map_err(invalid)?,
        Some(_) => {
            return Err(PipelineError::validation(
                "Invalid transformation: expected an object",
            ));
        }
    };
    if let Some(formula) = &parsed.formula
        && formula.chars().count() > MAX_FORMULA_LEN
    {
        return Err(PipelineError::validation(format!(
            "Invalid transformation: formula longer than {MAX_FORMULA_LEN} characters"
        )));
    }
    Ok(parsed)
}

fn required(value: &str, field: &str) -> Result<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(PipelineError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

const DUPLICATE_RULE: &str = "Mapping rule already exists for this source and target field";

#[derive(Clone)]
pub struct MappingRuleStore {
    db: DatabaseConnection,
}

impl MappingRuleStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Rules in creation order, which is also their apply order.
    pub async fn list(&self, data_source_id: Uuid) -> Result<Vec<MappingRuleView>> {
        Ok(self
            .models(data_source_id)
            .await?
            .into_iter()
            .map(MappingRuleView::from)
            .collect())
    }

    pub async fn field_mappings(&self, data_source_id: Uuid) -> Result<Vec<FieldMapping>> {
        Ok(self
            .models(data_source_id)
            .await?
            .into_iter()
            .map(|m| FieldMapping {
                transformation: stored_transformation(&m),
                source_field: m.source_field,
                target_field: m.target_field,
            })
            .collect())
    }

    async fn models(&self, data_source_id: Uuid) -> Result<Vec<mapping_rule::Model>> {
        Ok(mapping_rule::Entity::find()
            .filter(mapping_rule::Column::DataSourceId.eq(data_source_id))
            .order_by_asc(mapping_rule::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn add(&self, data_source_id: Uuid, rule: NewMappingRule) -> Result<MappingRuleView> {
        let source_field = required(&rule.source_field, "source_field")?;
        let target_field = required(&rule.target_field, "target_field")?;
        let transformation = parse_transformation(rule.transformation.as_ref())?;

        let exists = data_source::Entity::find_by_id(data_source_id)
            .filter(data_source::Column::IsActive.eq(true))
            .one(&self.db)
            .await?
            .is_some();
        if !exists {
            return Err(PipelineError::not_found("Data source not found"));
        }

        let encoded = serde_json::to_string(&transformation)?;
        let mut repaired = false;
        loop {
            match self
                .insert(data_source_id, &source_field, &target_field, &encoded)
                .await
            {
                Ok(model) => return Ok(model.into()),
                Err(e) if is_unique_violation(&e) => {
                    if self
                        .find_tuple(data_source_id, &source_field, &target_field)
                        .await?
                        .is_some()
                        || repaired
                    {
                        return Err(PipelineError::conflict(DUPLICATE_RULE));
                    }
                    // the id generator fell behind the table; realign and retry once
                    tracing::warn!(error = %e, "mapping_rule primary key collision, repairing sequence");
                    repair_sequence(&self.db).await?;
                    repaired = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn insert(
        &self,
        data_source_id: Uuid,
        source_field: &str,
        target_field: &str,
        transformation: &str,
    ) -> std::result::Result<mapping_rule::Model, DbErr> {
        let now = Utc::now().naive_utc();
        mapping_rule::ActiveModel {
            data_source_id: Set(data_source_id),
            source_field: Set(source_field.to_string()),
            target_field: Set(target_field.to_string()),
            transformation: Set(transformation.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }

    async fn find_tuple(
        &self,
        data_source_id: Uuid,
        source_field: &str,
        target_field: &str,
    ) -> Result<Option<mapping_rule::Model>> {
        Ok(mapping_rule::Entity::find()
            .filter(mapping_rule::Column::DataSourceId.eq(data_source_id))
            .filter(mapping_rule::Column::SourceField.eq(source_field))
            .filter(mapping_rule::Column::TargetField.eq(target_field))
            .one(&self.db)
            .await?)
    }

    /// `Ok(None)` when the rule does not exist under `data_source_id`.
    pub async fn update(
        &self,
        data_source_id: Uuid,
        rule_id: i32,
        patch: MappingRulePatch,
    ) -> Result<Option<MappingRuleView>> {
        let Some(model) = self.scoped(data_source_id, rule_id).await? else {
            return Ok(None);
        };
        let mut active = model.into_active_model();

        if let Some(ref source_field) = patch.source_field {
            active.source_field = Set(required(source_field, "source_field")?);
        }
        if let Some(ref target_field) = patch.target_field {
            active.target_field = Set(required(target_field, "target_field")?);
        }
        if patch.transformation.is_some() {
            let t = parse_transformation(patch.transformation.as_ref())?;
            active.transformation = Set(serde_json::to_string(&t)?);
        }
        active.updated_at = Set(Utc::now().naive_utc());

        match active.update(&self.db).await {
            Ok(model) => Ok(Some(model.into())),
            Err(e) if is_unique_violation(&e) => Err(PipelineError::conflict(DUPLICATE_RULE)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, data_source_id: Uuid, rule_id: i32) -> Result<bool> {
        let res = mapping_rule::Entity::delete_many()
            .filter(mapping_rule::Column::Id.eq(rule_id))
            .filter(mapping_rule::Column::DataSourceId.eq(data_source_id))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn scoped(&self, data_source_id: Uuid, rule_id: i32) -> Result<Option<mapping_rule::Model>> {
        Ok(mapping_rule::Entity::find_by_id(rule_id)
            .filter(mapping_rule::Column::DataSourceId.eq(data_source_id))
            .one(&self.db)
            .await?)
    }
}

/// Realign the `mapping_rule` id generator with the current max id.
pub async fn repair_sequence<C: ConnectionTrait>(db: &C) -> std::result::Result<(), DbErr> {
    let backend = db.get_database_backend();
    match backend {
        DbBackend::Postgres => {
            db.execute(Statement::from_string(
                backend,
                "SELECT setval(pg_get_serial_sequence('mapping_rule', 'id'), \
                 COALESCE((SELECT MAX(id) FROM mapping_rule), 0) + 1, false)",
            ))
            .await?;
        }
        DbBackend::Sqlite => {
            db.execute(Statement::from_string(
                backend,
                "UPDATE sqlite_sequence SET seq = (SELECT COALESCE(MAX(id), 0) FROM mapping_rule) \
                 WHERE name = 'mapping_rule'",
            ))
            .await?;
        }
        DbBackend::MySql => {
            let max_id: i64 = match db
                .query_one(Statement::from_string(
                    backend,
                    "SELECT COALESCE(MAX(id), 0) AS max_id FROM mapping_rule",
                ))
                .await?
            {
                Some(row) => row.try_get("", "max_id")?,
                None => 0,
            };
            db.execute(Statement::from_string(
                backend,
                format!("ALTER TABLE mapping_rule AUTO_INCREMENT = {}", max_id + 1),
            ))
            .await?;
        }
    }
    tracing::debug!(?backend, "mapping_rule sequence repaired");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransformKind;
    use crate::test_support::{create_source, setup_db};
    use serde_json::json;

    fn rule(source: &str, target: &str, t: Value) -> NewMappingRule {
        NewMappingRule {
            source_field: source.to_string(),
            target_field: target.to_string(),
            transformation: Some(t),
        }
    }

    #[tokio::test]
    async fn test_duplicate_rule_is_conflict_and_stores_one() {
        let db = setup_db().await;
        let ds = create_source(&db, "orders").await;
        let store = MappingRuleStore::new(db);

        store
            .add(ds.id, rule("amount", "total", json!({"type": "number"})))
            .await
            .unwrap();
        let err = store
            .add(ds.id, rule("amount", "total", json!({"type": "string"})))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)), "got {err:?}");

        let rules = store.list(ds.id).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].transformation.kind, TransformKind::Number);
    }

    #[tokio::test]
    async fn test_add_validates_fields_and_transformation_text() {
        let db = setup_db().await;
        let ds = create_source(&db, "orders").await;
        let store = MappingRuleStore::new(db);

        let err = store.add(ds.id, rule(" ", "total", json!({}))).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let err = store
            .add(ds.id, rule("a", "b", json!("{not json")))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let view = store
            .add(ds.id, rule("a", "b", json!(r#"{"type":"date","default":null}"#)))
            .await
            .unwrap();
        assert_eq!(view.transformation.kind, TransformKind::Date);

        let err = store
            .add(Uuid::now_v7(), rule("a", "b", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_in_creation_order() {
        let db = setup_db().await;
        let ds = create_source(&db, "orders").await;
        let store = MappingRuleStore::new(db);

        for (s, t) in [("c", "x"), ("a", "y"), ("b", "z")] {
            store.add(ds.id, rule(s, t, json!({}))).await.unwrap();
        }
        let sources: Vec<String> = store
            .field_mappings(ds.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.source_field)
            .collect();
        assert_eq!(sources, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_are_scoped_to_data_source() {
        let db = setup_db().await;
        let mine = create_source(&db, "mine").await;
        let other = create_source(&db, "other").await;
        let store = MappingRuleStore::new(db);

        let r = store.add(mine.id, rule("a", "b", json!({}))).await.unwrap();

        let patch = MappingRulePatch {
            target_field: Some("c".to_string()),
            ..Default::default()
        };
        assert!(store.update(other.id, r.id, patch.clone()).await.unwrap().is_none());
        assert!(!store.delete(other.id, r.id).await.unwrap());

        let updated = store.update(mine.id, r.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.target_field, "c");
        assert!(store.delete(mine.id, r.id).await.unwrap());
        assert!(store.list(mine.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_into_existing_tuple_is_conflict() {
        let db = setup_db().await;
        let ds = create_source(&db, "orders").await;
        let store = MappingRuleStore::new(db);

        store.add(ds.id, rule("a", "x", json!({}))).await.unwrap();
        let second = store.add(ds.id, rule("a", "y", json!({}))).await.unwrap();
        let err = store
            .update(
                ds.id,
                second.id,
                MappingRulePatch {
                    target_field: Some("x".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_repair_sequence_realigns_sqlite_sequence() {
        let db = setup_db().await;
        let ds = create_source(&db, "orders").await;
        let store = MappingRuleStore::new(db.clone());
        store.add(ds.id, rule("a", "x", json!({}))).await.unwrap();
        let last = store.add(ds.id, rule("b", "y", json!({}))).await.unwrap();

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "UPDATE sqlite_sequence SET seq = 0 WHERE name = 'mapping_rule'",
        ))
        .await
        .unwrap();
        repair_sequence(&db).await.unwrap();

        let row = db
            .query_one(Statement::from_string(
                DbBackend::Sqlite,
                "SELECT seq FROM sqlite_sequence WHERE name = 'mapping_rule'",
            ))
            .await
            .unwrap()
            .unwrap();
        let seq: i64 = row.try_get("", "seq").unwrap();
        assert_eq!(seq, i64::from(last.id));
    }

    #[test]
    fn test_parse_transformation_shapes() {
        assert_eq!(parse_transformation(None).unwrap(), Transformation::default());
        let t = parse_transformation(Some(&json!({"type": "number", "default": 0}))).unwrap();
        assert_eq!(t.kind, TransformKind::Number);
        assert_eq!(t.default, json!(0));
        assert!(parse_transformation(Some(&json!([1]))).is_err());
        assert!(parse_transformation(Some(&json!({"type": "bogus"}))).is_err());
    }

    #[test]
    fn test_overlong_formula_is_rejected() {
        let long = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        let err = parse_transformation(Some(&json!({"formula": long}))).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(parse_transformation(Some(&json!({"formula": "((1))"}))).is_ok());
    }
}
