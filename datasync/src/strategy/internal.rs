use sea_orm::{ConnectionTrait, DbBackend, FromQueryResult, JsonValue, Statement};
use serde_json::{Value, json};

use super::{Probe, SourceStrategy, StrategyContext, StrategyError};
use crate::model::InternalModuleConfig;
use crate::sql;

/// Reads from a relation in the pipeline's own database.
pub struct InternalModuleStrategy {
    cfg: InternalModuleConfig,
    source_query: Option<String>,
}

/// What an internal source reads: a stored query or a whole table.
#[derive(Debug, PartialEq)]
enum Relation {
    Query {
        sql: String,
        table: Option<(Option<String>, String)>,
    },
    Table {
        schema: Option<String>,
        table: String,
    },
}

impl InternalModuleStrategy {
    pub fn new(cfg: InternalModuleConfig, source_query: Option<String>) -> Self {
        Self { cfg, source_query }
    }

    fn relation(&self) -> Result<Relation, StrategyError> {
        let query = self
            .source_query
            .clone()
            .or_else(|| self.cfg.query.clone())
            .filter(|q| !q.trim().is_empty());

        if let Some(query) = query {
            if !sql::is_read_only_query(&query) {
                return Err(StrategyError::Config(
                    "internal module query must be a single SELECT statement".to_string(),
                ));
            }
            let sql = query.trim().trim_end_matches(';').to_string();
            let table = sql::referenced_table(&sql);
            return Ok(Relation::Query { sql, table });
        }

        let table = self
            .cfg
            .table
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                StrategyError::Config("internal module needs a query or a table".to_string())
            })?;
        let schema = self
            .cfg
            .schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        for name in schema.iter().chain(std::iter::once(&table)) {
            if !sql::is_valid_ident(name) {
                return Err(StrategyError::Config(format!("Invalid identifier: {name}")));
            }
        }
        Ok(Relation::Table {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    fn select_sql(&self, relation: &Relation, backend: DbBackend, limit: Option<u32>) -> String {
        let base = match relation {
            Relation::Query { sql, .. } => match limit {
                Some(_) => format!("SELECT * FROM ({sql}) AS probe"),
                None => sql.clone(),
            },
            Relation::Table { schema, table } => {
                let target = match schema {
                    Some(s) if backend != DbBackend::Sqlite => format!("{s}.{table}"),
                    _ => table.clone(),
                };
                format!("SELECT * FROM {}", sql::quote_table_ref(backend, &target))
            }
        };
        match limit {
            Some(n) => format!("{base} LIMIT {n}"),
            None => base,
        }
    }

    /// Fail fast with an actionable message when the relation is missing.
    async fn ensure_exists(
        &self,
        db: &impl ConnectionTrait,
        relation: &Relation,
    ) -> Result<(), StrategyError> {
        let (schema, table) = match relation {
            Relation::Table { schema, table } => (schema.clone(), table.clone()),
            Relation::Query {
                table: Some((schema, table)),
                ..
            } => (schema.clone(), table.clone()),
            Relation::Query { table: None, .. } => return Ok(()),
        };

        if table_exists(db, schema.as_deref(), &table).await? {
            Ok(())
        } else {
            let name = match schema {
                Some(s) => format!("{s}.{table}"),
                None => table,
            };
            Err(StrategyError::Query(format!("Table '{name}' does not exist")))
        }
    }

    async fn run(
        &self,
        db: &impl ConnectionTrait,
        relation: &Relation,
        limit: Option<u32>,
    ) -> Result<Vec<JsonValue>, StrategyError> {
        let backend = db.get_database_backend();
        let stmt = Statement::from_string(backend, self.select_sql(relation, backend, limit));
        JsonValue::find_by_statement(stmt)
            .all(db)
            .await
            .map_err(|e| StrategyError::Query(e.to_string()))
    }
}

pub async fn table_exists(
    db: &impl ConnectionTrait,
    schema: Option<&str>,
    table: &str,
) -> Result<bool, StrategyError> {
    let backend = db.get_database_backend();
    let stmt = match backend {
        DbBackend::Sqlite => Statement::from_sql_and_values(
            backend,
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
            [table.into()],
        ),
        DbBackend::Postgres => Statement::from_sql_and_values(
            backend,
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2",
            [schema.unwrap_or("public").into(), table.into()],
        ),
        DbBackend::MySql => Statement::from_sql_and_values(
            backend,
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ?",
            [schema.map(str::to_string).into(), table.into()],
        ),
    };
    let row = db
        .query_one(stmt)
        .await
        .map_err(|e| StrategyError::Query(e.to_string()))?;
    Ok(row.is_some())
}

#[async_trait::async_trait]
impl SourceStrategy for InternalModuleStrategy {
    async fn test_connection(&self, ctx: &StrategyContext) -> Result<Probe, StrategyError> {
        let relation = self.relation()?;
        self.ensure_exists(&ctx.db, &relation).await?;
        let sample = self.run(&ctx.db, &relation, Some(1)).await?;
        Ok(Probe::new("Internal module is queryable")
            .with_data(json!({"sample": sample.into_iter().next()})))
    }

    async fn fetch(&self, ctx: &StrategyContext) -> Result<Value, StrategyError> {
        let relation = self.relation()?;
        self.ensure_exists(&ctx.db, &relation).await?;
        Ok(Value::Array(self.run(&ctx.db, &relation, None).await?))
    }
}
