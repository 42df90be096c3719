use serde_json::{Value, json};
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, NoTls};

use super::{Probe, SourceStrategy, StrategyContext, StrategyError};
use crate::model::DatabaseConfig;
use crate::sql;

/// Reads rows from an external Postgres database.
pub struct DatabaseStrategy {
    cfg: DatabaseConfig,
    source_query: Option<String>,
}

impl DatabaseStrategy {
    pub fn new(cfg: DatabaseConfig, source_query: Option<String>) -> Self {
        Self { cfg, source_query }
    }

    fn query(&self) -> Result<String, StrategyError> {
        let query = self
            .source_query
            .clone()
            .or_else(|| self.cfg.query.clone())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| StrategyError::Config("database source has no query".to_string()))?;
        if !sql::is_read_only_query(&query) {
            return Err(StrategyError::Config(
                "database source query must be a single SELECT statement".to_string(),
            ));
        }
        Ok(query.trim().trim_end_matches(';').to_string())
    }

    fn pg_config(&self, connect_timeout: Duration) -> tokio_postgres::Config {
        let ssl_mode = match self.cfg.sslmode.as_str() {
            "disable" => SslMode::Disable,
            "require" | "verify-ca" | "verify-full" => SslMode::Require,
            _ => SslMode::Prefer,
        };
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.cfg.host)
            .port(self.cfg.port)
            .dbname(&self.cfg.database)
            .user(&self.cfg.username)
            .ssl_mode(ssl_mode)
            .connect_timeout(connect_timeout)
            .application_name("datasync");
        if let Some(ref password) = self.cfg.password {
            config.password(password);
        }
        config
    }

    async fn connect(&self, connect_timeout: Duration) -> Result<Client, StrategyError> {
        let (client, connection) = self
            .pg_config(connect_timeout)
            .connect(NoTls)
            .await
            .map_err(|e| StrategyError::Connect(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("Source database connection error: {e}");
            }
        });
        Ok(client)
    }
}

#[async_trait::async_trait]
impl SourceStrategy for DatabaseStrategy {
    async fn test_connection(&self, ctx: &StrategyContext) -> Result<Probe, StrategyError> {
        let client = self.connect(ctx.connect_timeout).await?;
        let row = client
            .query_one("SELECT version()", &[])
            .await
            .map_err(|e| StrategyError::Query(e.to_string()))?;
        let version: String = row.get(0);
        Ok(Probe::new(format!(
            "Connected to {}:{}/{}",
            self.cfg.host, self.cfg.port, self.cfg.database
        ))
        .with_data(json!({"server_version": version})))
    }

    async fn fetch(&self, ctx: &StrategyContext) -> Result<Value, StrategyError> {
        let query = self.query()?;
        let client = self.connect(ctx.connect_timeout).await?;

        // let the server render each row so column types need no mapping here
        let wrapped = format!("SELECT row_to_json(t)::text FROM ({query}) AS t");
        let rows = client
            .query(wrapped.as_str(), &[])
            .await
            .map_err(|e| StrategyError::Query(e.to_string()))?;

        let records = rows
            .iter()
            .map(|row| {
                let text: String = row.get(0);
                serde_json::from_str(&text).map_err(|e| StrategyError::Parse(e.to_string()))
            })
            .collect::<Result<Vec<Value>, _>>()?;
        Ok(Value::Array(records))
    }
}
