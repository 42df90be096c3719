//! Per-type connection-test and fetch strategies.
//!
//! A strategy never raises past the orchestrator or tester: every failure is
//! a [`StrategyError`] that is rendered into a `{success: false, message}` result.

use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::model::ConnectionConfig;
use crate::registry::ResolvedSource;

pub mod api;
pub mod database;
pub mod file;
pub mod internal;
pub mod webhook;

// ---------- DTOs ----------

/// Outcome of a successful connection test.
#[derive(Debug, Clone)]
pub struct Probe {
    pub message: String,
    pub data: Option<Value>,
}

impl Probe {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------- errors ----------

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Could not parse payload: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for StrategyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StrategyError::Connect(format!("request timed out: {e}"))
        } else {
            StrategyError::Connect(e.to_string())
        }
    }
}

// ---------- context ----------

/// Shared handles a strategy may need.
#[derive(Clone)]
pub struct StrategyContext {
    /// The pipeline's own store, read by `internal_module` sources.
    pub db: DatabaseConnection,
    pub http: reqwest::Client,
    /// Upper bound for a connection test.
    pub connect_timeout: Duration,
}

// ---------- trait ----------

#[async_trait::async_trait]
pub trait SourceStrategy: Send + Sync {
    /// Check reachability / credentials without fetching data.
    async fn test_connection(&self, ctx: &StrategyContext) -> Result<Probe, StrategyError>;

    /// Fetch the raw payload. Arrays are records; anything else is one record.
    async fn fetch(&self, ctx: &StrategyContext) -> Result<Value, StrategyError>;
}

// ---------- factory ----------

/// Build the strategy for a resolved source. `payload` replaces the stored
/// webhook payload and is ignored by other types.
pub fn create_strategy(
    source: &ResolvedSource,
    payload: Option<Value>,
) -> Result<Box<dyn SourceStrategy>, StrategyError> {
    let connection = source.connection().map_err(StrategyError::Config)?;
    Ok(match connection {
        ConnectionConfig::InternalModule(cfg) => {
            Box::new(internal::InternalModuleStrategy::new(cfg, source.model.query.clone()))
        }
        ConnectionConfig::Api(cfg) => Box::new(api::ApiStrategy::new(cfg)),
        ConnectionConfig::Database(cfg) => {
            Box::new(database::DatabaseStrategy::new(cfg, source.model.query.clone()))
        }
        ConnectionConfig::File(cfg) => Box::new(file::FileStrategy::new(cfg)),
        ConnectionConfig::Webhook(cfg) => Box::new(webhook::WebhookStrategy::new(cfg, payload)),
    })
}

/// Normalize a fetched payload into a sequence of raw records.
pub fn into_records(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_records_wraps_single_object() {
        assert_eq!(into_records(json!([{"a": 1}, {"a": 2}])).len(), 2);
        assert_eq!(into_records(json!({"a": 1})), vec![json!({"a": 1})]);
        assert!(into_records(Value::Null).is_empty());
        assert!(into_records(json!([])).is_empty());
    }
}
