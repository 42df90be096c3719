//! Connection tests. A test flips the source's status to `active` or `error`.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::model::SourceStatus;
use crate::registry::DataSourceRegistry;
use crate::strategy::{self, Probe, StrategyContext, StrategyError};

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestResult {
    pub data_source_id: Uuid,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ConnectionTestResult {
    pub fn failed(data_source_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            data_source_id,
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionTester {
    registry: DataSourceRegistry,
    ctx: StrategyContext,
}

impl ConnectionTester {
    pub fn new(registry: DataSourceRegistry, ctx: StrategyContext) -> Self {
        Self { registry, ctx }
    }

    /// Only an unknown id is an error; a failed test is an `Ok` result.
    pub async fn test(&self, id: Uuid) -> Result<ConnectionTestResult> {
        let model = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Data source not found"))?;

        let probe = match self.registry.resolve(model) {
            Ok(source) => self.probe(&source).await,
            Err(e) => Err(StrategyError::Config(e.to_string())),
        };

        let (status, result) = match probe {
            Ok(probe) => (
                SourceStatus::Active,
                ConnectionTestResult {
                    data_source_id: id,
                    success: true,
                    message: probe.message,
                    data: probe.data,
                },
            ),
            Err(e) => {
                tracing::warn!(data_source_id = %id, error = %e, "connection test failed");
                (SourceStatus::Error, ConnectionTestResult::failed(id, e.to_string()))
            }
        };

        self.registry.update_status(id, status).await?;
        Ok(result)
    }

    async fn probe(&self, source: &crate::registry::ResolvedSource) -> Result<Probe, StrategyError> {
        let strategy = strategy::create_strategy(source, None)?;
        let limit = self.ctx.connect_timeout;
        match tokio::time::timeout(limit, strategy.test_connection(&self.ctx)).await {
            Ok(res) => res,
            Err(_) => Err(StrategyError::Timeout(limit)),
        }
    }
}
