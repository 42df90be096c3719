use reqwest::{Method, StatusCode};
use serde_json::{Value, json};

use super::{Probe, SourceStrategy, StrategyContext, StrategyError};
use crate::model::WebhookConfig;

/// Inbound data: the payload pushed to the source is the data. No external
/// call is made to fetch it.
pub struct WebhookStrategy {
    cfg: WebhookConfig,
    payload: Option<Value>,
}

impl WebhookStrategy {
    /// `payload` overrides the stored payload for this run.
    pub fn new(cfg: WebhookConfig, payload: Option<Value>) -> Self {
        Self { cfg, payload }
    }
}

#[async_trait::async_trait]
impl SourceStrategy for WebhookStrategy {
    async fn test_connection(&self, ctx: &StrategyContext) -> Result<Probe, StrategyError> {
        let Some(target) = self.cfg.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            return Ok(Probe::new("Webhook has no target URL; inbound payloads only"));
        };
        let target = url::Url::parse(target)
            .map_err(|e| StrategyError::Config(format!("Invalid webhook URL '{target}': {e}")))?;
        let method = Method::from_bytes(self.cfg.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| StrategyError::Config(format!("Invalid HTTP method: {}", self.cfg.method)))?;

        let mut req = ctx
            .http
            .request(method.clone(), target)
            .timeout(ctx.connect_timeout);
        for (name, value) in &self.cfg.headers {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            req = req.header(name.as_str(), value);
        }
        let status = req.send().await?.status();

        // the endpoint exists and takes the method; a 4xx for an empty body is fine
        if status == StatusCode::NOT_FOUND
            || status == StatusCode::METHOD_NOT_ALLOWED
            || status.is_server_error()
        {
            return Err(StrategyError::Http {
                status: status.as_u16(),
                body: format!("webhook target rejected {method}"),
            });
        }
        Ok(
            Probe::new(format!("Webhook target accepts {method} (HTTP {})", status.as_u16()))
                .with_data(json!({"status": status.as_u16()})),
        )
    }

    async fn fetch(&self, _ctx: &StrategyContext) -> Result<Value, StrategyError> {
        Ok(self
            .payload
            .clone()
            .or_else(|| self.cfg.payload.clone())
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }
}
