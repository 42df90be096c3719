use reqwest::Method;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

use super::{Probe, SourceStrategy, StrategyContext, StrategyError};
use crate::model::ApiConfig;

/// Pulls records from an HTTP endpoint.
pub struct ApiStrategy {
    cfg: ApiConfig,
}

impl ApiStrategy {
    pub fn new(cfg: ApiConfig) -> Self {
        Self { cfg }
    }

    fn request(
        &self,
        ctx: &StrategyContext,
        timeout: Option<Duration>,
    ) -> Result<reqwest::RequestBuilder, StrategyError> {
        let url = self.cfg.url().map_err(StrategyError::Config)?;
        let method = Method::from_bytes(self.cfg.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| StrategyError::Config(format!("Invalid HTTP method: {}", self.cfg.method)))?;

        let mut req = ctx.http.request(method.clone(), url);

        if !self.cfg.params.is_empty() {
            let params: Vec<(String, String)> = self
                .cfg
                .params
                .iter()
                .map(|(k, v)| (k.clone(), scalar_text(v)))
                .collect();
            req = req.query(&params);
        }
        for (name, value) in &self.cfg.headers {
            req = req.header(name.as_str(), scalar_text(value));
        }
        if let Some(ref key) = self.cfg.api_key {
            req = match self.cfg.auth_header.as_deref().map(str::trim) {
                Some(header) if !header.is_empty() => req.header(header, key.as_str()),
                _ => req.bearer_auth(key),
            };
        }
        if let Some(ref body) = self.cfg.body
            && method != Method::GET
            && method != Method::HEAD
        {
            req = req.json(body);
        }

        let timeout = self.cfg.timeout_secs.map(Duration::from_secs).or(timeout);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        Ok(req)
    }
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Follow a dotted path (`data.items`, `results.0.rows`) into a JSON document.
pub fn extract_path(body: Value, path: &str) -> Result<Value, StrategyError> {
    let mut current = body;
    for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(mut map) => map.remove(segment),
            Value::Array(mut items) => segment
                .parse::<usize>()
                .ok()
                .filter(|i| *i < items.len())
                .map(|i| items.swap_remove(i)),
            _ => None,
        }
        .ok_or_else(|| StrategyError::Parse(format!("data_path '{path}' not found in response")))?;
    }
    Ok(current)
}

#[async_trait::async_trait]
impl SourceStrategy for ApiStrategy {
    async fn test_connection(&self, ctx: &StrategyContext) -> Result<Probe, StrategyError> {
        let started = Instant::now();
        let resp = self.request(ctx, Some(ctx.connect_timeout))?.send().await?;
        let status = resp.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            return Err(StrategyError::Http {
                status: status.as_u16(),
                body: format!("endpoint answered in {elapsed_ms} ms"),
            });
        }
        Ok(
            Probe::new(format!("API reachable (HTTP {}) in {elapsed_ms} ms", status.as_u16()))
                .with_data(json!({"status": status.as_u16(), "elapsed_ms": elapsed_ms})),
        )
    }

    async fn fetch(&self, ctx: &StrategyContext) -> Result<Value, StrategyError> {
        let resp = self.request(ctx, None)?.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StrategyError::Http {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| StrategyError::Parse(e.to_string()))?;
        match self.cfg.data_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => extract_path(body, path),
            _ => Ok(body),
        }
    }
}
