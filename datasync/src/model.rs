//! Strongly typed views of the schemaless columns on `data_source`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::sql;

// ---------- data source type ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
    InternalModule,
    Api,
    Database,
    File,
    Webhook,
}

impl DataSourceType {
    pub const ALL: [DataSourceType; 5] = [
        DataSourceType::InternalModule,
        DataSourceType::Api,
        DataSourceType::Database,
        DataSourceType::File,
        DataSourceType::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::InternalModule => "internal_module",
            DataSourceType::Api => "api",
            DataSourceType::Database => "database",
            DataSourceType::File => "file",
            DataSourceType::Webhook => "webhook",
        }
    }
}

impl FromStr for DataSourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown data source type: {s}"))
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------- statuses ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Inactive,
    Active,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Inactive => "inactive",
            SourceStatus::Active => "active",
            SourceStatus::Error => "error",
        }
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(SourceStatus::Inactive),
            "active" => Ok(SourceStatus::Active),
            "error" => Ok(SourceStatus::Error),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in_progress",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "in_progress" => Ok(RunStatus::InProgress),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("Unknown run status: {other}")),
        }
    }
}

// ---------- module (destination tables) ----------

/// The pipeline's own tables. Payload rows must never land in them.
const RESERVED_TABLES: &[&str] = &[
    "data_source",
    "mapping_rule",
    "integration_log",
    "integration_log_record",
    "seaql_migrations",
];

fn is_reserved_table(name: &str) -> bool {
    let (_, table) = sql::split_table_ref(name);
    let table = table.to_ascii_lowercase();
    RESERVED_TABLES.contains(&table.as_str()) || table.starts_with("sqlite_")
}

/// Accepted shapes: `"sales"`, `["sales", "sales_archive"]`,
/// `{"table": "sales"}`, `{"tables": [...]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ModuleSpec {
    Name(String),
    Names(Vec<String>),
    Object {
        #[serde(default)]
        table: Option<String>,
        #[serde(default)]
        tables: Vec<String>,
    },
}

impl ModuleSpec {
    pub fn parse(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("Invalid module spec: {e}"))
    }

    /// Ordered, de-duplicated, validated destination table names.
    pub fn destination_tables(&self) -> Result<Vec<String>, String> {
        let candidates: Vec<&str> = match self {
            ModuleSpec::Name(name) => vec![name.as_str()],
            ModuleSpec::Names(names) => names.iter().map(String::as_str).collect(),
            ModuleSpec::Object { table, tables } => table
                .iter()
                .chain(tables.iter())
                .map(String::as_str)
                .collect(),
        };

        let mut out: Vec<String> = Vec::new();
        for name in candidates.into_iter().map(str::trim).filter(|n| !n.is_empty()) {
            if !sql::is_valid_table_ref(name) {
                return Err(format!("Invalid destination table name: {name}"));
            }
            if is_reserved_table(name) {
                return Err(format!("Destination table is reserved: {name}"));
            }
            if !out.iter().any(|t| t == name) {
                out.push(name.to_string());
            }
        }

        if out.is_empty() {
            return Err("Module does not name any destination table".to_string());
        }
        Ok(out)
    }
}

// ---------- per-type connection config ----------

fn default_get() -> String {
    "GET".to_string()
}

fn default_post() -> String {
    "POST".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_sslmode() -> String {
    "prefer".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InternalModuleConfig {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_get")]
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Dotted path into the response body, e.g. `data.items`.
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub auth_header: Option<String>,
}

impl ApiConfig {
    pub fn url(&self) -> Result<url::Url, String> {
        let base = self.base_url.trim().trim_end_matches('/');
        let full = match self.endpoint.as_deref().map(str::trim) {
            Some(ep) if !ep.is_empty() => format!("{base}/{}", ep.trim_start_matches('/')),
            _ => base.to_string(),
        };
        url::Url::parse(&full).map_err(|e| format!("Invalid API URL '{full}': {e}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Auto,
    Json,
    Ndjson,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: FileFormat,
    #[serde(default)]
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_post")]
    pub method: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// Inbound payload used as the sync data.
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Connection configuration, decoded per data-source type.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    InternalModule(InternalModuleConfig),
    Api(ApiConfig),
    Database(DatabaseConfig),
    File(FileConfig),
    Webhook(WebhookConfig),
}

impl ConnectionConfig {
    /// Decode the merged (non-secret + decrypted secret) config for `ds_type`.
    pub fn decode(
        ds_type: DataSourceType,
        config: Map<String, Value>,
        secrets: Map<String, Value>,
    ) -> Result<Self, String> {
        let mut merged = config;
        merged.extend(secrets);
        let value = Value::Object(merged);
        let err = |e: serde_json::Error| format!("Invalid {ds_type} connection config: {e}");

        Ok(match ds_type {
            DataSourceType::InternalModule => {
                ConnectionConfig::InternalModule(serde_json::from_value(value).map_err(err)?)
            }
            DataSourceType::Api => ConnectionConfig::Api(serde_json::from_value(value).map_err(err)?),
            DataSourceType::Database => {
                ConnectionConfig::Database(serde_json::from_value(value).map_err(err)?)
            }
            DataSourceType::File => ConnectionConfig::File(serde_json::from_value(value).map_err(err)?),
            DataSourceType::Webhook => {
                ConnectionConfig::Webhook(serde_json::from_value(value).map_err(err)?)
            }
        })
    }

    pub fn kind(&self) -> DataSourceType {
        match self {
            ConnectionConfig::InternalModule(_) => DataSourceType::InternalModule,
            ConnectionConfig::Api(_) => DataSourceType::Api,
            ConnectionConfig::Database(_) => DataSourceType::Database,
            ConnectionConfig::File(_) => DataSourceType::File,
            ConnectionConfig::Webhook(_) => DataSourceType::Webhook,
        }
    }
}
