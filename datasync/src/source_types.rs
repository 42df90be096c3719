use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::model::DataSourceType;

#[derive(Debug, Clone)]
pub enum FieldType {
    Text,
    Number,
    Select(Vec<&'static str>),
    TextArea,
    /// Free-form JSON object (headers, params, payload)
    Json,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub key: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub is_secret: bool,
    pub default_value: Option<&'static str>,
}

pub struct DataSourceTypeDef {
    pub ds_type: DataSourceType,
    pub label: &'static str,
    pub fields: Vec<FieldDef>,
}

fn field(key: &'static str, label: &'static str, field_type: FieldType) -> FieldDef {
    FieldDef {
        key,
        label,
        field_type,
        required: false,
        is_secret: false,
        default_value: None,
    }
}

impl FieldDef {
    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn secret(mut self) -> Self {
        self.is_secret = true;
        self
    }

    fn with_default(mut self, value: &'static str) -> Self {
        self.default_value = Some(value);
        self
    }
}

static TYPE_DEFS: OnceLock<Vec<DataSourceTypeDef>> = OnceLock::new();

pub fn get_type_defs() -> &'static [DataSourceTypeDef] {
    TYPE_DEFS.get_or_init(|| {
        vec![
            DataSourceTypeDef {
                ds_type: DataSourceType::InternalModule,
                label: "Internal module",
                fields: vec![
                    field("table", "Table", FieldType::Text),
                    field("schema", "Schema", FieldType::Text),
                    field("query", "Query", FieldType::TextArea),
                ],
            },
            DataSourceTypeDef {
                ds_type: DataSourceType::Api,
                label: "HTTP API",
                fields: vec![
                    field("base_url", "Base URL", FieldType::Text).required(),
                    field("endpoint", "Endpoint", FieldType::Text),
                    field(
                        "method",
                        "Method",
                        FieldType::Select(vec!["GET", "POST", "PUT"]),
                    )
                    .with_default("GET"),
                    field("headers", "Headers", FieldType::Json),
                    field("params", "Query parameters", FieldType::Json),
                    field("body", "Request body", FieldType::Json),
                    field("data_path", "Data path", FieldType::Text),
                    field("timeout_secs", "Timeout (seconds)", FieldType::Number).with_default("30"),
                    field("auth_header", "Auth header", FieldType::Text),
                    field("api_key", "API key", FieldType::Text).secret(),
                ],
            },
            DataSourceTypeDef {
                ds_type: DataSourceType::Database,
                label: "PostgreSQL",
                fields: vec![
                    field("host", "Host", FieldType::Text).required(),
                    field("port", "Port", FieldType::Number).required().with_default("5432"),
                    field("database", "Database", FieldType::Text).required(),
                    field("username", "Username", FieldType::Text).required(),
                    field("password", "Password", FieldType::Text).secret(),
                    field(
                        "sslmode",
                        "SSL Mode",
                        FieldType::Select(vec!["disable", "prefer", "require"]),
                    )
                    .with_default("prefer"),
                    field("query", "Query", FieldType::TextArea),
                ],
            },
            DataSourceTypeDef {
                ds_type: DataSourceType::File,
                label: "File",
                fields: vec![
                    field("path", "Path", FieldType::Text).required(),
                    field(
                        "format",
                        "Format",
                        FieldType::Select(vec!["auto", "json", "ndjson", "csv"]),
                    )
                    .with_default("auto"),
                    field("delimiter", "CSV delimiter", FieldType::Text),
                ],
            },
            DataSourceTypeDef {
                ds_type: DataSourceType::Webhook,
                label: "Webhook",
                fields: vec![
                    field("url", "Target URL", FieldType::Text),
                    field(
                        "method",
                        "Method",
                        FieldType::Select(vec!["POST", "PUT", "GET"]),
                    )
                    .with_default("POST"),
                    field("headers", "Headers", FieldType::Json),
                    field("payload", "Payload", FieldType::Json),
                ],
            },
        ]
    })
}

pub fn get_type_def(ds_type: DataSourceType) -> &'static DataSourceTypeDef {
    get_type_defs()
        .iter()
        .find(|d| d.ds_type == ds_type)
        .expect("every DataSourceType has a definition")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

fn coerce_field(field: &FieldDef, value: Value) -> Result<Value, ConfigError> {
    match (&field.field_type, value) {
        (FieldType::Number, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ConfigError::InvalidInput(format!("'{}' must be a number", field.key))),
        (FieldType::Number, v @ Value::Number(_)) => Ok(v),
        (FieldType::Number, _) => Err(ConfigError::InvalidInput(format!(
            "'{}' must be a number",
            field.key
        ))),
        (FieldType::Json, v @ (Value::Object(_) | Value::Array(_))) => Ok(v),
        (FieldType::Json, Value::String(s)) => serde_json::from_str(&s)
            .map_err(|_| ConfigError::InvalidInput(format!("'{}' must be JSON", field.key))),
        (FieldType::Select(opts), Value::String(s)) => {
            if opts.iter().any(|o| o.eq_ignore_ascii_case(&s)) {
                Ok(Value::String(s))
            } else {
                Err(ConfigError::InvalidInput(format!(
                    "'{}' must be one of {}",
                    field.key,
                    opts.join(", ")
                )))
            }
        }
        (_, v) => Ok(v),
    }
}

fn default_for(field: &FieldDef) -> Option<Value> {
    let default = field.default_value?;
    Some(match field.field_type {
        FieldType::Number => default.parse::<i64>().map(Value::from).ok()?,
        _ => Value::String(default.to_string()),
    })
}

/// Split a flat config input into (non_secret_config, secret_config).
/// Validates required fields are present (with defaults applied). Keys that
/// are not part of the type's registry are dropped.
pub fn split_config(
    ds_type: DataSourceType,
    config_input: Value,
) -> Result<(Map<String, Value>, Map<String, Value>), ConfigError> {
    let type_def = get_type_def(ds_type);

    let input = match config_input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => {
            return Err(ConfigError::InvalidInput(
                "connection_config must be a JSON object".to_string(),
            ));
        }
    };

    let mut config = Map::new();
    let mut secure = Map::new();

    for field in &type_def.fields {
        let resolved = match input.get(field.key).cloned().filter(|v| !v.is_null()) {
            Some(v) => coerce_field(field, v)?,
            None => match default_for(field) {
                Some(v) => v,
                None if field.required => {
                    return Err(ConfigError::MissingRequiredField(field.key.to_string()));
                }
                None => continue,
            },
        };

        if field.is_secret {
            secure.insert(field.key.to_string(), resolved);
        } else {
            config.insert(field.key.to_string(), resolved);
        }
    }

    Ok((config, secure))
}

/// Merge an update input with existing config + secrets.
/// Preserves existing values for fields not provided in `update_input`.
/// For secret fields: empty string means "keep existing".
pub fn merge_config(
    ds_type: DataSourceType,
    existing_config: Map<String, Value>,
    existing_secure: Map<String, Value>,
    update_input: Value,
) -> Result<(Map<String, Value>, Map<String, Value>), ConfigError> {
    let type_def = get_type_def(ds_type);

    let input = update_input
        .as_object()
        .ok_or_else(|| ConfigError::InvalidInput("connection_config must be a JSON object".to_string()))?;

    let mut config = Map::new();
    let mut secure = Map::new();

    for field in &type_def.fields {
        let (target, existing) = if field.is_secret {
            (&mut secure, &existing_secure)
        } else {
            (&mut config, &existing_config)
        };

        match input.get(field.key).cloned() {
            Some(Value::String(s)) if field.is_secret && s.is_empty() => {
                if let Some(prev) = existing.get(field.key).cloned() {
                    target.insert(field.key.to_string(), prev);
                }
            }
            // Explicit null clears the field
            Some(Value::Null) => {}
            Some(val) => {
                target.insert(field.key.to_string(), coerce_field(field, val)?);
            }
            None => {
                if let Some(prev) = existing.get(field.key).cloned() {
                    target.insert(field.key.to_string(), prev);
                }
            }
        }

        if field.required && !target.contains_key(field.key) {
            return Err(ConfigError::MissingRequiredField(field.key.to_string()));
        }
    }

    Ok((config, secure))
}

// ---------- API response types ----------

#[derive(Debug, Serialize)]
pub struct FieldDefResponse {
    pub key: String,
    pub label: String,
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub required: bool,
    pub is_secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DataSourceTypeResponse {
    pub ds_type: DataSourceType,
    pub label: String,
    pub fields: Vec<FieldDefResponse>,
}

impl From<&DataSourceTypeDef> for DataSourceTypeResponse {
    fn from(def: &DataSourceTypeDef) -> Self {
        Self {
            ds_type: def.ds_type,
            label: def.label.to_string(),
            fields: def
                .fields
                .iter()
                .map(|f| FieldDefResponse {
                    key: f.key.to_string(),
                    label: f.label.to_string(),
                    field_type: match &f.field_type {
                        FieldType::Text => "text",
                        FieldType::Number => "number",
                        FieldType::Select(_) => "select",
                        FieldType::TextArea => "textarea",
                        FieldType::Json => "json",
                    }
                    .to_string(),
                    options: match &f.field_type {
                        FieldType::Select(opts) => {
                            Some(opts.iter().map(|s| s.to_string()).collect())
                        }
                        _ => None,
                    },
                    required: f.required,
                    is_secret: f.is_secret,
                    default_value: f.default_value.map(|s| s.to_string()),
                })
                .collect(),
        }
    }
}
