use serde_json::{Map, Value, json};
use std::path::Path;

use super::{Probe, SourceStrategy, StrategyContext, StrategyError};
use crate::model::{FileConfig, FileFormat};

/// Reads records from a local JSON, NDJSON or CSV file.
pub struct FileStrategy {
    cfg: FileConfig,
}

impl FileStrategy {
    pub fn new(cfg: FileConfig) -> Self {
        Self { cfg }
    }

    fn format(&self) -> FileFormat {
        match self.cfg.format {
            FileFormat::Auto => format_from_extension(&self.cfg.path),
            explicit => explicit,
        }
    }

    fn delimiter(&self) -> Result<u8, StrategyError> {
        match self.cfg.delimiter.as_deref() {
            None | Some("") => Ok(
                if self.cfg.path.extension().is_some_and(|e| e.eq_ignore_ascii_case("tsv")) {
                    b'\t'
                } else {
                    b','
                },
            ),
            Some("\\t") | Some("\t") => Ok(b'\t'),
            Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
            Some(d) => Err(StrategyError::Config(format!(
                "CSV delimiter must be a single byte, got {d:?}"
            ))),
        }
    }
}

fn format_from_extension(path: &Path) -> FileFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("csv") | Some("tsv") => FileFormat::Csv,
        Some("ndjson") | Some("jsonl") => FileFormat::Ndjson,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Auto,
    }
}

pub fn parse_json(text: &str) -> Result<Value, StrategyError> {
    serde_json::from_str(text).map_err(|e| StrategyError::Parse(e.to_string()))
}

pub fn parse_ndjson(text: &str) -> Result<Value, StrategyError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| StrategyError::Parse(format!("line {}: {e}", i + 1)))
        })
        .collect::<Result<Vec<Value>, _>>()
        .map(Value::Array)
}

/// Header row names the fields; every value is read as text.
pub fn parse_csv(text: &str, delimiter: u8) -> Result<Value, StrategyError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| StrategyError::Parse(e.to_string()))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| StrategyError::Parse(e.to_string()))?;
        let record: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        records.push(Value::Object(record));
    }
    Ok(Value::Array(records))
}

#[async_trait::async_trait]
impl SourceStrategy for FileStrategy {
    async fn test_connection(&self, _ctx: &StrategyContext) -> Result<Probe, StrategyError> {
        let meta = tokio::fs::metadata(&self.cfg.path)
            .await
            .map_err(|e| StrategyError::Io(format!("{}: {e}", self.cfg.path.display())))?;
        if !meta.is_file() {
            return Err(StrategyError::Io(format!(
                "{} is not a regular file",
                self.cfg.path.display()
            )));
        }
        Ok(
            Probe::new(format!("File {} is readable", self.cfg.path.display()))
                .with_data(json!({"size_bytes": meta.len()})),
        )
    }

    async fn fetch(&self, _ctx: &StrategyContext) -> Result<Value, StrategyError> {
        let text = tokio::fs::read_to_string(&self.cfg.path)
            .await
            .map_err(|e| StrategyError::Io(format!("{}: {e}", self.cfg.path.display())))?;

        match self.format() {
            FileFormat::Json => parse_json(&text),
            FileFormat::Ndjson => parse_ndjson(&text),
            FileFormat::Csv => parse_csv(&text, self.delimiter()?),
            // unknown extension: a JSON document, else one JSON object per line
            FileFormat::Auto => parse_json(&text).or_else(|_| parse_ndjson(&text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use std::io::Write;
    use std::time::Duration;

    async fn ctx() -> StrategyContext {
        StrategyContext {
            db: setup_db().await,
            http: reqwest::Client::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    fn write_file(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn strategy(path: &Path, extra: Value) -> FileStrategy {
        let mut cfg = json!({"path": path});
        if let (Some(obj), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
            obj.extend(extra);
        }
        FileStrategy::new(serde_json::from_value(cfg).unwrap())
    }

    #[tokio::test]
    async fn test_csv_by_extension() {
        let file = write_file(".csv", "id, name\n1,Ada\n2,Grace\n");
        let payload = strategy(file.path(), json!({})).fetch(&ctx().await).await.unwrap();
        assert_eq!(
            payload,
            json!([{"id": "1", "name": "Ada"}, {"id": "2", "name": "Grace"}])
        );
    }

    #[tokio::test]
    async fn test_csv_custom_delimiter() {
        let file = write_file(".txt", "a;b\n1;2\n");
        let payload = strategy(file.path(), json!({"format": "csv", "delimiter": ";"}))
            .fetch(&ctx().await)
            .await
            .unwrap();
        assert_eq!(payload, json!([{"a": "1", "b": "2"}]));
    }

    #[tokio::test]
    async fn test_ndjson_and_json_documents() {
        let nd = write_file(".jsonl", "{\"a\":1}\n\n{\"a\":2}\n");
        let payload = strategy(nd.path(), json!({})).fetch(&ctx().await).await.unwrap();
        assert_eq!(payload, json!([{"a": 1}, {"a": 2}]));

        let doc = write_file(".json", "{\"a\": 1}");
        let payload = strategy(doc.path(), json!({})).fetch(&ctx().await).await.unwrap();
        assert_eq!(payload, json!({"a": 1}));

        let unknown = write_file(".dat", "{\"a\":1}\n{\"a\":2}\n");
        let payload = strategy(unknown.path(), json!({})).fetch(&ctx().await).await.unwrap();
        assert_eq!(payload, json!([{"a": 1}, {"a": 2}]));
    }

    #[tokio::test]
    async fn test_bad_line_reports_line_number() {
        let nd = write_file(".ndjson", "{\"a\":1}\nnot json\n");
        let err = strategy(nd.path(), json!({})).fetch(&ctx().await).await.unwrap_err();
        assert!(err.to_string().contains("line 2"), "got {err}");
    }

    #[tokio::test]
    async fn test_connection_checks_file() {
        let file = write_file(".csv", "a\n1\n");
        let probe = strategy(file.path(), json!({}))
            .test_connection(&ctx().await)
            .await
            .unwrap();
        assert_eq!(probe.data.unwrap()["size_bytes"], 4);

        let err = strategy(Path::new("/definitely/not/here.csv"), json!({}))
            .test_connection(&ctx().await)
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Io(_)));
    }
}
