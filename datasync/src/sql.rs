//! Small SQL helpers for statements whose table and column names come from
//! data-source configuration rather than from the entity model.

use regex::Regex;
use sea_orm::{DbBackend, Statement, Value};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Column name to Postgres type name (`udt_name`), for casting bound values.
pub type ColumnTypes = HashMap<String, String>;

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static regex"))
}

fn from_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bfrom\s+"?([A-Za-z_][A-Za-z0-9_]*)"?(?:\s*\.\s*"?([A-Za-z_][A-Za-z0-9_]*)"?)?"#)
            .expect("static regex")
    })
}

fn cte_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:\bwith(?:\s+recursive)?|,)\s*"?([A-Za-z_][A-Za-z0-9_]*)"?\s+as\s*\("#)
            .expect("static regex")
    })
}

pub fn is_valid_ident(name: &str) -> bool {
    ident_re().is_match(name)
}

/// `table` or `schema.table`.
pub fn is_valid_table_ref(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|p| is_valid_ident(p))
}

pub fn quote_ident(backend: DbBackend, name: &str) -> String {
    match backend {
        DbBackend::MySql => format!("`{}`", name.replace('`', "``")),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

/// Quote each dotted part of a table reference.
pub fn quote_table_ref(backend: DbBackend, name: &str) -> String {
    name.split('.')
        .map(|p| quote_ident(backend, p))
        .collect::<Vec<_>>()
        .join(".")
}

/// Split `schema.table` into its parts.
pub fn split_table_ref(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}

/// Stored source queries must be a single read statement.
pub fn is_read_only_query(query: &str) -> bool {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.contains(';') {
        return false;
    }
    let head = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    matches!(head.as_str(), "select" | "with")
}

/// Blank out single-quoted literals and everything inside parentheses
/// (keeping the outermost pair) so only the statement's top level is left.
fn top_level(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut depth = 0usize;
    let mut in_literal = false;
    for c in query.chars() {
        let keep = match c {
            '\'' => {
                in_literal = !in_literal;
                false
            }
            _ if in_literal => false,
            '(' => {
                depth += 1;
                depth == 1
            }
            ')' => {
                depth = depth.saturating_sub(1);
                depth == 0
            }
            _ => depth == 0,
        };
        if keep {
            out.push(c);
        } else {
            out.extend(std::iter::repeat_n(' ', c.len_utf8()));
        }
    }
    out
}

/// First top-level `FROM <table>` reference in a query, as `(schema, table)`.
/// `None` when there is none or it names one of the query's own CTEs.
pub fn referenced_table(query: &str) -> Option<(Option<String>, String)> {
    let masked = top_level(query);
    let caps = from_clause_re().captures(&masked)?;
    let first = caps.get(1)?.as_str().to_string();
    let found = match caps.get(2) {
        Some(second) => (Some(first), second.as_str().to_string()),
        None => (None, first),
    };
    if found.0.is_none() {
        let is_cte = cte_name_re()
            .captures_iter(query)
            .filter_map(|c| c.get(1))
            .any(|name| name.as_str().eq_ignore_ascii_case(&found.1));
        if is_cte {
            return None;
        }
    }
    Some(found)
}

fn placeholder(backend: DbBackend, n: usize) -> String {
    match backend {
        DbBackend::Postgres => format!("${n}"),
        _ => "?".to_string(),
    }
}

/// Bind a JSON scalar as a SQL value. Nested documents are stored as JSON text.
/// Nulls never reach here: [`insert_ignore`] writes them as a `NULL` literal.
pub fn json_to_sql(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::String(None),
        JsonValue::Bool(b) => Value::from(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::from(i),
            None => Value::from(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Value::from(s.clone()),
        other => Value::from(other.to_string()),
    }
}

/// `SELECT column_name, udt_name` for a Postgres table, in `schema` or the
/// current schema.
pub fn pg_column_types(table: &str) -> Statement {
    let (schema, name) = split_table_ref(table);
    Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT column_name, udt_name FROM information_schema.columns \
         WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2",
        [Value::from(schema.map(str::to_string)), Value::from(name.to_string())],
    )
}

/// `INSERT .. ON CONFLICT DO NOTHING` (`INSERT IGNORE` on MySQL) for one record.
/// Column names must already be validated. Nulls are written as a literal
/// `NULL`; on Postgres every other value is cast to its column's type, since
/// bound text is not assignable to typed columns there.
pub fn insert_ignore(
    backend: DbBackend,
    table: &str,
    record: &Map<String, JsonValue>,
    column_types: &ColumnTypes,
) -> Statement {
    let columns: Vec<String> = record.keys().map(|k| quote_ident(backend, k)).collect();
    let mut slots: Vec<String> = Vec::with_capacity(record.len());
    let mut values: Vec<Value> = Vec::with_capacity(record.len());
    for (column, value) in record {
        if value.is_null() {
            slots.push("NULL".to_string());
            continue;
        }
        values.push(json_to_sql(value));
        let slot = placeholder(backend, values.len());
        match (backend, column_types.get(column)) {
            (DbBackend::Postgres, Some(udt)) => {
                slots.push(format!("CAST({slot} AS {})", quote_ident(backend, udt)))
            }
            _ => slots.push(slot),
        }
    }
    let target = quote_table_ref(backend, table);

    let sql = match backend {
        DbBackend::MySql => format!(
            "INSERT IGNORE INTO {target} ({}) VALUES ({})",
            columns.join(", "),
            slots.join(", ")
        ),
        _ => format!(
            "INSERT INTO {target} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            columns.join(", "),
            slots.join(", ")
        ),
    };

    Statement::from_sql_and_values(backend, sql, values)
}
