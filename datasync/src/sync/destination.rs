//! Writes transformed records into the module's destination tables.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend};

use crate::engine::Record;
use crate::sql;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteReport {
    /// Records inserted into at least one destination table.
    pub inserted: i64,
    /// Records every table already held.
    pub duplicates: i64,
    /// One line per failed (record, table) insert.
    pub failures: Vec<String>,
}

/// Drop fields a destination column cannot carry: blank or placeholder keys
/// and names that are not plain SQL identifiers.
pub fn prepare(record: &Record) -> Record {
    record
        .iter()
        .filter(|(key, _)| {
            let key = key.trim();
            if key.is_empty() || key == "undefined" || key == "null" {
                return false;
            }
            if !sql::is_valid_ident(key) {
                tracing::warn!(column = %key, "dropping field with invalid column name");
                return false;
            }
            true
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Insert each record into every table. Duplicate rows are skipped, and
/// per-record failures are collected rather than aborting the batch.
pub async fn write_records(
    db: &DatabaseConnection,
    tables: &[String],
    records: &[Record],
) -> WriteReport {
    let backend = db.get_database_backend();
    let mut report = WriteReport::default();

    let mut column_types = Vec::with_capacity(tables.len());
    for table in tables {
        column_types.push(load_column_types(db, backend, table).await);
    }

    for (index, record) in records.iter().enumerate() {
        let row = prepare(record);
        if row.is_empty() {
            report
                .failures
                .push(format!("record {index}: no writable fields"));
            continue;
        }

        let mut wrote = false;
        let mut skipped = 0usize;
        for (table, types) in tables.iter().zip(&column_types) {
            match db.execute(sql::insert_ignore(backend, table, &row, types)).await {
                Ok(res) if res.rows_affected() > 0 => wrote = true,
                Ok(_) => skipped += 1,
                Err(e) => {
                    tracing::warn!(table = %table, record = index, error = %e, "insert failed");
                    report
                        .failures
                        .push(format!("record {index} -> {table}: {e}"));
                }
            }
        }

        if wrote {
            report.inserted += 1;
        } else if skipped == tables.len() {
            report.duplicates += 1;
        }
    }

    report
}

/// Postgres only; other backends coerce bound values on their own.
async fn load_column_types(
    db: &DatabaseConnection,
    backend: DbBackend,
    table: &str,
) -> sql::ColumnTypes {
    if backend != DbBackend::Postgres {
        return sql::ColumnTypes::new();
    }
    match db.query_all(sql::pg_column_types(table)).await {
        Ok(rows) => rows
            .iter()
            .filter_map(|row| {
                let column: String = row.try_get("", "column_name").ok()?;
                let udt: String = row.try_get("", "udt_name").ok()?;
                Some((column, udt))
            })
            .collect(),
        Err(e) => {
            tracing::warn!(table = %table, error = %e, "could not read column types");
            sql::ColumnTypes::new()
        }
    }
}

/// Short text for `error_log` when some records did not make it.
pub fn summarize_failures(failures: &[String]) -> Option<String> {
    const SHOWN: usize = 10;
    if failures.is_empty() {
        return None;
    }
    let mut text = failures
        .iter()
        .take(SHOWN)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if failures.len() > SHOWN {
        text.push_str(&format!("\n... and {} more", failures.len() - SHOWN));
    }
    Some(format!("{} insert failure(s):\n{text}", failures.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use sea_orm::{DbBackend, Statement};
    use serde_json::{Value, json};

    fn rec(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_prepare_drops_unwritable_keys() {
        let row = prepare(&rec(json!({
            "id": 1,
            "": "x",
            "undefined": 2,
            "null": 3,
            "bad name": 4,
        })));
        assert_eq!(row.len(), 1);
        assert_eq!(row["id"], 1);
    }

    #[tokio::test]
    async fn test_write_counts_inserts_duplicates_and_failures() {
        let db = setup_db().await;
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE TABLE sales (order_id TEXT UNIQUE, amount REAL)",
        ))
        .await
        .unwrap();

        let tables = vec!["sales".to_string()];
        let records = vec![
            rec(json!({"order_id": "a", "amount": 1.5})),
            rec(json!({"order_id": "b", "amount": 2})),
        ];

        let first = write_records(&db, &tables, &records).await;
        assert_eq!(first.inserted, 2);
        assert!(first.failures.is_empty());

        let second = write_records(&db, &tables, &records).await;
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);

        let bad = write_records(&db, &tables, &[rec(json!({"missing_col": 1}))]).await;
        assert_eq!(bad.inserted, 0);
        assert_eq!(bad.failures.len(), 1);
        assert!(summarize_failures(&bad.failures).unwrap().starts_with("1 insert failure"));
    }

    #[tokio::test]
    async fn test_nulls_are_written_into_typed_columns() {
        let db = setup_db().await;
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE TABLE sales (order_id TEXT UNIQUE, amount REAL, closed_at TEXT)",
        ))
        .await
        .unwrap();

        let report = write_records(
            &db,
            &["sales".to_string()],
            &[rec(json!({"order_id": "a", "amount": null, "closed_at": null}))],
        )
        .await;
        assert_eq!(report.inserted, 1);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    #[ignore] // needs a running Postgres at BI_TEST_POSTGRES_URL
    async fn test_write_typed_columns_on_postgres() {
        let url = std::env::var("BI_TEST_POSTGRES_URL").unwrap();
        let db = sea_orm::Database::connect(&url).await.unwrap();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS datasync_typed_sales; \
             CREATE TABLE datasync_typed_sales (\
                 order_id TEXT UNIQUE, qty INTEGER, amount NUMERIC, paid BOOLEAN, closed_at TIMESTAMP)",
        )
        .await
        .unwrap();

        let tables = vec!["datasync_typed_sales".to_string()];
        let records = vec![
            rec(json!({
                "order_id": "a",
                "qty": 2,
                "amount": 9.5,
                "paid": true,
                "closed_at": "2024-03-01T00:00:00.000Z",
            })),
            rec(json!({"order_id": "b", "qty": null, "amount": null, "paid": null, "closed_at": null})),
        ];

        let report = write_records(&db, &tables, &records).await;
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.inserted, 2);

        let again = write_records(&db, &tables, &records).await;
        assert_eq!(again.duplicates, 2);

        db.execute_unprepared("DROP TABLE datasync_typed_sales").await.unwrap();
    }
}
