//! The sync orchestrator: one run of fetch, clean, transform, write and log
//! for a single data source.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::engine::{self, Record};
use crate::error::{PipelineError, Result};
use crate::logs::{IntegrationLogStore, RunCompletion};
use crate::mapping::MappingRuleStore;
use crate::model::{RunStatus, SourceStatus};
use crate::registry::{DataSourceRegistry, ResolvedSource};
use crate::strategy::{self, StrategyContext, StrategyError};

pub mod batch;
pub mod destination;
pub mod events;
pub mod guard;
pub mod scheduler;

use events::{SyncEvent, SyncEvents};
use guard::SourceLocks;

// ---------- DTOs ----------

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Run even when the source is not `active`.
    pub force: bool,
    /// Pushed data for a webhook source, replacing its stored payload.
    pub payload: Option<Value>,
}

/// Result of one sync invocation. Failures are reported here, not raised.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub data_source_id: Uuid,
    pub success: bool,
    pub message: String,
    pub log_id: Option<Uuid>,
    /// Records inserted into at least one destination table.
    pub records_processed: i64,
    pub total_received: i64,
    pub failed_records: i64,
    pub duration_seconds: f64,
}

impl SyncOutcome {
    /// A run that was refused before any log row was written.
    pub fn rejected(data_source_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            data_source_id,
            success: false,
            message: message.into(),
            log_id: None,
            records_processed: 0,
            total_received: 0,
            failed_records: 0,
            duration_seconds: 0.0,
        }
    }
}

/// What a run produced when it got past the fatal stages.
struct RunReport {
    total_received: i64,
    inserted: i64,
    failures: Vec<String>,
}

// ---------- orchestrator ----------

#[derive(Clone)]
pub struct SyncOrchestrator {
    registry: DataSourceRegistry,
    mappings: MappingRuleStore,
    logs: IntegrationLogStore,
    ctx: StrategyContext,
    locks: SourceLocks,
    events: SyncEvents,
    fetch_timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        registry: DataSourceRegistry,
        mappings: MappingRuleStore,
        logs: IntegrationLogStore,
        ctx: StrategyContext,
        locks: SourceLocks,
        events: SyncEvents,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            mappings,
            logs,
            ctx,
            locks,
            events,
            fetch_timeout,
        }
    }

    pub fn locks(&self) -> &SourceLocks {
        &self.locks
    }

    pub fn events(&self) -> &SyncEvents {
        &self.events
    }

    /// Sync one data source. Only an unknown id is an error; every other
    /// failure comes back as an unsuccessful [`SyncOutcome`].
    pub async fn run(&self, id: Uuid, opts: SyncOptions) -> Result<SyncOutcome> {
        let model = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Data source not found"))?;

        let source = match self.registry.resolve(model) {
            Ok(source) => source,
            Err(e) => return Ok(SyncOutcome::rejected(id, e.to_string())),
        };

        if !opts.force && source.status != SourceStatus::Active {
            return Ok(SyncOutcome::rejected(
                id,
                format!(
                    "Data source is not active (status: {}); test the connection first",
                    source.status.as_str()
                ),
            ));
        }

        let Some(guard) = self.locks.try_acquire(id) else {
            return Ok(SyncOutcome::rejected(id, "sync already in progress"));
        };

        let started = Instant::now();
        let log = self.logs.start_run(source.ds_type.as_str(), Some(id)).await?;
        guard.set_log_id(log.id);
        self.events.publish(SyncEvent::Started {
            data_source_id: id,
            log_id: log.id,
            at: log.run_timestamp,
        });
        tracing::info!(data_source_id = %id, log_id = %log.id, "sync started");

        let result = self.execute(&source, log.id, opts.payload).await;
        let duration_seconds = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(report) => {
                let failed = report.failures.len() as i64;
                let message = if report.total_received == 0 {
                    "No records to sync".to_string()
                } else {
                    format!(
                        "Synced {} of {} records",
                        report.inserted, report.total_received
                    )
                };
                self.finish(
                    log.id,
                    RunCompletion {
                        status: RunStatus::Success,
                        record_count: report.inserted,
                        error_log: destination::summarize_failures(&report.failures),
                        duration_seconds,
                    },
                )
                .await;
                if let Err(e) = self.mark_synced(&source).await {
                    tracing::warn!(data_source_id = %id, error = %e, "could not stamp last sync");
                }
                tracing::info!(
                    data_source_id = %id,
                    log_id = %log.id,
                    inserted = report.inserted,
                    received = report.total_received,
                    failed,
                    "sync finished"
                );
                SyncOutcome {
                    data_source_id: id,
                    success: true,
                    message,
                    log_id: Some(log.id),
                    records_processed: report.inserted,
                    total_received: report.total_received,
                    failed_records: failed,
                    duration_seconds,
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(data_source_id = %id, log_id = %log.id, error = %message, "sync failed");
                self.finish(
                    log.id,
                    RunCompletion {
                        status: RunStatus::Failed,
                        record_count: 0,
                        error_log: Some(message.clone()),
                        duration_seconds,
                    },
                )
                .await;
                if let Err(e) = self.registry.update_status(id, SourceStatus::Error).await {
                    tracing::warn!(data_source_id = %id, error = %e, "could not flag source as error");
                }
                SyncOutcome {
                    data_source_id: id,
                    success: false,
                    message,
                    log_id: Some(log.id),
                    records_processed: 0,
                    total_received: 0,
                    failed_records: 0,
                    duration_seconds,
                }
            }
        };

        self.events.publish(SyncEvent::Finished {
            data_source_id: id,
            log_id: outcome.log_id,
            success: outcome.success,
            records_processed: outcome.records_processed,
            message: outcome.message.clone(),
            at: Utc::now().naive_utc(),
        });
        drop(guard);
        Ok(outcome)
    }

    /// Fetch through transform and write. An `Err` fails the whole run.
    async fn execute(
        &self,
        source: &ResolvedSource,
        log_id: Uuid,
        payload: Option<Value>,
    ) -> Result<RunReport> {
        let strategy = strategy::create_strategy(source, payload).map_err(fatal)?;
        let payload = match tokio::time::timeout(self.fetch_timeout, strategy.fetch(&self.ctx)).await
        {
            Ok(fetched) => fetched.map_err(fatal)?,
            Err(_) => return Err(fatal(StrategyError::Timeout(self.fetch_timeout))),
        };

        let raw = strategy::into_records(payload);
        let total_received = raw.len() as i64;
        let cleaned = engine::clean(&raw);
        if cleaned.is_empty() {
            return Ok(RunReport {
                total_received,
                inserted: 0,
                failures: Vec::new(),
            });
        }

        let rules = self.mappings.field_mappings(source.id()).await?;
        let records = engine::transform(&cleaned, &rules);

        let tables = source
            .module()
            .and_then(|m| m.destination_tables())
            .map_err(PipelineError::Fatal)?;

        let report = destination::write_records(self.registry.db(), &tables, &records).await;
        self.audit(log_id, &records).await;

        Ok(RunReport {
            total_received,
            inserted: report.inserted,
            failures: report.failures,
        })
    }

    /// Audit rows are best effort.
    async fn audit(&self, log_id: Uuid, records: &[Record]) {
        if let Err(e) = self.logs.append_records(log_id, records).await {
            tracing::warn!(log_id = %log_id, error = %e, "could not persist run records");
        }
    }

    async fn finish(&self, log_id: Uuid, done: RunCompletion) {
        match self.logs.finish_run(log_id, done).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(log_id = %log_id, "run was already finalized"),
            Err(e) => tracing::error!(log_id = %log_id, error = %e, "could not finalize run"),
        }
    }

    async fn mark_synced(&self, source: &ResolvedSource) -> Result<()> {
        self.registry.touch_last_sync(source.id()).await?;
        if source.status != SourceStatus::Active {
            self.registry
                .update_status(source.id(), SourceStatus::Active)
                .await?;
        }
        Ok(())
    }
}

fn fatal(e: StrategyError) -> PipelineError {
    PipelineError::Fatal(e.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logs::PageParams;
    use crate::mapping::NewMappingRule;
    use crate::test_support::{TEST_KEY, create_source, setup_db};
    use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, JsonValue, Statement};
    use serde_json::json;

    pub(crate) fn orchestrator(db: &DatabaseConnection) -> SyncOrchestrator {
        SyncOrchestrator::new(
            DataSourceRegistry::new(db.clone(), TEST_KEY),
            MappingRuleStore::new(db.clone()),
            IntegrationLogStore::new(db.clone(), 1000),
            StrategyContext {
                db: db.clone(),
                http: reqwest::Client::new(),
                connect_timeout: Duration::from_secs(5),
            },
            SourceLocks::new(),
            SyncEvents::default(),
            Duration::from_secs(30),
        )
    }

    pub(crate) async fn create_sales_table(db: &DatabaseConnection) {
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE TABLE sales (order_id TEXT UNIQUE, amount REAL, region TEXT)",
        ))
        .await
        .unwrap();
    }

    fn with_payload(payload: Value) -> SyncOptions {
        SyncOptions {
            force: false,
            payload: Some(payload),
        }
    }

    async fn run_count(orch: &SyncOrchestrator, id: Uuid) -> u64 {
        orch.logs.history(id, PageParams::new(1, 100)).await.unwrap().total
    }

    #[tokio::test]
    async fn test_resync_of_identical_payload_inserts_nothing() {
        let db = setup_db().await;
        create_sales_table(&db).await;
        let ds = create_source(&db, "shop").await;
        let orch = orchestrator(&db);
        let payload = json!([
            {"Order ID": "A1", "amount": 10, "Region": " north "},
            {"Order ID": "A2", "amount": 5.5, "Region": "south"},
        ]);

        let first = orch.run(ds.id, with_payload(payload.clone())).await.unwrap();
        assert!(first.success, "{}", first.message);
        assert_eq!(first.records_processed, 2);
        assert_eq!(first.total_received, 2);

        let second = orch.run(ds.id, with_payload(payload)).await.unwrap();
        assert!(second.success);
        assert_eq!(second.records_processed, 0);
        assert_eq!(second.total_received, 2);

        let log = orch.logs.get(second.log_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(log.status, "success");
        assert_eq!(log.record_count, 0);
        assert!(log.duration_seconds.is_some());

        let rows = JsonValue::find_by_statement(Statement::from_string(
            DbBackend::Sqlite,
            "SELECT order_id, region FROM sales ORDER BY order_id",
        ))
        .all(&db)
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["region"], "north");

        let source = orch.registry.get(ds.id).await.unwrap().unwrap();
        assert!(source.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_empty_payload_is_a_successful_run() {
        let db = setup_db().await;
        let ds = create_source(&db, "quiet").await;
        let orch = orchestrator(&db);

        let outcome = orch.run(ds.id, with_payload(json!([]))).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.records_processed, 0);

        let log = orch.logs.get(outcome.log_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(log.status, "success");
        assert_eq!(log.record_count, 0);
        assert_eq!(log.source_system, "webhook");
    }

    #[tokio::test]
    async fn test_mapping_rules_shape_written_rows() {
        let db = setup_db().await;
        create_sales_table(&db).await;
        let ds = create_source(&db, "mapped").await;
        let orch = orchestrator(&db);
        for (src, dst, t) in [
            ("ref", "order_id", json!({"type": "string"})),
            ("total", "amount", json!({"type": "number", "default": 0})),
        ] {
            orch.mappings
                .add(
                    ds.id,
                    NewMappingRule {
                        source_field: src.to_string(),
                        target_field: dst.to_string(),
                        transformation: Some(t),
                    },
                )
                .await
                .unwrap();
        }

        let outcome = orch
            .run(ds.id, with_payload(json!([{"ref": "X1", "total": "n/a", "ignored": 1}])))
            .await
            .unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.records_processed, 1);

        let row = JsonValue::find_by_statement(Statement::from_string(
            DbBackend::Sqlite,
            "SELECT order_id, amount FROM sales",
        ))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
        assert_eq!(row["order_id"], "X1");
        assert_eq!(row["amount"].as_f64(), Some(0.0));

        let audit = orch
            .logs
            .records(outcome.log_id.unwrap(), PageParams::new(1, 10))
            .await
            .unwrap();
        assert_eq!(audit.total, 1);
        assert_eq!(audit.data[0].record, json!({"order_id": "X1", "amount": 0}));
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_sources_leave_no_log_row() {
        let db = setup_db().await;
        let orch = orchestrator(&db);

        let err = orch.run(Uuid::now_v7(), SyncOptions::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let ds = create_source(&db, "paused").await;
        orch.registry
            .update_status(ds.id, SourceStatus::Inactive)
            .await
            .unwrap();
        let outcome = orch.run(ds.id, with_payload(json!([]))).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.log_id.is_none());
        assert!(outcome.message.contains("not active"));
        assert_eq!(run_count(&orch, ds.id).await, 0);

        let forced = orch
            .run(
                ds.id,
                SyncOptions {
                    force: true,
                    payload: Some(json!([])),
                },
            )
            .await
            .unwrap();
        assert!(forced.success);
        assert_eq!(run_count(&orch, ds.id).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_of_same_source_is_refused() {
        let db = setup_db().await;
        let ds = create_source(&db, "busy").await;
        let orch = orchestrator(&db);

        let held = orch.locks().try_acquire(ds.id).unwrap();
        let outcome = orch.run(ds.id, with_payload(json!([]))).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "sync already in progress");
        assert_eq!(run_count(&orch, ds.id).await, 0);

        drop(held);
        assert!(orch.run(ds.id, with_payload(json!([]))).await.unwrap().success);
        assert!(!orch.locks().is_locked(ds.id));
    }

    #[tokio::test]
    async fn test_pipeline_tables_are_never_written() {
        use crate::entity::data_source;
        use crate::logs::LogQuery;
        use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};

        let db = setup_db().await;
        let ds = create_source(&db, "forged").await;
        let mut active = ds.clone().into_active_model();
        active.module = Set(r#"{"table":"integration_log"}"#.to_string());
        let _: data_source::Model = active.update(&db).await.unwrap();

        let orch = orchestrator(&db);
        let forged = json!([{
            "id": Uuid::now_v7().to_string(),
            "source_system": "api",
            "status": "success",
            "record_count": 999,
            "run_timestamp": "2024-01-01 00:00:00",
        }]);
        let outcome = orch.run(ds.id, with_payload(forged)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("reserved"), "{}", outcome.message);

        let logs = orch.logs.list(&LogQuery::default()).await.unwrap();
        assert_eq!(logs.total, 1);
        assert_eq!(logs.data[0].status, "failed");
    }

    #[tokio::test]
    async fn test_missing_destination_fails_run_and_flags_source() {
        let db = setup_db().await;
        let ds = create_source(&db, "nowhere").await;
        let orch = orchestrator(&db);
        orch.registry
            .update(
                ds.id,
                crate::registry::UpdateDataSource {
                    module: Some(json!({})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut rx = orch.events().subscribe();
        let outcome = orch.run(ds.id, with_payload(json!([{"a": 1}]))).await.unwrap();
        assert!(!outcome.success);

        let log = orch.logs.get(outcome.log_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(log.status, "failed");
        assert!(log.error_log.unwrap().contains("destination table"));

        let source = orch.registry.get(ds.id).await.unwrap().unwrap();
        assert_eq!(source.status, "error");
        assert!(source.last_sync.is_none());

        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::Started { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::Finished { success: false, .. }
        ));
    }
}
