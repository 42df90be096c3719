//! The pipeline's operation surface: every store and service wired together
//! behind one cloneable handle, shared by the REST layer and the CLI.

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Settings;
use crate::engine::Record;
use crate::error::{PipelineError, Result};
use crate::logs::{
    IntegrationLogStore, IntegrationLogView, LogQuery, LogRecordView, PageParams, Paginated,
};
use crate::mapping::{MappingRulePatch, MappingRuleStore, MappingRuleView, NewMappingRule};
use crate::model::SourceStatus;
use crate::registry::{
    CreateDataSource, DataSourceFilter, DataSourceRegistry, DataSourceView, UpdateDataSource,
};
use crate::source_types::{self, DataSourceTypeResponse};
use crate::strategy::StrategyContext;
use crate::sync::batch::BatchCoordinator;
use crate::sync::events::{SyncEvent, SyncEvents};
use crate::sync::guard::{InFlight, SourceLocks};
use crate::sync::scheduler::DueSyncScheduler;
use crate::sync::{SyncOptions, SyncOrchestrator, SyncOutcome};
use crate::tester::{ConnectionTestResult, ConnectionTester};

const RECENT_RUNS: u64 = 20;

#[derive(Debug, Serialize)]
pub struct SyncQueueSnapshot {
    pub in_flight: Vec<InFlight>,
    pub recent: Vec<IntegrationLogView>,
}

#[derive(Clone)]
pub struct Pipeline {
    registry: DataSourceRegistry,
    mappings: MappingRuleStore,
    logs: IntegrationLogStore,
    tester: ConnectionTester,
    orchestrator: SyncOrchestrator,
    batch: BatchCoordinator,
}

impl Pipeline {
    pub fn new(db: DatabaseConnection, master_key: [u8; 32], settings: &Settings) -> Self {
        let registry = DataSourceRegistry::new(db.clone(), master_key);
        let mappings = MappingRuleStore::new(db.clone());
        let logs = IntegrationLogStore::new(db.clone(), settings.log_record_batch_size);
        let ctx = StrategyContext {
            db,
            http: reqwest::Client::new(),
            connect_timeout: settings.connection_timeout,
        };
        let tester = ConnectionTester::new(registry.clone(), ctx.clone());
        let orchestrator = SyncOrchestrator::new(
            registry.clone(),
            mappings.clone(),
            logs.clone(),
            ctx,
            SourceLocks::new(),
            SyncEvents::default(),
            settings.sync_timeout,
        );
        let batch = BatchCoordinator::new(
            orchestrator.clone(),
            tester.clone(),
            settings.sync_concurrency,
        );
        Self {
            registry,
            mappings,
            logs,
            tester,
            orchestrator,
            batch,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.registry.db()
    }

    pub fn scheduler(&self, interval: std::time::Duration) -> DueSyncScheduler {
        DueSyncScheduler::new(self.registry.clone(), self.batch.clone(), interval)
    }

    // ---------- data sources ----------

    pub async fn create_data_source(&self, input: CreateDataSource) -> Result<DataSourceView> {
        let model = self.registry.create(input).await?;
        self.registry.view(model)
    }

    pub async fn get_data_source(&self, id: Uuid) -> Result<Option<DataSourceView>> {
        self.registry.get_view(id).await
    }

    pub async fn list_data_sources(&self, filter: &DataSourceFilter) -> Result<Vec<DataSourceView>> {
        self.views(self.registry.list(filter).await?)
    }

    pub async fn update_data_source(
        &self,
        id: Uuid,
        patch: UpdateDataSource,
    ) -> Result<Option<DataSourceView>> {
        match self.registry.update(id, patch).await? {
            Some(model) => Ok(Some(self.registry.view(model)?)),
            None => Ok(None),
        }
    }

    pub async fn update_data_source_status(
        &self,
        id: Uuid,
        status: SourceStatus,
    ) -> Result<Option<DataSourceView>> {
        self.ensure_idle(id)?;
        match self.registry.update_status(id, status).await? {
            Some(model) => Ok(Some(self.registry.view(model)?)),
            None => Ok(None),
        }
    }

    pub async fn soft_delete_data_source(&self, id: Uuid) -> Result<bool> {
        self.ensure_idle(id)?;
        self.registry.soft_delete(id).await
    }

    pub async fn hard_delete_data_source(&self, id: Uuid) -> Result<bool> {
        self.ensure_idle(id)?;
        self.registry.hard_delete(id).await
    }

    pub fn list_data_source_types(&self) -> Vec<DataSourceTypeResponse> {
        source_types::get_type_defs()
            .iter()
            .map(DataSourceTypeResponse::from)
            .collect()
    }

    pub async fn list_active_data_sources(&self) -> Result<Vec<DataSourceView>> {
        self.views(self.registry.list_active().await?)
    }

    pub async fn list_data_sources_needing_sync(&self) -> Result<Vec<DataSourceView>> {
        self.views(self.registry.list_active_due(Utc::now().naive_utc()).await?)
    }

    // ---------- connection tests ----------

    pub async fn test_connection(&self, id: Uuid) -> Result<ConnectionTestResult> {
        self.tester.test(id).await
    }

    pub async fn test_connections(&self, ids: &[Uuid]) -> Vec<ConnectionTestResult> {
        self.batch.test_many(ids).await
    }

    // ---------- syncs ----------

    pub async fn sync_data_source(&self, id: Uuid, opts: SyncOptions) -> Result<SyncOutcome> {
        self.orchestrator.run(id, opts).await
    }

    pub async fn sync_data_sources(&self, ids: &[Uuid]) -> Vec<SyncOutcome> {
        self.batch.sync_many(ids).await
    }

    pub async fn sync_queue_snapshot(&self) -> Result<SyncQueueSnapshot> {
        Ok(SyncQueueSnapshot {
            in_flight: self.orchestrator.locks().snapshot(),
            recent: self.logs.recent(RECENT_RUNS).await?,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.orchestrator.events().subscribe()
    }

    // ---------- integration logs ----------

    pub async fn list_integration_logs(&self, q: &LogQuery) -> Result<Paginated<IntegrationLogView>> {
        self.logs.list(q).await
    }

    pub async fn sync_history(
        &self,
        data_source_id: Uuid,
        page: PageParams,
    ) -> Result<Paginated<IntegrationLogView>> {
        self.logs.history(data_source_id, page).await
    }

    pub async fn log_records(&self, log_id: Uuid, page: PageParams) -> Result<Paginated<LogRecordView>> {
        self.logs.records(log_id, page).await
    }

    // ---------- mapping rules ----------

    pub async fn list_mapping_rules(&self, data_source_id: Uuid) -> Result<Vec<MappingRuleView>> {
        self.require_source(data_source_id).await?;
        self.mappings.list(data_source_id).await
    }

    pub async fn add_mapping_rule(
        &self,
        data_source_id: Uuid,
        rule: NewMappingRule,
    ) -> Result<MappingRuleView> {
        self.require_source(data_source_id).await?;
        self.mappings.add(data_source_id, rule).await
    }

    pub async fn update_mapping_rule(
        &self,
        data_source_id: Uuid,
        rule_id: i32,
        patch: MappingRulePatch,
    ) -> Result<Option<MappingRuleView>> {
        self.mappings.update(data_source_id, rule_id, patch).await
    }

    pub async fn delete_mapping_rule(&self, data_source_id: Uuid, rule_id: i32) -> Result<bool> {
        self.mappings.delete(data_source_id, rule_id).await
    }

    /// Preview of what the rules make of a sample, without writing anything.
    pub async fn preview_mapping(&self, data_source_id: Uuid, sample: &[serde_json::Value]) -> Result<Vec<Record>> {
        self.require_source(data_source_id).await?;
        let rules = self.mappings.field_mappings(data_source_id).await?;
        Ok(crate::engine::transform(&crate::engine::clean(sample), &rules))
    }

    // ---------- helpers ----------

    fn views(&self, models: Vec<crate::entity::data_source::Model>) -> Result<Vec<DataSourceView>> {
        models.into_iter().map(|m| self.registry.view(m)).collect()
    }

    async fn require_source(&self, id: Uuid) -> Result<()> {
        match self.registry.get(id).await? {
            Some(_) => Ok(()),
            None => Err(PipelineError::not_found("Data source not found")),
        }
    }

    fn ensure_idle(&self, id: Uuid) -> Result<()> {
        if self.orchestrator.locks().is_locked(id) {
            return Err(PipelineError::conflict("A sync is in progress for this data source"));
        }
        Ok(())
    }
}
