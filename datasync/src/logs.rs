//! Sync-run audit trail: one `integration_log` row per run plus the
//! transformed records the run produced.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Select, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::Record;
use crate::entity::{integration_log, integration_log_record};
use crate::error::{PipelineError, Result};
use crate::model::RunStatus;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl PageParams {
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    fn resolve(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        (page, limit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub data_source_id: Option<Uuid>,
    /// `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`; inclusive.
    #[serde(default, alias = "dateFrom")]
    pub date_from: Option<String>,
    #[serde(default, alias = "dateTo")]
    pub date_to: Option<String>,
    #[serde(default, alias = "sortBy")]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationLogView {
    pub id: Uuid,
    pub source_system: String,
    pub data_source_id: Option<Uuid>,
    pub record_count: i64,
    pub status: String,
    pub run_timestamp: NaiveDateTime,
    pub error_log: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl From<integration_log::Model> for IntegrationLogView {
    fn from(m: integration_log::Model) -> Self {
        Self {
            id: m.id,
            source_system: m.source_system,
            data_source_id: m.data_source_id,
            record_count: m.record_count,
            status: m.status,
            run_timestamp: m.run_timestamp,
            error_log: m.error_log,
            duration_seconds: m.duration_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecordView {
    pub id: Uuid,
    pub log_id: Uuid,
    pub record: Value,
    pub created_at: NaiveDateTime,
}

impl From<integration_log_record::Model> for LogRecordView {
    fn from(m: integration_log_record::Model) -> Self {
        let record = serde_json::from_str(&m.record).unwrap_or(Value::String(m.record));
        Self {
            id: m.id,
            log_id: m.log_id,
            record,
            created_at: m.created_at,
        }
    }
}

/// Final state written when a run completes.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub record_count: i64,
    pub error_log: Option<String>,
    pub duration_seconds: f64,
}

fn parse_bound(raw: &str, end_of_day: bool) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| PipelineError::validation(format!("Invalid date: {raw}")))?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.ok_or_else(|| PipelineError::validation(format!("Invalid date: {raw}")))
}

fn sort_column(name: Option<&str>) -> integration_log::Column {
    match name {
        Some("status") => integration_log::Column::Status,
        Some("record_count") => integration_log::Column::RecordCount,
        Some("duration_seconds") => integration_log::Column::DurationSeconds,
        Some("source_system") => integration_log::Column::SourceSystem,
        // anything else sorts by run time
        _ => integration_log::Column::RunTimestamp,
    }
}

#[derive(Clone)]
pub struct IntegrationLogStore {
    db: DatabaseConnection,
    record_batch_size: usize,
}

impl IntegrationLogStore {
    pub fn new(db: DatabaseConnection, record_batch_size: usize) -> Self {
        Self {
            db,
            record_batch_size: record_batch_size.max(1),
        }
    }

    /// Open a run in `in_progress`.
    pub async fn start_run(
        &self,
        source_system: &str,
        data_source_id: Option<Uuid>,
    ) -> Result<integration_log::Model> {
        let model = integration_log::ActiveModel {
            id: Set(Uuid::now_v7()),
            source_system: Set(source_system.to_string()),
            data_source_id: Set(data_source_id),
            record_count: Set(0),
            status: Set(RunStatus::InProgress.as_str().to_string()),
            run_timestamp: Set(Utc::now().naive_utc()),
            error_log: Set(None),
            duration_seconds: Set(None),
        }
        .insert(&self.db)
        .await?;
        Ok(model)
    }

    /// Finalize a run. Only an `in_progress` run can be finalized, so a
    /// second call is a no-op and returns false.
    pub async fn finish_run(&self, log_id: Uuid, done: RunCompletion) -> Result<bool> {
        let res = integration_log::Entity::update_many()
            .col_expr(integration_log::Column::Status, Expr::value(done.status.as_str()))
            .col_expr(integration_log::Column::RecordCount, Expr::value(done.record_count))
            .col_expr(integration_log::Column::ErrorLog, Expr::value(done.error_log))
            .col_expr(
                integration_log::Column::DurationSeconds,
                Expr::value(done.duration_seconds),
            )
            .filter(integration_log::Column::Id.eq(log_id))
            .filter(integration_log::Column::Status.eq(RunStatus::InProgress.as_str()))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Store the run's records in bounded batches. Returns the number written.
    /// A failed batch stops the append and is reported as
    /// [`PipelineError::Persistence`] with the count already stored.
    pub async fn append_records(&self, log_id: Uuid, records: &[Record]) -> Result<usize> {
        let now = Utc::now().naive_utc();
        let mut written = 0;
        for chunk in records.chunks(self.record_batch_size) {
            let rows = chunk.iter().map(|r| integration_log_record::ActiveModel {
                id: Set(Uuid::now_v7()),
                log_id: Set(log_id),
                record: Set(Value::Object(r.clone()).to_string()),
                created_at: Set(now),
            });
            integration_log_record::Entity::insert_many(rows)
                .exec(&self.db)
                .await
                .map_err(|e| {
                    PipelineError::Persistence(format!(
                        "audit records for run {log_id} ({written} of {} stored): {e}",
                        records.len()
                    ))
                })?;
            written += chunk.len();
        }
        Ok(written)
    }

    pub async fn get(&self, log_id: Uuid) -> Result<Option<integration_log::Model>> {
        Ok(integration_log::Entity::find_by_id(log_id).one(&self.db).await?)
    }

    pub async fn list(&self, q: &LogQuery) -> Result<Paginated<IntegrationLogView>> {
        let mut query = integration_log::Entity::find();
        if let Some(status) = q.status {
            query = query.filter(integration_log::Column::Status.eq(status.as_str()));
        }
        if let Some(ref system) = q.source_system
            && !system.trim().is_empty()
        {
            query = query.filter(integration_log::Column::SourceSystem.eq(system.trim()));
        }
        if let Some(ds_id) = q.data_source_id {
            query = query.filter(integration_log::Column::DataSourceId.eq(ds_id));
        }
        if let Some(ref from) = q.date_from {
            query = query.filter(integration_log::Column::RunTimestamp.gte(parse_bound(from, false)?));
        }
        if let Some(ref to) = q.date_to {
            query = query.filter(integration_log::Column::RunTimestamp.lte(parse_bound(to, true)?));
        }

        let column = sort_column(q.sort_by.as_deref());
        query = match q.order.unwrap_or_default() {
            SortOrder::Asc => query
                .order_by_asc(column)
                .order_by_asc(integration_log::Column::Id),
            SortOrder::Desc => query
                .order_by_desc(column)
                .order_by_desc(integration_log::Column::Id),
        };

        let page = PageParams {
            page: q.page,
            limit: q.limit,
        };
        Ok(self.paginate(query, page).await?.map(IntegrationLogView::from))
    }

    /// Runs of one data source, newest first.
    pub async fn history(
        &self,
        data_source_id: Uuid,
        page: PageParams,
    ) -> Result<Paginated<IntegrationLogView>> {
        self.list(&LogQuery {
            page: page.page,
            limit: page.limit,
            data_source_id: Some(data_source_id),
            ..Default::default()
        })
        .await
    }

    pub async fn records(&self, log_id: Uuid, page: PageParams) -> Result<Paginated<LogRecordView>> {
        if self.get(log_id).await?.is_none() {
            return Err(PipelineError::not_found("Integration log not found"));
        }
        let query = integration_log_record::Entity::find()
            .filter(integration_log_record::Column::LogId.eq(log_id))
            .order_by_asc(integration_log_record::Column::Id);
        Ok(self.paginate(query, page).await?.map(LogRecordView::from))
    }

    pub async fn recent(&self, limit: u64) -> Result<Vec<IntegrationLogView>> {
        let page = self
            .list(&LogQuery {
                page: Some(1),
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        Ok(page.data)
    }

    async fn paginate<E>(&self, query: Select<E>, params: PageParams) -> Result<Paginated<E::Model>>
    where
        E: EntityTrait,
        E::Model: Sync,
    {
        let (page, limit) = params.resolve();
        let paginator = query.paginate(&self.db, limit);
        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page - 1).await?;
        Ok(Paginated {
            data,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }
}
