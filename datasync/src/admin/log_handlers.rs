use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use uuid::Uuid;

use crate::logs::{IntegrationLogView, LogQuery, LogRecordView, PageParams, Paginated};

use super::{AdminState, ApiErr};

// ---------- GET /integration-logs ----------

pub async fn list_logs(
    State(state): State<AdminState>,
    Query(q): Query<LogQuery>,
) -> Result<Json<Paginated<IntegrationLogView>>, ApiErr> {
    Ok(Json(state.pipeline.list_integration_logs(&q).await?))
}

// ---------- GET /datasources/{id}/sync-history ----------

pub async fn sync_history(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> Result<Json<Paginated<IntegrationLogView>>, ApiErr> {
    Ok(Json(state.pipeline.sync_history(id, page).await?))
}

// ---------- GET /integration-logs/{log_id}/records ----------

pub async fn log_records(
    State(state): State<AdminState>,
    Path(log_id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> Result<Json<Paginated<LogRecordView>>, ApiErr> {
    Ok(Json(state.pipeline.log_records(log_id, page).await?))
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{json, router, send};
    use crate::test_support::create_source;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_history_pages_through_runs() {
        let (router, pipeline) = router().await;
        let ds = create_source(pipeline.db(), "busy").await;
        for _ in 0..25 {
            let outcome = pipeline
                .sync_data_source(
                    ds.id,
                    crate::sync::SyncOptions {
                        force: false,
                        payload: Some(json!([])),
                    },
                )
                .await
                .unwrap();
            assert!(outcome.success);
        }

        let res = send(
            &router,
            Method::GET,
            &format!("/api/v1/datasources/{}/sync-history?page=2&limit=10", ds.id),
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let page = json(res).await;
        assert_eq!(page["data"].as_array().unwrap().len(), 10);
        assert_eq!(page["total"], 25);
        assert_eq!(page["total_pages"], 3);
        assert_eq!(page["page"], 2);
    }

    #[tokio::test]
    async fn test_log_filters_and_bad_dates() {
        let (router, pipeline) = router().await;
        let ds = create_source(pipeline.db(), "filtered").await;
        pipeline
            .sync_data_source(ds.id, crate::sync::SyncOptions::default())
            .await
            .unwrap();

        let ok = json(
            send(&router, Method::GET, "/api/v1/integration-logs?status=success&sortBy=record_count&order=asc", None).await,
        )
        .await;
        assert_eq!(ok["total"], 1);

        let none = json(send(&router, Method::GET, "/api/v1/integration-logs?status=failed", None).await).await;
        assert_eq!(none["total"], 0);

        let res = send(&router, Method::GET, "/api/v1/integration-logs?dateFrom=yesterday", None).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_records_of_unknown_log_is_404() {
        let (router, _) = router().await;
        let res = send(
            &router,
            Method::GET,
            &format!("/api/v1/integration-logs/{}/records", uuid::Uuid::now_v7()),
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
