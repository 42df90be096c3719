use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::registry::{CreateDataSource, DataSourceFilter, DataSourceView, UpdateDataSource};
use crate::source_types::DataSourceTypeResponse;
use crate::tester::ConnectionTestResult;

use super::{
    AdminState, ApiErr,
    dto::{BatchRequest, BatchResponse, DeleteQuery, UpdateStatusRequest},
};

// ---------- GET /datasource-types ----------

pub async fn list_datasource_types(
    State(state): State<AdminState>,
) -> Json<Vec<DataSourceTypeResponse>> {
    Json(state.pipeline.list_data_source_types())
}

// ---------- GET /datasources ----------

pub async fn list_datasources(
    State(state): State<AdminState>,
    Query(filter): Query<DataSourceFilter>,
) -> Result<Json<Vec<DataSourceView>>, ApiErr> {
    Ok(Json(state.pipeline.list_data_sources(&filter).await?))
}

// ---------- GET /datasources/active, /datasources/due ----------

pub async fn list_active(
    State(state): State<AdminState>,
) -> Result<Json<Vec<DataSourceView>>, ApiErr> {
    Ok(Json(state.pipeline.list_active_data_sources().await?))
}

pub async fn list_due(State(state): State<AdminState>) -> Result<Json<Vec<DataSourceView>>, ApiErr> {
    Ok(Json(state.pipeline.list_data_sources_needing_sync().await?))
}

// ---------- POST /datasources ----------

pub async fn create_datasource(
    State(state): State<AdminState>,
    Json(body): Json<CreateDataSource>,
) -> Result<(StatusCode, Json<DataSourceView>), ApiErr> {
    let view = state.pipeline.create_data_source(body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

// ---------- GET /datasources/{id} ----------

pub async fn get_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DataSourceView>, ApiErr> {
    state
        .pipeline
        .get_data_source(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiErr::not_found("Data source not found"))
}

// ---------- PUT /datasources/{id} ----------

pub async fn update_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateDataSource>,
) -> Result<Json<DataSourceView>, ApiErr> {
    state
        .pipeline
        .update_data_source(id, body)
        .await?
        .map(Json)
        .ok_or_else(|| ApiErr::not_found("Data source not found"))
}

// ---------- PUT /datasources/{id}/status ----------

pub async fn update_status(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<DataSourceView>, ApiErr> {
    state
        .pipeline
        .update_data_source_status(id, body.status)
        .await?
        .map(Json)
        .ok_or_else(|| ApiErr::not_found("Data source not found"))
}

// ---------- DELETE /datasources/{id}?hard= ----------

pub async fn delete_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteQuery>,
) -> Result<StatusCode, ApiErr> {
    let deleted = if params.hard {
        state.pipeline.hard_delete_data_source(id).await?
    } else {
        state.pipeline.soft_delete_data_source(id).await?
    };
    if !deleted {
        return Err(ApiErr::not_found("Data source not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------- POST /datasources/{id}/test ----------

pub async fn test_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionTestResult>, ApiErr> {
    Ok(Json(state.pipeline.test_connection(id).await?))
}

// ---------- POST /datasources/test ----------

pub async fn test_many(
    State(state): State<AdminState>,
    Json(body): Json<BatchRequest>,
) -> Result<Json<BatchResponse<ConnectionTestResult>>, ApiErr> {
    if body.ids.is_empty() {
        return Err(ApiErr::bad_request("ids must not be empty"));
    }
    let results = state.pipeline.test_connections(&body.ids).await;
    Ok(Json(BatchResponse::new(results, |r| r.success)))
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{json, router, send};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    fn webhook(name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "type": "webhook",
            "connection_config": {"method": "POST", "headers": {"X-Token": "t"}},
            "module": ["sales"],
        })
    }

    #[tokio::test]
    async fn test_create_then_get_and_list() {
        let (router, _) = router().await;
        let res = send(&router, Method::POST, "/api/v1/datasources", Some(webhook("orders"))).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = json(res).await;
        assert_eq!(created["status"], "inactive");
        assert_eq!(created["type"], "webhook");
        let id = created["id"].as_str().unwrap().to_string();

        let res = send(&router, Method::GET, &format!("/api/v1/datasources/{id}"), None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["name"], "orders");

        let res = send(&router, Method::GET, "/api/v1/datasources?type=webhook&search=ord", None).await;
        assert_eq!(json(res).await.as_array().unwrap().len(), 1);

        let res = send(&router, Method::GET, "/api/v1/datasources?type=api", None).await;
        assert!(json(res).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_module_is_unprocessable() {
        let (router, _) = router().await;
        let mut body = webhook("bad");
        body["module"] = json!({"table": "sales; drop table x"});
        let res = send(&router, Method::POST, "/api/v1/datasources", Some(body)).await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json(res).await["error"].as_str().unwrap().contains("destination table"));
    }

    #[tokio::test]
    async fn test_missing_ids_are_404() {
        let (router, _) = router().await;
        let id = uuid::Uuid::now_v7();
        for (method, uri, body) in [
            (Method::GET, format!("/api/v1/datasources/{id}"), None),
            (Method::PUT, format!("/api/v1/datasources/{id}"), Some(json!({"name": "x"}))),
            (Method::DELETE, format!("/api/v1/datasources/{id}"), None),
            (Method::POST, format!("/api/v1/datasources/{id}/test"), None),
        ] {
            let res = send(&router, method.clone(), &uri, body).await;
            assert_eq!(res.status(), StatusCode::NOT_FOUND, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn test_status_soft_delete_and_test_flow() {
        let (router, _) = router().await;
        let created = json(send(&router, Method::POST, "/api/v1/datasources", Some(webhook("hook"))).await).await;
        let id = created["id"].as_str().unwrap().to_string();

        // a webhook without a target URL tests green and becomes active
        let res = send(&router, Method::POST, &format!("/api/v1/datasources/{id}/test"), None).await;
        assert_eq!(json(res).await["success"], true);
        let active = json(send(&router, Method::GET, "/api/v1/datasources/active", None).await).await;
        assert_eq!(active.as_array().unwrap().len(), 1);

        let res = send(
            &router,
            Method::PUT,
            &format!("/api/v1/datasources/{id}/status"),
            Some(json!({"status": "inactive"})),
        )
        .await;
        assert_eq!(json(res).await["status"], "inactive");

        let res = send(&router, Method::DELETE, &format!("/api/v1/datasources/{id}"), None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let res = send(&router, Method::GET, &format!("/api/v1/datasources/{id}"), None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = send(&router, Method::GET, "/api/v1/datasources?include_deleted=true", None).await;
        assert_eq!(json(res).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_test_reports_each_id() {
        let (router, _) = router().await;
        let created = json(send(&router, Method::POST, "/api/v1/datasources", Some(webhook("a"))).await).await;
        let res = send(
            &router,
            Method::POST,
            "/api/v1/datasources/test",
            Some(json!({"ids": [created["id"], uuid::Uuid::now_v7()]})),
        )
        .await;
        let body = json(res).await;
        assert_eq!(body["succeeded"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
    }
}
