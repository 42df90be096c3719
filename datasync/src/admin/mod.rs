use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::set_header::response::SetResponseHeaderLayer;

use crate::error::PipelineError;
use crate::pipeline::Pipeline;

pub mod datasource_handlers;
pub mod dto;
pub mod log_handlers;
pub mod mapping_handlers;
pub mod sync_handlers;

// ---------- shared state ----------

#[derive(Clone)]
pub struct AdminState {
    pub pipeline: Pipeline,
}

// ---------- error type ----------

/// A JSON error response: `{"error": "..."}` with an HTTP status.
#[derive(Debug)]
pub struct ApiErr(StatusCode, String);

impl ApiErr {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self(status, msg.into())
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl From<PipelineError> for ApiErr {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::NotFound(msg) => Self(StatusCode::NOT_FOUND, msg),
            PipelineError::Conflict(msg) => Self(StatusCode::CONFLICT, msg),
            PipelineError::Validation(msg) => Self(StatusCode::UNPROCESSABLE_ENTITY, msg),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::internal(other)
            }
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.1 });
        (self.0, Json(body)).into_response()
    }
}

// ---------- router ----------

/// `allowed_origins` empty means same-origin only.
pub fn admin_router(state: AdminState, allowed_origins: &[String]) -> Router {
    let allowed_origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    };

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api/v1", api_v1())
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .with_state(state)
}

fn api_v1() -> Router<AdminState> {
    Router::new()
        // data source types
        .route(
            "/datasource-types",
            get(datasource_handlers::list_datasource_types),
        )
        // data sources
        .route(
            "/datasources",
            get(datasource_handlers::list_datasources).post(datasource_handlers::create_datasource),
        )
        .route("/datasources/active", get(datasource_handlers::list_active))
        .route("/datasources/due", get(datasource_handlers::list_due))
        .route("/datasources/test", post(datasource_handlers::test_many))
        .route("/datasources/sync", post(sync_handlers::sync_many))
        .route(
            "/datasources/{id}",
            get(datasource_handlers::get_datasource)
                .put(datasource_handlers::update_datasource)
                .delete(datasource_handlers::delete_datasource),
        )
        .route(
            "/datasources/{id}/status",
            put(datasource_handlers::update_status),
        )
        .route(
            "/datasources/{id}/test",
            post(datasource_handlers::test_datasource),
        )
        // syncs
        .route("/datasources/{id}/sync", post(sync_handlers::sync_datasource))
        .route("/sync/queue", get(sync_handlers::queue_snapshot))
        .route("/sync/events", get(sync_handlers::sync_events))
        // integration logs
        .route("/integration-logs", get(log_handlers::list_logs))
        .route(
            "/integration-logs/{log_id}/records",
            get(log_handlers::log_records),
        )
        .route(
            "/datasources/{id}/sync-history",
            get(log_handlers::sync_history),
        )
        // mapping rules
        .route(
            "/datasources/{id}/mappings",
            get(mapping_handlers::list_rules).post(mapping_handlers::add_rule),
        )
        .route(
            "/datasources/{id}/mappings/preview",
            post(mapping_handlers::preview),
        )
        .route(
            "/datasources/{id}/mappings/{rule_id}",
            put(mapping_handlers::update_rule).delete(mapping_handlers::delete_rule),
        )
}
