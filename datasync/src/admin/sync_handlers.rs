use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{
        Json,
        sse::{Event, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::pipeline::SyncQueueSnapshot;
use crate::sync::{SyncOptions, SyncOutcome};

use super::{
    AdminState, ApiErr,
    dto::{BatchRequest, BatchResponse, SyncBody, SyncQuery},
};

// ---------- POST /datasources/{id}/sync?force= ----------

/// The body is optional; when present it may carry a webhook payload.
pub async fn sync_datasource(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Query(params): Query<SyncQuery>,
    body: Bytes,
) -> Result<Json<SyncOutcome>, ApiErr> {
    let body: SyncBody = if body.iter().all(u8::is_ascii_whitespace) {
        SyncBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiErr::bad_request(format!("Invalid request body: {e}")))?
    };

    let outcome = state
        .pipeline
        .sync_data_source(
            id,
            SyncOptions {
                force: params.force,
                payload: body.payload,
            },
        )
        .await?;
    Ok(Json(outcome))
}

// ---------- POST /datasources/sync ----------

pub async fn sync_many(
    State(state): State<AdminState>,
    Json(body): Json<BatchRequest>,
) -> Result<Json<BatchResponse<SyncOutcome>>, ApiErr> {
    if body.ids.is_empty() {
        return Err(ApiErr::bad_request("ids must not be empty"));
    }
    let results = state.pipeline.sync_data_sources(&body.ids).await;
    Ok(Json(BatchResponse::new(results, |r| r.success)))
}

// ---------- GET /sync/queue ----------

pub async fn queue_snapshot(
    State(state): State<AdminState>,
) -> Result<Json<SyncQueueSnapshot>, ApiErr> {
    Ok(Json(state.pipeline.sync_queue_snapshot().await?))
}

// ---------- GET /sync/events (SSE) ----------

pub async fn sync_events(
    State(state): State<AdminState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.pipeline.subscribe_events();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(event.to_sse_event().ok()?)),
        Err(_) => None, // lagged, skip
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
