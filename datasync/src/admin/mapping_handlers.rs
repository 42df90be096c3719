use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::engine::Record;
use crate::mapping::{MappingRulePatch, MappingRuleView, NewMappingRule};

use super::{AdminState, ApiErr, dto::PreviewRequest};

// ---------- GET /datasources/{id}/mappings ----------

pub async fn list_rules(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MappingRuleView>>, ApiErr> {
    Ok(Json(state.pipeline.list_mapping_rules(id).await?))
}

// ---------- POST /datasources/{id}/mappings ----------

pub async fn add_rule(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<NewMappingRule>,
) -> Result<(StatusCode, Json<MappingRuleView>), ApiErr> {
    let rule = state.pipeline.add_mapping_rule(id, body).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

// ---------- PUT /datasources/{id}/mappings/{rule_id} ----------

pub async fn update_rule(
    State(state): State<AdminState>,
    Path((id, rule_id)): Path<(Uuid, i32)>,
    Json(body): Json<MappingRulePatch>,
) -> Result<Json<MappingRuleView>, ApiErr> {
    state
        .pipeline
        .update_mapping_rule(id, rule_id, body)
        .await?
        .map(Json)
        .ok_or_else(|| ApiErr::not_found("Mapping rule not found"))
}

// ---------- DELETE /datasources/{id}/mappings/{rule_id} ----------

pub async fn delete_rule(
    State(state): State<AdminState>,
    Path((id, rule_id)): Path<(Uuid, i32)>,
) -> Result<StatusCode, ApiErr> {
    if !state.pipeline.delete_mapping_rule(id, rule_id).await? {
        return Err(ApiErr::not_found("Mapping rule not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------- POST /datasources/{id}/mappings/preview ----------

pub async fn preview(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PreviewRequest>,
) -> Result<Json<Vec<Record>>, ApiErr> {
    Ok(Json(state.pipeline.preview_mapping(id, &body.records).await?))
}
