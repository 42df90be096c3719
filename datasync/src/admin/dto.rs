use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::SourceStatus;

// ---------- data source requests ----------

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: SourceStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub hard: bool,
}

/// Body of the batch test / sync endpoints.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<Uuid>,
}

// ---------- sync requests ----------

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub force: bool,
}

/// Optional body of `POST /datasources/{id}/sync`.
#[derive(Debug, Default, Deserialize)]
pub struct SyncBody {
    /// Records pushed to a webhook source for this run.
    #[serde(default)]
    pub payload: Option<Value>,
}

// ---------- mapping requests ----------

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub records: Vec<Value>,
}

// ---------- responses ----------

#[derive(Debug, Serialize)]
pub struct BatchResponse<T> {
    pub results: Vec<T>,
    pub succeeded: usize,
    pub failed: usize,
}

impl<T> BatchResponse<T> {
    pub fn new(results: Vec<T>, ok: impl Fn(&T) -> bool) -> Self {
        let succeeded = results.iter().filter(|r| ok(r)).count();
        Self {
            failed: results.len() - succeeded,
            succeeded,
            results,
        }
    }
}
