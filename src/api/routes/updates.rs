//! Ingestion endpoints

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use serde::de::DeserializeOwned;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::BatchResponse,
};
use crate::metric::{MetricKind, MetricRecord, ValidationError};

pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidRequest(format!("invalid JSON: {e}")))
}

/// POST /update/
///
/// Apply one record; responds with the stored record
pub async fn update_one(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<MetricRecord>> {
    let record: MetricRecord = parse_json(&body)?;
    let stored = state.service.update_one(record).await?;
    Ok(Json(stored))
}

/// POST /updates/
///
/// Apply a JSON array of records; invalid entries are skipped
pub async fn update_batch(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<BatchResponse>> {
    let records: Vec<MetricRecord> = parse_json(&body)?;
    let applied = state.service.update_batch(records).await?;
    Ok(Json(BatchResponse { applied }))
}

/// POST /update/:type/:id/:value
///
/// Path form of a single update
pub async fn update_from_path(
    State(state): State<ApiState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> ApiResult<Json<MetricRecord>> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId.into());
    }

    let record = match kind.parse::<MetricKind>()? {
        MetricKind::Counter => {
            let delta = value
                .parse::<i64>()
                .map_err(|_| ApiError::InvalidRequest(format!("invalid counter delta: {value}")))?;
            MetricRecord::counter(id, delta)
        }
        MetricKind::Gauge => {
            let value = value
                .parse::<f64>()
                .map_err(|_| ApiError::InvalidRequest(format!("invalid gauge value: {value}")))?;
            MetricRecord::gauge(id, value)
        }
    };

    let stored = state.service.update_one(record).await?;
    Ok(Json(stored))
}
