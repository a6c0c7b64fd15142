//! Read endpoints

use std::fmt::Write;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    response::Html,
};

use crate::api::{
    error::{ApiError, ApiResult},
    routes::updates::parse_json,
    state::ApiState,
    types::ValueQuery,
};
use crate::metric::{MetricKind, MetricRecord, ValidationError};

fn parse_lookup(id: &str, kind: &str) -> ApiResult<MetricKind> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId.into());
    }
    Ok(kind.parse::<MetricKind>()?)
}

/// POST /value/
///
/// Look up `{id, type}`; responds with the stored record
pub async fn value_json(State(state): State<ApiState>, body: Bytes) -> ApiResult<Json<MetricRecord>> {
    let query: ValueQuery = parse_json(&body)?;
    let kind = parse_lookup(&query.id, &query.kind)?;
    let record = state.service.query(&query.id, kind).await?;
    Ok(Json(record))
}

/// GET /value/:type/:id
///
/// Plain-text value of one metric
pub async fn value_from_path(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind = parse_lookup(&id, &kind)?;
    let record = state.service.query(&id, kind).await?;
    Ok(record.display_value())
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// GET /
///
/// Every stored metric as a simple HTML page
pub async fn list_all(State(state): State<ApiState>) -> ApiResult<Html<String>> {
    let records = state.service.list_all().await?;

    let mut page = String::from("<html><body><ul>\n");
    for record in &records {
        writeln!(
            page,
            "<li>{} ({}): {}</li>",
            escape_html(&record.id),
            record.kind,
            record.display_value()
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    }
    page.push_str("</ul></body></html>\n");

    Ok(Html(page))
}
