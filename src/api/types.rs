//! Request and response bodies of the HTTP surface

use serde::{Deserialize, Serialize};

/// Body of `POST /value/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueQuery {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Response of `POST /updates/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Records applied; invalid ones are skipped
    pub applied: usize,
}

/// Response of `GET /ping`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `unavailable`
    pub status: String,

    /// RFC 3339 time of the check
    pub timestamp: String,
}
