//! Relational schema for stored metrics
//!
//! One table holds both kinds. Counters use the `delta` column and gauges the
//! `value` column; the other stays `NULL`.
//!
//! ```text
//! metrics
//! ├── id     TEXT              ┐ primary key
//! ├── kind   TEXT              ┘
//! ├── delta  BIGINT            (counters)
//! └── value  DOUBLE PRECISION  (gauges)
//! ```

use crate::metric::{MetricKind, MetricRecord};

/// Idempotent DDL run on every startup
pub const CREATE_METRICS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id    TEXT NOT NULL,
        kind  TEXT NOT NULL,
        delta BIGINT,
        value DOUBLE PRECISION,
        PRIMARY KEY (id, kind)
    )
"#;

/// Add to a counter, creating it at 0 first, and return the new total
pub const UPSERT_COUNTER: &str = r#"
    INSERT INTO metrics (id, kind, delta, value)
    VALUES (?, 'counter', ?, NULL)
    ON CONFLICT (id, kind) DO UPDATE SET
        delta = COALESCE(metrics.delta, 0) + excluded.delta
    RETURNING delta
"#;

/// Replace a gauge's value
pub const UPSERT_GAUGE: &str = r#"
    INSERT INTO metrics (id, kind, delta, value)
    VALUES (?, 'gauge', NULL, ?)
    ON CONFLICT (id, kind) DO UPDATE SET
        value = excluded.value
"#;

/// Overwrite a counter with an absolute value (used by restore)
pub const REPLACE_COUNTER: &str = r#"
    INSERT INTO metrics (id, kind, delta, value)
    VALUES (?, 'counter', ?, NULL)
    ON CONFLICT (id, kind) DO UPDATE SET
        delta = excluded.delta
"#;

pub const SELECT_ONE: &str = "SELECT id, kind, delta, value FROM metrics WHERE id = ? AND kind = ?";

pub const SELECT_BY_KIND: &str =
    "SELECT id, kind, delta, value FROM metrics WHERE kind = ? ORDER BY id ASC";

/// One row of the `metrics` table
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub id: String,
    pub kind: MetricKind,
    pub delta: Option<i64>,
    pub value: Option<f64>,
}

impl From<MetricRow> for MetricRecord {
    fn from(row: MetricRow) -> Self {
        // a NULL payload column reads back as the zero value
        match row.kind {
            MetricKind::Counter => MetricRecord::counter(row.id, row.delta.unwrap_or(0)),
            MetricKind::Gauge => MetricRecord::gauge(row.id, row.value.unwrap_or(0.0)),
        }
    }
}
