//! Per-entity SQL access. Row structs mirror the column order of the
//! SELECT statements; conversion into domain models happens in one
//! place per entity so parse failures surface as `DatabaseError`.

pub mod audit;
pub mod bridge;
pub mod clinician;
pub mod patient;
pub mod query;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

use super::DatabaseError;

/// Render a timestamp as fixed-width RFC 3339 UTC so lexicographic
/// ordering in SQL matches chronological ordering. Nanosecond precision
/// keeps round trips exact.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn ts_opt(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(ts)
}

pub(crate) fn parse_ts(field: &str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            field: field.into(),
            value: s.into(),
        })
}

pub(crate) fn parse_ts_opt(
    field: &str,
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|v| parse_ts(field, &v)).transpose()
}

pub(crate) fn parse_date(field: &str, s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| DatabaseError::InvalidValue {
        field: field.into(),
        value: s.into(),
    })
}

pub(crate) fn parse_uuid(field: &str, s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|_| DatabaseError::InvalidValue {
        field: field.into(),
        value: s.into(),
    })
}

pub(crate) fn parse_uuid_opt(
    field: &str,
    s: Option<String>,
) -> Result<Option<Uuid>, DatabaseError> {
    s.map(|v| parse_uuid(field, &v)).transpose()
}

/// Serialize a string list as a JSON array column.
pub(crate) fn list_to_json(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}

pub(crate) fn json_to_list(field: &str, s: &str) -> Result<Vec<String>, DatabaseError> {
    serde_json::from_str(s).map_err(|_| DatabaseError::InvalidValue {
        field: field.into(),
        value: s.into(),
    })
}
