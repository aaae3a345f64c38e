use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::audit::{AuditEntry, NewAuditEntry};
use crate::db::DatabaseError;

use super::{parse_ts, parse_uuid_opt, ts};

pub fn insert_audit_entry(conn: &Connection, e: &NewAuditEntry) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (action, actor_id, patient_id, query_id, detail, client_info,
         recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            e.action.as_str(),
            e.actor_id.map(|id| id.to_string()),
            e.patient_id.map(|id| id.to_string()),
            e.query_id.map(|id| id.to_string()),
            e.detail.to_string(),
            e.client_info,
            ts(e.recorded_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, Option<String>, Option<String>, Option<String>, String, Option<String>, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn convert(
    raw: (i64, String, Option<String>, Option<String>, Option<String>, String, Option<String>, String),
) -> Result<AuditEntry, DatabaseError> {
    let (id, action, actor, patient, query, detail, client_info, recorded_at) = raw;
    Ok(AuditEntry {
        id,
        action,
        actor_id: parse_uuid_opt("audit_log.actor_id", actor)?,
        patient_id: parse_uuid_opt("audit_log.patient_id", patient)?,
        query_id: parse_uuid_opt("audit_log.query_id", query)?,
        detail: serde_json::from_str(&detail).unwrap_or(serde_json::Value::Null),
        client_info,
        recorded_at: parse_ts("audit_log.recorded_at", &recorded_at)?,
    })
}

const AUDIT_COLUMNS: &str =
    "id, action, actor_id, patient_id, query_id, detail, client_info, recorded_at";

pub fn list_audit_for_query(
    conn: &Connection,
    query_id: &Uuid,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE query_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![query_id.to_string()], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(convert).collect()
}

pub fn list_audit_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE patient_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![patient_id.to_string()], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(convert).collect()
}

pub fn list_audit_for_actor(
    conn: &Connection,
    actor_id: &Uuid,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE actor_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![actor_id.to_string()], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(convert).collect()
}

pub fn list_audit_in_range(
    conn: &Connection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let sql = format!(
        "SELECT {AUDIT_COLUMNS} FROM audit_log
         WHERE recorded_at >= ?1 AND recorded_at < ?2 ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![ts(from), ts(to)], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(convert).collect()
}

/// Delete entries older than the cutoff. Retention policy only; no
/// other code path removes audit rows.
pub fn prune_audit_log(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM audit_log WHERE recorded_at < ?1",
        params![ts(cutoff)],
    )?;
    Ok(deleted)
}

pub fn count_audit_entries(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
    Ok(count)
}
