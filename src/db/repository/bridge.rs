use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::bridge::BridgeQuery;
use crate::models::enums::{BridgeStatus, Urgency};

use super::{parse_ts, parse_uuid, ts};

pub fn insert_bridge_query(conn: &Connection, b: &BridgeQuery) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO bridge_queries (id, query_id, status, safety_score, urgency, response,
         error_message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            b.id.to_string(),
            b.query_id.to_string(),
            b.status.as_str(),
            b.safety_score,
            b.urgency.map(|u| u.as_str()),
            b.response,
            b.error_message,
            ts(b.created_at),
            ts(b.updated_at),
        ],
    )?;
    Ok(())
}

struct BridgeRow {
    id: String,
    query_id: String,
    status: String,
    safety_score: Option<u8>,
    urgency: Option<String>,
    response: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

const BRIDGE_COLUMNS: &str =
    "id, query_id, status, safety_score, urgency, response, error_message, created_at, updated_at";

fn row_to_struct(row: &rusqlite::Row<'_>) -> rusqlite::Result<BridgeRow> {
    Ok(BridgeRow {
        id: row.get(0)?,
        query_id: row.get(1)?,
        status: row.get(2)?,
        safety_score: row.get(3)?,
        urgency: row.get(4)?,
        response: row.get(5)?,
        error_message: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn bridge_from_row(row: BridgeRow) -> Result<BridgeQuery, DatabaseError> {
    Ok(BridgeQuery {
        id: parse_uuid("bridge_queries.id", &row.id)?,
        query_id: parse_uuid("bridge_queries.query_id", &row.query_id)?,
        status: row.status.parse::<BridgeStatus>()?,
        safety_score: row.safety_score,
        urgency: row
            .urgency
            .as_deref()
            .map(str::parse::<Urgency>)
            .transpose()?,
        response: row.response,
        error_message: row.error_message,
        created_at: parse_ts("bridge_queries.created_at", &row.created_at)?,
        updated_at: parse_ts("bridge_queries.updated_at", &row.updated_at)?,
    })
}

pub fn get_bridge_query_by_query(
    conn: &Connection,
    query_id: &Uuid,
) -> Result<Option<BridgeQuery>, DatabaseError> {
    let sql = format!("SELECT {BRIDGE_COLUMNS} FROM bridge_queries WHERE query_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![query_id.to_string()], row_to_struct);
    match result {
        Ok(row) => Ok(Some(bridge_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Full-row update keyed by the bridge query's own id.
pub fn update_bridge_query(conn: &Connection, b: &BridgeQuery) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE bridge_queries SET status = ?2, safety_score = ?3, urgency = ?4,
         response = ?5, error_message = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            b.id.to_string(),
            b.status.as_str(),
            b.safety_score,
            b.urgency.map(|u| u.as_str()),
            b.response,
            b.error_message,
            ts(b.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "bridge_query".into(),
            id: b.id.to_string(),
        });
    }
    Ok(())
}

/// Non-terminal entries created strictly before the cutoff.
pub fn list_stale_bridge_queries(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<BridgeQuery>, DatabaseError> {
    let sql = format!(
        "SELECT {BRIDGE_COLUMNS} FROM bridge_queries
         WHERE status IN ('pending', 'processing') AND created_at < ?1
         ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![ts(cutoff)], row_to_struct)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(bridge_from_row).collect()
}

pub fn count_bridge_by_status(
    conn: &Connection,
) -> Result<Vec<(BridgeStatus, i64)>, DatabaseError> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM bridge_queries GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(s, n)| Ok((s.parse::<BridgeStatus>()?, n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::patient::insert_patient;
    use crate::db::repository::query::insert_query;
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::{QueryCategory, QueryPriority};
    use crate::models::patient::{ConsentFlags, Patient};
    use crate::models::query::Query;

    fn setup() -> (Connection, Uuid) {
        let conn = open_memory_database().unwrap();
        let p = Patient::new("Bridge Patient", ConsentFlags::granted());
        insert_patient(&conn, &p).unwrap();
        let q = Query::new(
            p.id,
            "Test",
            "Test query",
            QueryCategory::General,
            QueryPriority::Normal,
        );
        insert_query(&conn, &q).unwrap();
        (conn, q.id)
    }

    #[test]
    fn insert_and_get_by_query_round_trip() {
        let (conn, query_id) = setup();
        let b = BridgeQuery::new(query_id);
        insert_bridge_query(&conn, &b).unwrap();

        let loaded = get_bridge_query_by_query(&conn, &query_id).unwrap().unwrap();
        assert_eq!(loaded, b);
    }

    #[test]
    fn update_persists_terminal_state() {
        let (conn, query_id) = setup();
        let mut b = BridgeQuery::new(query_id);
        insert_bridge_query(&conn, &b).unwrap();

        b.status = BridgeStatus::Completed;
        b.safety_score = Some(85);
        b.urgency = Some(Urgency::Low);
        b.response = Some("All good.".into());
        b.updated_at = Utc::now();
        update_bridge_query(&conn, &b).unwrap();

        let loaded = get_bridge_query_by_query(&conn, &query_id).unwrap().unwrap();
        assert_eq!(loaded.status, BridgeStatus::Completed);
        assert_eq!(loaded.safety_score, Some(85));
    }

    #[test]
    fn stale_listing_only_returns_old_non_terminal() {
        let (conn, query_id) = setup();
        let mut stale = BridgeQuery::new(query_id);
        stale.created_at = Utc::now() - chrono::Duration::hours(25);
        insert_bridge_query(&conn, &stale).unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let listed = list_stale_bridge_queries(&conn, cutoff).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stale.id);

        // Terminal entries never appear, however old
        let mut b = listed.into_iter().next().unwrap();
        b.status = BridgeStatus::Failed;
        b.error_message = Some("TimedOut".into());
        update_bridge_query(&conn, &b).unwrap();
        assert!(list_stale_bridge_queries(&conn, cutoff).unwrap().is_empty());
    }

    #[test]
    fn one_bridge_query_per_query() {
        let (conn, query_id) = setup();
        insert_bridge_query(&conn, &BridgeQuery::new(query_id)).unwrap();
        let err = insert_bridge_query(&conn, &BridgeQuery::new(query_id)).unwrap_err();
        assert!(matches!(err, DatabaseError::Sqlite(_)));
    }
}
