use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
#[cfg(test)]
use crate::models::enums::Urgency;
use crate::models::enums::{QueryCategory, QueryPriority, QueryStatus, RiskLabel};
use crate::models::query::{AiAnalysis, Query, QueryMessage};
use crate::models::specialty::Specialty;

use super::{json_to_list, list_to_json, parse_ts, parse_ts_opt, parse_uuid, parse_uuid_opt, ts, ts_opt};

pub fn insert_query(conn: &Connection, q: &Query) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO queries (id, patient_id, title, description, category, priority, status,
         assigned_clinician_id, ai_confidence, ai_flagged_symptoms, ai_suggested_specialty,
         ai_risk_label, ai_model_version, ai_analyzed_at, ai_draft, safety_score, urgency,
         human_review_required, attachments, satisfaction_rating, version,
         created_at, updated_at, assigned_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            q.id.to_string(),
            q.patient_id.to_string(),
            q.title,
            q.description,
            q.category.as_str(),
            q.priority.as_str(),
            q.status.as_str(),
            q.assigned_clinician_id.map(|id| id.to_string()),
            q.ai_analysis.as_ref().map(|a| a.confidence),
            q.ai_analysis
                .as_ref()
                .map(|a| list_to_json(&a.flagged_symptoms)),
            q.ai_analysis
                .as_ref()
                .and_then(|a| a.suggested_specialty.as_ref().map(|s| s.label())),
            q.ai_analysis.as_ref().map(|a| a.risk_label.as_str()),
            q.ai_analysis.as_ref().map(|a| a.model_version.clone()),
            q.ai_analysis.as_ref().map(|a| ts(a.analyzed_at)),
            q.ai_draft,
            q.safety_score,
            q.urgency.map(|u| u.as_str()),
            q.human_review_required as i32,
            list_to_json(&q.attachments),
            q.satisfaction_rating,
            q.version,
            ts(q.created_at),
            ts(q.updated_at),
            ts_opt(q.assigned_at),
            ts_opt(q.resolved_at),
        ],
    )?;
    Ok(())
}

/// Full-row update. Bumps nothing itself; the store sets `version` and
/// `updated_at` before calling.
pub fn update_query(conn: &Connection, q: &Query) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE queries SET title = ?2, description = ?3, category = ?4, priority = ?5,
         status = ?6, assigned_clinician_id = ?7, ai_confidence = ?8, ai_flagged_symptoms = ?9,
         ai_suggested_specialty = ?10, ai_risk_label = ?11, ai_model_version = ?12,
         ai_analyzed_at = ?13, ai_draft = ?14, safety_score = ?15, urgency = ?16,
         human_review_required = ?17, attachments = ?18, satisfaction_rating = ?19,
         version = ?20, updated_at = ?21, assigned_at = ?22, resolved_at = ?23
         WHERE id = ?1",
        params![
            q.id.to_string(),
            q.title,
            q.description,
            q.category.as_str(),
            q.priority.as_str(),
            q.status.as_str(),
            q.assigned_clinician_id.map(|id| id.to_string()),
            q.ai_analysis.as_ref().map(|a| a.confidence),
            q.ai_analysis
                .as_ref()
                .map(|a| list_to_json(&a.flagged_symptoms)),
            q.ai_analysis
                .as_ref()
                .and_then(|a| a.suggested_specialty.as_ref().map(|s| s.label())),
            q.ai_analysis.as_ref().map(|a| a.risk_label.as_str()),
            q.ai_analysis.as_ref().map(|a| a.model_version.clone()),
            q.ai_analysis.as_ref().map(|a| ts(a.analyzed_at)),
            q.ai_draft,
            q.safety_score,
            q.urgency.map(|u| u.as_str()),
            q.human_review_required as i32,
            list_to_json(&q.attachments),
            q.satisfaction_rating,
            q.version,
            ts(q.updated_at),
            ts_opt(q.assigned_at),
            ts_opt(q.resolved_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "query".into(),
            id: q.id.to_string(),
        });
    }
    Ok(())
}

struct QueryRow {
    id: String,
    patient_id: String,
    title: String,
    description: String,
    category: String,
    priority: String,
    status: String,
    assigned_clinician_id: Option<String>,
    ai_confidence: Option<f32>,
    ai_flagged_symptoms: Option<String>,
    ai_suggested_specialty: Option<String>,
    ai_risk_label: Option<String>,
    ai_model_version: Option<String>,
    ai_analyzed_at: Option<String>,
    ai_draft: Option<String>,
    safety_score: Option<u8>,
    urgency: Option<String>,
    human_review_required: i32,
    attachments: String,
    satisfaction_rating: Option<u8>,
    version: i64,
    created_at: String,
    updated_at: String,
    assigned_at: Option<String>,
    resolved_at: Option<String>,
}

const QUERY_COLUMNS: &str = "id, patient_id, title, description, category, priority, status,
     assigned_clinician_id, ai_confidence, ai_flagged_symptoms, ai_suggested_specialty,
     ai_risk_label, ai_model_version, ai_analyzed_at, ai_draft, safety_score, urgency,
     human_review_required, attachments, satisfaction_rating, version,
     created_at, updated_at, assigned_at, resolved_at";

fn row_to_struct(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryRow> {
    Ok(QueryRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        priority: row.get(5)?,
        status: row.get(6)?,
        assigned_clinician_id: row.get(7)?,
        ai_confidence: row.get(8)?,
        ai_flagged_symptoms: row.get(9)?,
        ai_suggested_specialty: row.get(10)?,
        ai_risk_label: row.get(11)?,
        ai_model_version: row.get(12)?,
        ai_analyzed_at: row.get(13)?,
        ai_draft: row.get(14)?,
        safety_score: row.get(15)?,
        urgency: row.get(16)?,
        human_review_required: row.get(17)?,
        attachments: row.get(18)?,
        satisfaction_rating: row.get(19)?,
        version: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
        assigned_at: row.get(23)?,
        resolved_at: row.get(24)?,
    })
}

fn query_from_row(row: QueryRow, messages: Vec<QueryMessage>) -> Result<Query, DatabaseError> {
    let ai_analysis = match row.ai_analyzed_at {
        Some(analyzed_at) => Some(AiAnalysis {
            confidence: row.ai_confidence.unwrap_or(0.0),
            flagged_symptoms: match row.ai_flagged_symptoms {
                Some(json) => json_to_list("queries.ai_flagged_symptoms", &json)?,
                None => Vec::new(),
            },
            suggested_specialty: row
                .ai_suggested_specialty
                .map(|s| Specialty::parse_label(&s)),
            risk_label: row
                .ai_risk_label
                .as_deref()
                .unwrap_or("routine")
                .parse::<RiskLabel>()?,
            model_version: row.ai_model_version.unwrap_or_default(),
            analyzed_at: parse_ts("queries.ai_analyzed_at", &analyzed_at)?,
        }),
        None => None,
    };

    Ok(Query {
        id: parse_uuid("queries.id", &row.id)?,
        patient_id: parse_uuid("queries.patient_id", &row.patient_id)?,
        title: row.title,
        description: row.description,
        category: row.category.parse::<QueryCategory>()?,
        priority: row.priority.parse::<QueryPriority>()?,
        status: row.status.parse::<QueryStatus>()?,
        assigned_clinician_id: parse_uuid_opt(
            "queries.assigned_clinician_id",
            row.assigned_clinician_id,
        )?,
        ai_analysis,
        ai_draft: row.ai_draft,
        safety_score: row.safety_score,
        urgency: row.urgency.as_deref().map(str::parse).transpose()?,
        human_review_required: row.human_review_required != 0,
        messages,
        attachments: json_to_list("queries.attachments", &row.attachments)?,
        satisfaction_rating: row.satisfaction_rating,
        version: row.version,
        created_at: parse_ts("queries.created_at", &row.created_at)?,
        updated_at: parse_ts("queries.updated_at", &row.updated_at)?,
        assigned_at: parse_ts_opt("queries.assigned_at", row.assigned_at)?,
        resolved_at: parse_ts_opt("queries.resolved_at", row.resolved_at)?,
    })
}

pub fn get_query(conn: &Connection, id: &Uuid) -> Result<Option<Query>, DatabaseError> {
    let sql = format!("SELECT {QUERY_COLUMNS} FROM queries WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], row_to_struct);
    match result {
        Ok(row) => {
            let messages = list_messages(conn, id)?;
            Ok(Some(query_from_row(row, messages)?))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn attach_messages(
    conn: &Connection,
    rows: Vec<QueryRow>,
) -> Result<Vec<Query>, DatabaseError> {
    rows.into_iter()
        .map(|row| {
            let id = parse_uuid("queries.id", &row.id)?;
            let messages = list_messages(conn, &id)?;
            query_from_row(row, messages)
        })
        .collect()
}

pub fn list_queries_by_patient(
    conn: &Connection,
    patient_id: &Uuid,
    status: Option<QueryStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Query>, DatabaseError> {
    let rows = match status {
        Some(s) => {
            let sql = format!(
                "SELECT {QUERY_COLUMNS} FROM queries
                 WHERE patient_id = ?1 AND status = ?2
                 ORDER BY created_at DESC LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let x = stmt
                .query_map(
                    params![patient_id.to_string(), s.as_str(), limit, offset],
                    row_to_struct,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            x
        }
        None => {
            let sql = format!(
                "SELECT {QUERY_COLUMNS} FROM queries
                 WHERE patient_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let x = stmt
                .query_map(params![patient_id.to_string(), limit, offset], row_to_struct)?
                .collect::<Result<Vec<_>, _>>()?;
            x
        }
    };
    attach_messages(conn, rows)
}

pub fn list_queries_by_status(
    conn: &Connection,
    status: QueryStatus,
) -> Result<Vec<Query>, DatabaseError> {
    let sql = format!(
        "SELECT {QUERY_COLUMNS} FROM queries WHERE status = ?1 ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![status.as_str()], row_to_struct)?
        .collect::<Result<Vec<_>, _>>()?;
    attach_messages(conn, rows)
}

pub fn count_queries_by_status(
    conn: &Connection,
) -> Result<Vec<(QueryStatus, i64)>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM queries GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(s, n)| Ok((s.parse::<QueryStatus>()?, n)))
        .collect()
}

pub fn count_queries(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM queries", [], |row| row.get(0))?;
    Ok(count)
}

/// Open (non-terminal) query count per assigned clinician.
pub fn open_counts_by_clinician(
    conn: &Connection,
) -> Result<Vec<(Uuid, i64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT assigned_clinician_id, COUNT(*) FROM queries
         WHERE assigned_clinician_id IS NOT NULL
           AND status NOT IN ('resolved', 'closed')
         GROUP BY assigned_clinician_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, n)| Ok((parse_uuid("queries.assigned_clinician_id", &id)?, n)))
        .collect()
}

/// (created_at, resolved_at) pairs for resolved and closed queries,
/// for response-time aggregation.
pub fn resolution_times(
    conn: &Connection,
) -> Result<Vec<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT created_at, resolved_at FROM queries WHERE resolved_at IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(c, r)| {
            Ok((
                parse_ts("queries.created_at", &c)?,
                parse_ts("queries.resolved_at", &r)?,
            ))
        })
        .collect()
}

// ── Messages ────────────────────────────────────────────────

pub fn insert_message(
    conn: &Connection,
    query_id: &Uuid,
    m: &QueryMessage,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO query_messages (id, query_id, responder_id, body, is_official,
         attachments, read_by_patient, read_by_clinician, sent_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            m.id.to_string(),
            query_id.to_string(),
            m.responder_id.to_string(),
            m.body,
            m.is_official as i32,
            list_to_json(&m.attachments),
            m.read_by_patient as i32,
            m.read_by_clinician as i32,
            ts(m.sent_at),
        ],
    )?;
    Ok(())
}

pub fn list_messages(
    conn: &Connection,
    query_id: &Uuid,
) -> Result<Vec<QueryMessage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, responder_id, body, is_official, attachments, read_by_patient,
         read_by_clinician, sent_at
         FROM query_messages WHERE query_id = ?1 ORDER BY sent_at, id",
    )?;
    let rows = stmt
        .query_map(params![query_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i32>(5)?,
                row.get::<_, i32>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(id, responder, body, official, attachments, read_p, read_c, sent_at)| {
                Ok(QueryMessage {
                    id: parse_uuid("query_messages.id", &id)?,
                    responder_id: parse_uuid("query_messages.responder_id", &responder)?,
                    body,
                    is_official: official != 0,
                    attachments: json_to_list("query_messages.attachments", &attachments)?,
                    read_by_patient: read_p != 0,
                    read_by_clinician: read_c != 0,
                    sent_at: parse_ts("query_messages.sent_at", &sent_at)?,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::patient::insert_patient;
    use crate::db::sqlite::open_memory_database;
    use crate::models::patient::{ConsentFlags, Patient};

    fn setup() -> (Connection, Patient) {
        let conn = open_memory_database().unwrap();
        let p = Patient::new("Query Patient", ConsentFlags::granted());
        insert_patient(&conn, &p).unwrap();
        (conn, p)
    }

    fn sample_query(patient_id: Uuid) -> Query {
        Query::new(
            patient_id,
            "Dizzy spells",
            "I feel shaky and dizzy",
            QueryCategory::Symptom,
            QueryPriority::High,
        )
    }

    #[test]
    fn insert_and_get_round_trip() {
        let (conn, p) = setup();
        let q = sample_query(p.id);
        insert_query(&conn, &q).unwrap();

        let loaded = get_query(&conn, &q.id).unwrap().unwrap();
        assert_eq!(loaded, q);
    }

    #[test]
    fn ai_analysis_round_trips() {
        let (conn, p) = setup();
        let mut q = sample_query(p.id);
        q.ai_analysis = Some(AiAnalysis {
            confidence: 0.82,
            flagged_symptoms: vec!["dizziness".into(), "tremor".into()],
            suggested_specialty: Some(Specialty::Endocrinology),
            risk_label: RiskLabel::Critical,
            model_version: "clinical-llm-2".into(),
            analyzed_at: chrono::Utc::now(),
        });
        q.ai_draft = Some("Your reading suggests low blood sugar.".into());
        q.safety_score = Some(25);
        q.urgency = Some(Urgency::High);
        q.human_review_required = true;
        insert_query(&conn, &q).unwrap();

        let loaded = get_query(&conn, &q.id).unwrap().unwrap();
        assert_eq!(loaded, q);
    }

    #[test]
    fn update_persists_status_and_version() {
        let (conn, p) = setup();
        let mut q = sample_query(p.id);
        insert_query(&conn, &q).unwrap();

        q.status = QueryStatus::Pending;
        q.version += 1;
        q.updated_at = chrono::Utc::now();
        update_query(&conn, &q).unwrap();

        let loaded = get_query(&conn, &q.id).unwrap().unwrap();
        assert_eq!(loaded.status, QueryStatus::Pending);
        assert_eq!(loaded.version, 2);
    }

    #[test]
    fn messages_are_ordered_and_attached() {
        let (conn, p) = setup();
        let q = sample_query(p.id);
        insert_query(&conn, &q).unwrap();

        let first = QueryMessage::official(Uuid::new_v4(), "First");
        let mut second = QueryMessage::official(Uuid::new_v4(), "Second");
        second.sent_at = first.sent_at + chrono::Duration::seconds(5);
        insert_message(&conn, &q.id, &first).unwrap();
        insert_message(&conn, &q.id, &second).unwrap();

        let loaded = get_query(&conn, &q.id).unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].body, "First");
        assert_eq!(loaded.messages[1].body, "Second");
    }

    #[test]
    fn list_by_patient_filters_status() {
        let (conn, p) = setup();
        let mut pending = sample_query(p.id);
        pending.status = QueryStatus::Pending;
        let submitted = sample_query(p.id);
        insert_query(&conn, &pending).unwrap();
        insert_query(&conn, &submitted).unwrap();

        let all = list_queries_by_patient(&conn, &p.id, None, 50, 0).unwrap();
        assert_eq!(all.len(), 2);

        let only_pending =
            list_queries_by_patient(&conn, &p.id, Some(QueryStatus::Pending), 50, 0).unwrap();
        assert_eq!(only_pending.len(), 1);
        assert_eq!(only_pending[0].id, pending.id);
    }

    #[test]
    fn open_counts_exclude_terminal_queries() {
        let (conn, p) = setup();
        let clinician = Uuid::new_v4();
        conn.execute(
            "INSERT INTO clinicians (id, full_name, specialties, active, created_at)
             VALUES (?1, 'Dr. L', '[]', 1, '2026-08-01T00:00:00.000000Z')",
            params![clinician.to_string()],
        )
        .unwrap();

        let mut open = sample_query(p.id);
        open.status = QueryStatus::Assigned;
        open.assigned_clinician_id = Some(clinician);
        let mut closed = sample_query(p.id);
        closed.status = QueryStatus::Resolved;
        closed.assigned_clinician_id = Some(clinician);
        closed.resolved_at = Some(chrono::Utc::now());
        insert_query(&conn, &open).unwrap();
        insert_query(&conn, &closed).unwrap();

        let counts = open_counts_by_clinician(&conn).unwrap();
        assert_eq!(counts, vec![(clinician, 1)]);
    }

    #[test]
    fn count_by_status_groups_rows() {
        let (conn, p) = setup();
        insert_query(&conn, &sample_query(p.id)).unwrap();
        insert_query(&conn, &sample_query(p.id)).unwrap();

        let counts = count_queries_by_status(&conn).unwrap();
        assert_eq!(counts, vec![(QueryStatus::Submitted, 2)]);
    }
}
