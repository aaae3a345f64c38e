use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::clinician::Clinician;
use crate::models::specialty::Specialty;

use super::{parse_ts, parse_ts_opt, parse_uuid, ts, ts_opt};

fn specialties_to_json(specialties: &[Specialty]) -> String {
    let labels: Vec<String> = specialties.iter().map(|s| s.label()).collect();
    serde_json::to_string(&labels).unwrap_or_else(|_| "[]".into())
}

fn specialties_from_json(s: &str) -> Result<Vec<Specialty>, DatabaseError> {
    let labels: Vec<String> =
        serde_json::from_str(s).map_err(|_| DatabaseError::InvalidValue {
            field: "clinicians.specialties".into(),
            value: s.into(),
        })?;
    Ok(labels.iter().map(|l| Specialty::parse_label(l)).collect())
}

pub fn insert_clinician(conn: &Connection, c: &Clinician) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO clinicians (id, full_name, specialties, license_number, last_seen_at,
         active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            c.id.to_string(),
            c.full_name,
            specialties_to_json(&c.specialties),
            c.license_number,
            ts_opt(c.last_seen_at),
            c.active as i32,
            ts(c.created_at),
        ],
    )?;
    Ok(())
}

struct ClinicianRow {
    id: String,
    full_name: String,
    specialties: String,
    license_number: Option<String>,
    last_seen_at: Option<String>,
    active: i32,
    created_at: String,
}

fn row_to_struct(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClinicianRow> {
    Ok(ClinicianRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        specialties: row.get(2)?,
        license_number: row.get(3)?,
        last_seen_at: row.get(4)?,
        active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn clinician_from_row(row: ClinicianRow) -> Result<Clinician, DatabaseError> {
    Ok(Clinician {
        id: parse_uuid("clinicians.id", &row.id)?,
        full_name: row.full_name,
        specialties: specialties_from_json(&row.specialties)?,
        license_number: row.license_number,
        last_seen_at: parse_ts_opt("clinicians.last_seen_at", row.last_seen_at)?,
        active: row.active != 0,
        created_at: parse_ts("clinicians.created_at", &row.created_at)?,
    })
}

const CLINICIAN_COLUMNS: &str =
    "id, full_name, specialties, license_number, last_seen_at, active, created_at";

pub fn get_clinician(conn: &Connection, id: &Uuid) -> Result<Option<Clinician>, DatabaseError> {
    let sql = format!("SELECT {CLINICIAN_COLUMNS} FROM clinicians WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], row_to_struct);
    match result {
        Ok(row) => Ok(Some(clinician_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_active_clinicians(conn: &Connection) -> Result<Vec<Clinician>, DatabaseError> {
    let sql = format!(
        "SELECT {CLINICIAN_COLUMNS} FROM clinicians WHERE active = 1 ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_struct)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(clinician_from_row).collect()
}

pub fn touch_last_seen(
    conn: &Connection,
    id: &Uuid,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE clinicians SET last_seen_at = ?2 WHERE id = ?1",
        params![id.to_string(), ts(at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "clinician".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn set_clinician_active(
    conn: &Connection,
    id: &Uuid,
    active: bool,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE clinicians SET active = ?2 WHERE id = ?1",
        params![id.to_string(), active as i32],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "clinician".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn count_clinicians(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM clinicians", [], |row| row.get(0))?;
    Ok(count)
}
