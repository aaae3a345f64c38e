use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::datum::Datum;
use crate::models::enums::{BloodType, DiabetesType, Gender};
use crate::models::patient::{
    ConsentFlags, ContactPreferences, MedicalHistory, Patient, VitalSigns,
};

use super::{
    json_to_list, list_to_json, parse_date, parse_ts, parse_ts_opt, parse_uuid, parse_uuid_opt,
    ts, ts_opt,
};

pub fn insert_patient(conn: &Connection, p: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, full_name, date_of_birth, gender, blood_type, diabetes_type,
         conditions, medications, allergies, family_history, surgeries,
         glucose_mg_dl, systolic, diastolic, heart_rate, temperature_c, oxygen_saturation,
         weight_kg, bmi, vitals_recorded_at, primary_clinician_id, active,
         consent_treatment, consent_privacy, consent_data_processing,
         email_updates, sms_reminders, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
        params![
            p.id.to_string(),
            p.full_name,
            p.date_of_birth.map(|d| d.to_string()),
            p.gender.as_known().map(|g| g.as_str()),
            p.blood_type.as_known().map(|b| b.as_str()),
            p.diabetes_type.as_known().map(|d| d.as_str()),
            list_to_json(&p.history.conditions),
            list_to_json(&p.history.medications),
            list_to_json(&p.history.allergies),
            list_to_json(&p.history.family_history),
            list_to_json(&p.history.surgeries),
            p.latest_vitals.glucose_mg_dl.get(),
            p.latest_vitals.systolic.get(),
            p.latest_vitals.diastolic.get(),
            p.latest_vitals.heart_rate.get(),
            p.latest_vitals.temperature_c.get(),
            p.latest_vitals.oxygen_saturation.get(),
            p.latest_vitals.weight_kg.get(),
            p.latest_vitals.bmi.get(),
            ts_opt(p.latest_vitals.recorded_at),
            p.primary_clinician_id.map(|id| id.to_string()),
            p.active as i32,
            p.consents.treatment as i32,
            p.consents.privacy_acknowledged as i32,
            p.consents.data_processing as i32,
            p.contact.email_updates as i32,
            p.contact.sms_reminders as i32,
            ts(p.created_at),
            ts(p.updated_at),
        ],
    )?;
    Ok(())
}

struct PatientRow {
    id: String,
    full_name: String,
    date_of_birth: Option<String>,
    gender: Option<String>,
    blood_type: Option<String>,
    diabetes_type: Option<String>,
    conditions: String,
    medications: String,
    allergies: String,
    family_history: String,
    surgeries: String,
    glucose_mg_dl: Option<f64>,
    systolic: Option<u16>,
    diastolic: Option<u16>,
    heart_rate: Option<u16>,
    temperature_c: Option<f64>,
    oxygen_saturation: Option<u8>,
    weight_kg: Option<f64>,
    bmi: Option<f64>,
    vitals_recorded_at: Option<String>,
    primary_clinician_id: Option<String>,
    active: i32,
    consent_treatment: i32,
    consent_privacy: i32,
    consent_data_processing: i32,
    email_updates: i32,
    sms_reminders: i32,
    created_at: String,
    updated_at: String,
}

const PATIENT_COLUMNS: &str = "id, full_name, date_of_birth, gender, blood_type, diabetes_type,
     conditions, medications, allergies, family_history, surgeries,
     glucose_mg_dl, systolic, diastolic, heart_rate, temperature_c, oxygen_saturation,
     weight_kg, bmi, vitals_recorded_at, primary_clinician_id, active,
     consent_treatment, consent_privacy, consent_data_processing,
     email_updates, sms_reminders, created_at, updated_at";

fn row_to_struct(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        date_of_birth: row.get(2)?,
        gender: row.get(3)?,
        blood_type: row.get(4)?,
        diabetes_type: row.get(5)?,
        conditions: row.get(6)?,
        medications: row.get(7)?,
        allergies: row.get(8)?,
        family_history: row.get(9)?,
        surgeries: row.get(10)?,
        glucose_mg_dl: row.get(11)?,
        systolic: row.get(12)?,
        diastolic: row.get(13)?,
        heart_rate: row.get(14)?,
        temperature_c: row.get(15)?,
        oxygen_saturation: row.get(16)?,
        weight_kg: row.get(17)?,
        bmi: row.get(18)?,
        vitals_recorded_at: row.get(19)?,
        primary_clinician_id: row.get(20)?,
        active: row.get(21)?,
        consent_treatment: row.get(22)?,
        consent_privacy: row.get(23)?,
        consent_data_processing: row.get(24)?,
        email_updates: row.get(25)?,
        sms_reminders: row.get(26)?,
        created_at: row.get(27)?,
        updated_at: row.get(28)?,
    })
}

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    let gender = match row.gender {
        Some(s) => Datum::Known(s.parse::<Gender>()?),
        None => Datum::Unknown,
    };
    let blood_type = match row.blood_type {
        Some(s) => Datum::Known(s.parse::<BloodType>()?),
        None => Datum::Unknown,
    };
    let diabetes_type = match row.diabetes_type {
        Some(s) => Datum::Known(s.parse::<DiabetesType>()?),
        None => Datum::Unknown,
    };

    Ok(Patient {
        id: parse_uuid("patients.id", &row.id)?,
        full_name: row.full_name,
        date_of_birth: row
            .date_of_birth
            .map(|d| parse_date("patients.date_of_birth", &d))
            .transpose()?,
        gender,
        blood_type,
        diabetes_type,
        history: MedicalHistory {
            conditions: json_to_list("patients.conditions", &row.conditions)?,
            medications: json_to_list("patients.medications", &row.medications)?,
            allergies: json_to_list("patients.allergies", &row.allergies)?,
            family_history: json_to_list("patients.family_history", &row.family_history)?,
            surgeries: json_to_list("patients.surgeries", &row.surgeries)?,
        },
        latest_vitals: VitalSigns {
            glucose_mg_dl: row.glucose_mg_dl.into(),
            systolic: row.systolic.into(),
            diastolic: row.diastolic.into(),
            heart_rate: row.heart_rate.into(),
            temperature_c: row.temperature_c.into(),
            oxygen_saturation: row.oxygen_saturation.into(),
            weight_kg: row.weight_kg.into(),
            bmi: row.bmi.into(),
            recorded_at: parse_ts_opt("patients.vitals_recorded_at", row.vitals_recorded_at)?,
        },
        primary_clinician_id: parse_uuid_opt(
            "patients.primary_clinician_id",
            row.primary_clinician_id,
        )?,
        active: row.active != 0,
        consents: ConsentFlags {
            treatment: row.consent_treatment != 0,
            privacy_acknowledged: row.consent_privacy != 0,
            data_processing: row.consent_data_processing != 0,
        },
        contact: ContactPreferences {
            email_updates: row.email_updates != 0,
            sms_reminders: row.sms_reminders != 0,
        },
        created_at: parse_ts("patients.created_at", &row.created_at)?,
        updated_at: parse_ts("patients.updated_at", &row.updated_at)?,
    })
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], row_to_struct);
    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Full-row update; caller is responsible for bumping `updated_at`.
pub fn update_patient(conn: &Connection, p: &Patient) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE patients SET full_name = ?2, date_of_birth = ?3, gender = ?4, blood_type = ?5,
         diabetes_type = ?6, conditions = ?7, medications = ?8, allergies = ?9,
         family_history = ?10, surgeries = ?11, glucose_mg_dl = ?12, systolic = ?13,
         diastolic = ?14, heart_rate = ?15, temperature_c = ?16, oxygen_saturation = ?17,
         weight_kg = ?18, bmi = ?19, vitals_recorded_at = ?20, primary_clinician_id = ?21,
         active = ?22, consent_treatment = ?23, consent_privacy = ?24,
         consent_data_processing = ?25, email_updates = ?26, sms_reminders = ?27,
         updated_at = ?28
         WHERE id = ?1",
        params![
            p.id.to_string(),
            p.full_name,
            p.date_of_birth.map(|d| d.to_string()),
            p.gender.as_known().map(|g| g.as_str()),
            p.blood_type.as_known().map(|b| b.as_str()),
            p.diabetes_type.as_known().map(|d| d.as_str()),
            list_to_json(&p.history.conditions),
            list_to_json(&p.history.medications),
            list_to_json(&p.history.allergies),
            list_to_json(&p.history.family_history),
            list_to_json(&p.history.surgeries),
            p.latest_vitals.glucose_mg_dl.get(),
            p.latest_vitals.systolic.get(),
            p.latest_vitals.diastolic.get(),
            p.latest_vitals.heart_rate.get(),
            p.latest_vitals.temperature_c.get(),
            p.latest_vitals.oxygen_saturation.get(),
            p.latest_vitals.weight_kg.get(),
            p.latest_vitals.bmi.get(),
            ts_opt(p.latest_vitals.recorded_at),
            p.primary_clinician_id.map(|id| id.to_string()),
            p.active as i32,
            p.consents.treatment as i32,
            p.consents.privacy_acknowledged as i32,
            p.consents.data_processing as i32,
            p.contact.email_updates as i32,
            p.contact.sms_reminders as i32,
            ts(p.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: p.id.to_string(),
        });
    }
    Ok(())
}

pub fn count_patients(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_active_patients(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM patients WHERE active = 1", [], |row| {
        row.get(0)
    })?;
    Ok(count)
}
