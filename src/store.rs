//! Record store: durable, transactional ownership of all entities.
//!
//! Every mutation runs in one SQLite transaction that also appends the
//! matching audit entries; if the audit insert fails the whole write is
//! refused and the store latches read-only until operator intervention.
//! The connection mutex linearizes concurrent events per entity.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, NewAuditEntry};
use crate::db::repository as repo;
use crate::db::{self, DatabaseError};
use crate::lifecycle::{self, QueryEvent, TransitionError};
use crate::models::bridge::BridgeQuery;
use crate::models::clinician::Clinician;
use crate::models::enums::{BridgeStatus, QueryStatus, Urgency};
use crate::models::patient::{Patient, VitalSigns};
use crate::models::query::{AiAnalysis, Query, QueryMessage};

/// Responder id used for system-released messages (auto-release path).
pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("concurrent modification detected")]
    Conflict,

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store is read-only after a fatal audit failure")]
    ReadOnly,

    #[error("invalid bridge transition {from} -> {to}")]
    InvalidBridgeTransition {
        from: BridgeStatus,
        to: BridgeStatus,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, .. } => Self::NotFound(entity_type),
            DatabaseError::InvalidEnum { .. }
            | DatabaseError::InvalidValue { .. }
            | DatabaseError::ConstraintViolation(_) => Self::Invalid(err.to_string()),
            DatabaseError::Sqlite(_) | DatabaseError::MigrationFailed { .. } => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}

/// Fields a bridge status change may carry.
#[derive(Debug, Clone, Default)]
pub struct BridgeUpdateFields {
    pub safety_score: Option<u8>,
    pub urgency: Option<Urgency>,
    pub response: Option<String>,
    pub error_message: Option<String>,
}

/// Outcome of a bridge status change: applied, or an idempotent replay
/// of the current status (no write, no audit entry).
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeAdvance {
    Applied(BridgeQuery),
    Replay(BridgeQuery),
}

pub struct RecordStore {
    conn: Mutex<Connection>,
    read_only: AtomicBool,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open_database(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            read_only: AtomicBool::new(false),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = db::open_memory_database()?;
        Ok(Self {
            conn: Mutex::new(conn),
            read_only: AtomicBool::new(false),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }

    fn guard_writable(&self) -> Result<(), StoreError> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    /// Append an audit entry inside the caller's transaction. A failure
    /// here latches the store read-only: no mutation may commit without
    /// the audit log witnessing it.
    fn audit_in_tx(
        &self,
        tx: &Connection,
        entry: &NewAuditEntry,
    ) -> Result<(), StoreError> {
        repo::audit::insert_audit_entry(tx, entry).map_err(|e| {
            self.read_only.store(true, Ordering::SeqCst);
            tracing::error!(error = %e, "audit append failed; store latched read-only");
            StoreError::Unavailable(format!("audit log unavailable: {e}"))
        })?;
        Ok(())
    }

    /// Append a standalone audit entry (events that accompany no other
    /// mutation, e.g. consent blocks and cache hits).
    pub fn append_audit(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.audit_in_tx(&tx, &entry)?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    // ── Patients ────────────────────────────────────────────

    pub fn create_patient(&self, p: &Patient) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        repo::patient::insert_patient(&tx, p)?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::PatientRegistered)
                .patient(p.id)
                .detail(serde_json::json!({ "active": p.active })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tracing::info!(patient_id = %p.id, "patient registered");
        Ok(())
    }

    pub fn patient(&self, id: &Uuid) -> Result<Option<Patient>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::patient::get_patient(&conn, id)?)
    }

    pub fn update_patient(&self, p: &Patient) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut updated = p.clone();
        updated.updated_at = Utc::now();
        repo::patient::update_patient(&tx, &updated)?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::PatientUpdated).patient(p.id),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn set_patient_active(&self, id: &Uuid, active: bool) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut patient = repo::patient::get_patient(&tx, id)?
            .ok_or_else(|| StoreError::NotFound("patient".into()))?;
        patient.active = active;
        patient.updated_at = Utc::now();
        repo::patient::update_patient(&tx, &patient)?;
        let action = if active {
            AuditAction::PatientUpdated
        } else {
            AuditAction::PatientDeactivated
        };
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(action)
                .patient(*id)
                .detail(serde_json::json!({ "active": active })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Merge newly reported measurements into the patient's latest
    /// vitals; unknown fields never overwrite known ones.
    pub fn record_patient_vitals(
        &self,
        id: &Uuid,
        vitals: &VitalSigns,
    ) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut patient = repo::patient::get_patient(&tx, id)?
            .ok_or_else(|| StoreError::NotFound("patient".into()))?;

        let merged = &mut patient.latest_vitals;
        macro_rules! merge {
            ($field:ident) => {
                if vitals.$field.is_known() {
                    merged.$field = vitals.$field;
                }
            };
        }
        merge!(glucose_mg_dl);
        merge!(systolic);
        merge!(diastolic);
        merge!(heart_rate);
        merge!(temperature_c);
        merge!(oxygen_saturation);
        merge!(weight_kg);
        merge!(bmi);
        merged.recorded_at = vitals.recorded_at.or(Some(Utc::now()));

        patient.updated_at = Utc::now();
        repo::patient::update_patient(&tx, &patient)?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::PatientUpdated)
                .patient(*id)
                .detail(serde_json::json!({ "vitals": true })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    // ── Clinicians ──────────────────────────────────────────

    pub fn create_clinician(&self, c: &Clinician) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        repo::clinician::insert_clinician(&tx, c)?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::ClinicianRegistered).actor(c.id),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn clinician(&self, id: &Uuid) -> Result<Option<Clinician>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::clinician::get_clinician(&conn, id)?)
    }

    pub fn active_clinicians(&self) -> Result<Vec<Clinician>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::clinician::list_active_clinicians(&conn)?)
    }

    pub fn touch_clinician_seen(&self, id: &Uuid) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Ok(repo::clinician::touch_last_seen(&conn, id, Utc::now())?)
    }

    pub fn open_counts_by_clinician(
        &self,
    ) -> Result<std::collections::HashMap<Uuid, i64>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::query::open_counts_by_clinician(&conn)?
            .into_iter()
            .collect())
    }

    // ── Queries ─────────────────────────────────────────────

    pub fn create_query(&self, q: &Query) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        repo::query::insert_query(&tx, q)?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::QuerySubmitted)
                .actor(q.patient_id)
                .patient(q.patient_id)
                .query(q.id)
                .detail(serde_json::json!({
                    "category": q.category.as_str(),
                    "priority": q.priority.as_str(),
                })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tracing::info!(query_id = %q.id, patient_id = %q.patient_id, "query submitted");
        Ok(())
    }

    pub fn query(&self, id: &Uuid) -> Result<Option<Query>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::query::get_query(&conn, id)?)
    }

    pub fn patient_queries(
        &self,
        patient_id: &Uuid,
        status: Option<QueryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Query>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::query::list_queries_by_patient(
            &conn, patient_id, status, limit, offset,
        )?)
    }

    pub fn queries_by_status(&self, status: QueryStatus) -> Result<Vec<Query>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::query::list_queries_by_status(&conn, status)?)
    }

    /// Attach the AI outcome and move submitted → pending, atomically.
    pub fn record_ai_outcome(
        &self,
        query_id: &Uuid,
        analysis: AiAnalysis,
        draft: String,
        score: u8,
        urgency: Urgency,
        review_required: bool,
    ) -> Result<Query, StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut q = repo::query::get_query(&tx, query_id)?
            .ok_or_else(|| StoreError::NotFound("query".into()))?;
        if q.status != QueryStatus::Submitted {
            return Err(StoreError::Conflict);
        }

        q.ai_analysis = Some(analysis);
        q.ai_draft = Some(draft);
        q.safety_score = Some(score);
        q.urgency = Some(urgency);
        q.human_review_required = review_required;

        let next = lifecycle::transition(&q, &QueryEvent::AiCompleted)?;
        let from = q.status;
        q.status = next;
        q.version += 1;
        q.updated_at = Utc::now();
        repo::query::update_query(&tx, &q)?;

        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::AiCompleted)
                .patient(q.patient_id)
                .query(q.id)
                .detail(serde_json::json!({
                    "from": from.as_str(),
                    "to": next.as_str(),
                    "safety_score": score,
                    "urgency": urgency.as_str(),
                    "human_review_required": review_required,
                })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(q)
    }

    /// Apply a lifecycle event: resolve the transition, persist the new
    /// state and its side effects, and append exactly one audit entry.
    ///
    /// `expected_version` enables optimistic concurrency for callers
    /// that read a snapshot earlier; `None` skips the check (the
    /// connection mutex still linearizes the write itself).
    pub fn apply_transition(
        &self,
        query_id: &Uuid,
        event: &QueryEvent,
        actor: Option<Uuid>,
        expected_version: Option<i64>,
    ) -> Result<Query, StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut q = repo::query::get_query(&tx, query_id)?
            .ok_or_else(|| StoreError::NotFound("query".into()))?;

        if let Some(expected) = expected_version {
            if q.version != expected {
                return Err(StoreError::Conflict);
            }
        }

        let from = q.status;
        let next = lifecycle::transition(&q, event)?;
        let now = Utc::now();

        let mut detail = serde_json::json!({
            "from": from.as_str(),
            "to": next.as_str(),
        });

        match event {
            QueryEvent::Assign { clinician_id } | QueryEvent::Reassign { clinician_id } => {
                q.assigned_clinician_id = Some(*clinician_id);
                q.assigned_at = Some(now);
                detail["clinician_id"] = serde_json::json!(clinician_id.to_string());
            }
            QueryEvent::Respond { clinician_id, text } => {
                let message = QueryMessage::official(*clinician_id, text.clone());
                repo::query::insert_message(&tx, &q.id, &message)?;
                q.messages.push(message);
            }
            QueryEvent::PatientReplied { patient_id, text } => {
                let message = QueryMessage::patient_reply(*patient_id, text.clone());
                repo::query::insert_message(&tx, &q.id, &message)?;
                q.messages.push(message);
            }
            QueryEvent::AutoRelease => {
                // The released draft becomes the official response,
                // attributed to the system actor.
                let draft = q.ai_draft.clone().ok_or_else(|| {
                    StoreError::Invalid("auto-release without an AI draft".into())
                })?;
                let message = QueryMessage::official(SYSTEM_ACTOR, draft);
                repo::query::insert_message(&tx, &q.id, &message)?;
                q.messages.push(message);
            }
            QueryEvent::Escalate { reason } => {
                detail["reason"] = serde_json::json!(reason);
            }
            _ => {}
        }

        q.status = next;
        // resolved_at is set exactly once, on first entry to a terminal
        // state, and never moves afterwards.
        if next.is_terminal() && q.resolved_at.is_none() {
            q.resolved_at = Some(now);
        }
        q.version += 1;
        q.updated_at = now;
        repo::query::update_query(&tx, &q)?;

        let action = match event {
            QueryEvent::AiCompleted => AuditAction::AiCompleted,
            QueryEvent::Assign { .. } => AuditAction::QueryAssigned,
            QueryEvent::OpenReview { .. } => AuditAction::ReviewOpened,
            QueryEvent::Respond { .. } => AuditAction::QueryResolved,
            QueryEvent::RequestPatientInfo { .. } => AuditAction::PatientInfoRequested,
            QueryEvent::PatientReplied { .. } => AuditAction::PatientReplied,
            QueryEvent::Escalate { .. } => AuditAction::QueryEscalated,
            QueryEvent::Reassign { .. } => AuditAction::QueryReassigned,
            QueryEvent::AutoRelease => AuditAction::AutoReleased,
            QueryEvent::Close => AuditAction::QueryClosed,
            QueryEvent::Cancel => AuditAction::QueryCancelled,
        };
        let mut entry = NewAuditEntry::new(action)
            .patient(q.patient_id)
            .query(q.id)
            .detail(detail);
        if let Some(actor) = actor {
            entry = entry.actor(actor);
        }
        self.audit_in_tx(&tx, &entry)?;

        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tracing::info!(
            query_id = %q.id,
            from = from.as_str(),
            to = next.as_str(),
            event = event.name(),
            "query transitioned"
        );
        Ok(q)
    }

    /// Record a clinician review decision into the audit trail. This is
    /// the decision event the review gate requires before a gated query
    /// may resolve; the subsequent transition appends its own entry.
    pub fn record_review_decision(
        &self,
        query_id: &Uuid,
        clinician_id: &Uuid,
        decision: &str,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let q = repo::query::get_query(&tx, query_id)?
            .ok_or_else(|| StoreError::NotFound("query".into()))?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::ReviewDecision)
                .actor(*clinician_id)
                .patient(q.patient_id)
                .query(q.id)
                .detail(serde_json::json!({
                    "decision": decision,
                    "note": note,
                })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn rate_query(
        &self,
        query_id: &Uuid,
        patient_id: &Uuid,
        rating: u8,
    ) -> Result<(), StoreError> {
        self.guard_writable()?;
        if !(1..=5).contains(&rating) {
            return Err(StoreError::Invalid("rating must be 1-5".into()));
        }
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut q = repo::query::get_query(&tx, query_id)?
            .ok_or_else(|| StoreError::NotFound("query".into()))?;
        if q.patient_id != *patient_id {
            return Err(StoreError::NotFound("query".into()));
        }
        if !q.status.is_terminal() {
            return Err(StoreError::Invalid(
                "only resolved queries can be rated".into(),
            ));
        }
        q.satisfaction_rating = Some(rating);
        q.version += 1;
        q.updated_at = Utc::now();
        repo::query::update_query(&tx, &q)?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::QueryRated)
                .actor(*patient_id)
                .patient(*patient_id)
                .query(*query_id)
                .detail(serde_json::json!({ "rating": rating })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    // ── Bridge queries ──────────────────────────────────────

    pub fn create_bridge_query(&self, query_id: &Uuid) -> Result<BridgeQuery, StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let b = BridgeQuery::new(*query_id);
        repo::bridge::insert_bridge_query(&tx, &b)?;
        self.audit_in_tx(
            &tx,
            &NewAuditEntry::new(AuditAction::BridgeRegistered)
                .query(*query_id)
                .detail(serde_json::json!({ "bridge_id": b.id.to_string() })),
        )?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(b)
    }

    pub fn bridge_query_for(&self, query_id: &Uuid) -> Result<Option<BridgeQuery>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::bridge::get_bridge_query_by_query(&conn, query_id)?)
    }

    /// Advance a bridge query along its monotone status path.
    ///
    /// Delivering the current status again is an idempotent replay:
    /// no write, no audit entry. Any regression is rejected.
    pub fn advance_bridge(
        &self,
        query_id: &Uuid,
        to: BridgeStatus,
        fields: BridgeUpdateFields,
        action: AuditAction,
        client_info: Option<String>,
    ) -> Result<BridgeAdvance, StoreError> {
        self.guard_writable()?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut b = repo::bridge::get_bridge_query_by_query(&tx, query_id)?
            .ok_or_else(|| StoreError::NotFound("bridge_query".into()))?;

        if b.status == to {
            return Ok(BridgeAdvance::Replay(b));
        }
        if to.rank() <= b.status.rank() {
            return Err(StoreError::InvalidBridgeTransition {
                from: b.status,
                to,
            });
        }

        let from = b.status;
        b.status = to;
        if fields.safety_score.is_some() {
            b.safety_score = fields.safety_score;
        }
        if fields.urgency.is_some() {
            b.urgency = fields.urgency;
        }
        if fields.response.is_some() {
            b.response = fields.response;
        }
        if fields.error_message.is_some() {
            b.error_message = fields.error_message;
        }
        b.updated_at = Utc::now();
        repo::bridge::update_bridge_query(&tx, &b)?;

        let mut entry = NewAuditEntry::new(action).query(*query_id).detail(
            serde_json::json!({
                "from": from.as_str(),
                "to": to.as_str(),
                "error": b.error_message,
            }),
        );
        if let Some(info) = client_info {
            entry = entry.client(info);
        }
        self.audit_in_tx(&tx, &entry)?;
        tx.commit().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(BridgeAdvance::Applied(b))
    }

    pub fn stale_bridge_queries(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BridgeQuery>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::bridge::list_stale_bridge_queries(&conn, cutoff)?)
    }

    // ── Audit readers ───────────────────────────────────────

    pub fn query_audit_trail(&self, query_id: &Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::audit::list_audit_for_query(&conn, query_id)?)
    }

    pub fn patient_audit_trail(
        &self,
        patient_id: &Uuid,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::audit::list_audit_for_patient(&conn, patient_id)?)
    }

    pub fn clinician_audit_trail(
        &self,
        clinician_id: &Uuid,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::audit::list_audit_for_actor(&conn, clinician_id)?)
    }

    pub fn audit_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = self.lock()?;
        Ok(repo::audit::list_audit_in_range(&conn, from, to)?)
    }

    pub fn prune_audit(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.guard_writable()?;
        let conn = self.lock()?;
        Ok(repo::audit::prune_audit_log(&conn, cutoff)?)
    }

    // ── Aggregates ──────────────────────────────────────────

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.lock()?;
        let by_status = repo::query::count_queries_by_status(&conn)?;
        let resolution_times = repo::query::resolution_times(&conn)?;
        let avg_response_minutes = if resolution_times.is_empty() {
            None
        } else {
            let total: i64 = resolution_times
                .iter()
                .map(|(c, r)| (*r - *c).num_minutes().max(0))
                .sum();
            Some(total as f64 / resolution_times.len() as f64)
        };
        Ok(StoreCounts {
            patients: repo::patient::count_patients(&conn)?,
            active_patients: repo::patient::count_active_patients(&conn)?,
            clinicians: repo::clinician::count_clinicians(&conn)?,
            queries: repo::query::count_queries(&conn)?,
            queries_by_status: by_status,
            bridge_by_status: repo::bridge::count_bridge_by_status(&conn)?,
            avg_response_minutes,
        })
    }

    #[cfg(test)]
    pub(crate) fn raw_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreCounts {
    pub patients: i64,
    pub active_patients: i64,
    pub clinicians: i64,
    pub queries: i64,
    pub queries_by_status: Vec<(QueryStatus, i64)>,
    pub bridge_by_status: Vec<(BridgeStatus, i64)>,
    pub avg_response_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{QueryCategory, QueryPriority, RiskLabel};
    use crate::models::patient::ConsentFlags;

    fn store_with_query(review_required: bool) -> (RecordStore, Patient, Query, Clinician) {
        let store = RecordStore::open_in_memory().unwrap();
        let patient = Patient::new("Store Patient", ConsentFlags::granted());
        store.create_patient(&patient).unwrap();
        let clinician = Clinician::new("Dr. Store", vec![]);
        store.create_clinician(&clinician).unwrap();

        let query = Query::new(
            patient.id,
            "Test",
            "I feel shaky and dizzy",
            QueryCategory::Symptom,
            QueryPriority::Normal,
        );
        store.create_query(&query).unwrap();

        let analysis = AiAnalysis {
            confidence: 0.7,
            flagged_symptoms: vec!["shaky".into()],
            suggested_specialty: None,
            risk_label: if review_required {
                RiskLabel::Critical
            } else {
                RiskLabel::Routine
            },
            model_version: "clinical-llm-2".into(),
            analyzed_at: Utc::now(),
        };
        let score = if review_required { 25 } else { 100 };
        let urgency = if review_required {
            Urgency::High
        } else {
            Urgency::Low
        };
        let query = store
            .record_ai_outcome(
                &query.id,
                analysis,
                "Draft response".into(),
                score,
                urgency,
                review_required,
            )
            .unwrap();
        (store, patient, query, clinician)
    }

    #[test]
    fn round_trip_returns_last_committed_snapshot() {
        let (store, _, query, _) = store_with_query(false);
        let loaded = store.query(&query.id).unwrap().unwrap();
        assert_eq!(loaded, query);
    }

    #[test]
    fn ai_outcome_moves_submitted_to_pending() {
        let (store, _, query, _) = store_with_query(true);
        assert_eq!(query.status, QueryStatus::Pending);
        assert_eq!(query.safety_score, Some(25));
        assert!(query.human_review_required);

        // Applying the AI outcome twice is a conflict
        let analysis = query.ai_analysis.clone().unwrap();
        let err = store
            .record_ai_outcome(&query.id, analysis, "Again".into(), 90, Urgency::Low, false)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn gated_resolve_without_review_is_rejected() {
        let (store, _, query, clinician) = store_with_query(true);
        let err = store
            .apply_transition(
                &query.id,
                &QueryEvent::Respond {
                    clinician_id: clinician.id,
                    text: "Bypassing review".into(),
                },
                Some(clinician.id),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::PolicyViolation(_))
        ));
        // And the stored status is untouched
        let loaded = store.query(&query.id).unwrap().unwrap();
        assert_eq!(loaded.status, QueryStatus::Pending);
    }

    #[test]
    fn full_review_path_appends_one_audit_entry_per_transition() {
        let (store, _, query, clinician) = store_with_query(true);

        store
            .apply_transition(
                &query.id,
                &QueryEvent::Assign {
                    clinician_id: clinician.id,
                },
                None,
                None,
            )
            .unwrap();
        store
            .apply_transition(
                &query.id,
                &QueryEvent::OpenReview {
                    clinician_id: clinician.id,
                },
                Some(clinician.id),
                None,
            )
            .unwrap();
        store
            .record_review_decision(&query.id, &clinician.id, "edit", Some("softened wording"))
            .unwrap();
        let resolved = store
            .apply_transition(
                &query.id,
                &QueryEvent::Respond {
                    clinician_id: clinician.id,
                    text: "Please take 15g of fast-acting carbs and retest.".into(),
                },
                Some(clinician.id),
                None,
            )
            .unwrap();

        assert_eq!(resolved.status, QueryStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.messages.len(), 1);
        assert!(resolved.messages[0].is_official);

        let trail = store.query_audit_trail(&query.id).unwrap();
        let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "query_submitted",
                "ai_completed",
                "query_assigned",
                "review_opened",
                "review_decision",
                "query_resolved",
            ]
        );
        // Decision strictly precedes the resolving entry
        let decision_pos = actions.iter().position(|a| *a == "review_decision").unwrap();
        let resolved_pos = actions.iter().position(|a| *a == "query_resolved").unwrap();
        assert!(decision_pos < resolved_pos);
        // Trail is strictly ordered by sequence
        assert!(trail.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn resolved_at_is_immutable_once_set() {
        let (store, _, query, _) = store_with_query(false);
        let resolved = store
            .apply_transition(&query.id, &QueryEvent::AutoRelease, None, None)
            .unwrap();
        let first = resolved.resolved_at.unwrap();
        assert!(first >= resolved.created_at);

        let closed = store
            .apply_transition(&query.id, &QueryEvent::Close, None, None)
            .unwrap();
        assert_eq!(closed.resolved_at, Some(first));
        assert_eq!(closed.response_time_minutes(), Some(0));
    }

    #[test]
    fn version_check_detects_concurrent_modification() {
        let (store, _, query, clinician) = store_with_query(true);
        let stale_version = query.version;

        store
            .apply_transition(
                &query.id,
                &QueryEvent::Assign {
                    clinician_id: clinician.id,
                },
                None,
                Some(stale_version),
            )
            .unwrap();

        // Second writer still holding the old version loses
        let err = store
            .apply_transition(
                &query.id,
                &QueryEvent::Escalate {
                    reason: "duplicate".into(),
                },
                None,
                Some(stale_version),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn cancel_sets_resolved_at_and_closes() {
        let (store, patient, query, _) = store_with_query(false);
        let closed = store
            .apply_transition(&query.id, &QueryEvent::Cancel, Some(patient.id), None)
            .unwrap();
        assert_eq!(closed.status, QueryStatus::Closed);
        assert!(closed.resolved_at.is_some());
    }

    #[test]
    fn bridge_advance_is_monotone_and_idempotent() {
        let (store, _, query, _) = store_with_query(false);
        store.create_bridge_query(&query.id).unwrap();

        let advanced = store
            .advance_bridge(
                &query.id,
                BridgeStatus::Processing,
                BridgeUpdateFields::default(),
                AuditAction::BridgeProcessing,
                None,
            )
            .unwrap();
        assert!(matches!(advanced, BridgeAdvance::Applied(_)));

        // Replay of the current status: no-op
        let replay = store
            .advance_bridge(
                &query.id,
                BridgeStatus::Processing,
                BridgeUpdateFields::default(),
                AuditAction::BridgeProcessing,
                None,
            )
            .unwrap();
        assert!(matches!(replay, BridgeAdvance::Replay(_)));

        let completed = store
            .advance_bridge(
                &query.id,
                BridgeStatus::Completed,
                BridgeUpdateFields {
                    safety_score: Some(92),
                    urgency: Some(Urgency::Low),
                    response: Some("ok".into()),
                    error_message: None,
                },
                AuditAction::BridgeCompleted,
                None,
            )
            .unwrap();
        match completed {
            BridgeAdvance::Applied(b) => {
                assert_eq!(b.status, BridgeStatus::Completed);
                assert_eq!(b.safety_score, Some(92));
            }
            other => panic!("Expected Applied, got {other:?}"),
        }

        // Regression is rejected and state is preserved
        let err = store
            .advance_bridge(
                &query.id,
                BridgeStatus::Processing,
                BridgeUpdateFields::default(),
                AuditAction::BridgeProcessing,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidBridgeTransition { .. }));
        let b = store.bridge_query_for(&query.id).unwrap().unwrap();
        assert_eq!(b.status, BridgeStatus::Completed);
    }

    #[test]
    fn audit_failure_latches_store_read_only() {
        let (store, _, query, clinician) = store_with_query(false);
        store
            .raw_conn()
            .execute_batch("DROP TABLE audit_log")
            .unwrap();

        let err = store
            .apply_transition(
                &query.id,
                &QueryEvent::Assign {
                    clinician_id: clinician.id,
                },
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.is_read_only());

        // All further writes are refused up front
        let p = Patient::new("Late", ConsentFlags::granted());
        assert!(matches!(
            store.create_patient(&p).unwrap_err(),
            StoreError::ReadOnly
        ));
        // The failed transition never became visible
        let loaded = store.query(&query.id).unwrap().unwrap();
        assert_eq!(loaded.status, QueryStatus::Pending);
    }

    #[test]
    fn rating_requires_terminal_status_and_ownership() {
        let (store, patient, query, _) = store_with_query(false);
        let err = store.rate_query(&query.id, &patient.id, 5).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        store
            .apply_transition(&query.id, &QueryEvent::AutoRelease, None, None)
            .unwrap();
        store.rate_query(&query.id, &patient.id, 4).unwrap();
        let loaded = store.query(&query.id).unwrap().unwrap();
        assert_eq!(loaded.satisfaction_rating, Some(4));

        let stranger = Uuid::new_v4();
        assert!(matches!(
            store.rate_query(&query.id, &stranger, 2).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn counts_aggregate_by_status() {
        let (store, _, query, _) = store_with_query(false);
        store
            .apply_transition(&query.id, &QueryEvent::AutoRelease, None, None)
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.patients, 1);
        assert_eq!(counts.clinicians, 1);
        assert_eq!(counts.queries, 1);
        assert_eq!(
            counts.queries_by_status,
            vec![(QueryStatus::Resolved, 1)]
        );
        assert_eq!(counts.avg_response_minutes, Some(0.0));
    }

    #[test]
    fn audit_readers_filter_by_clinician_and_range() {
        let (store, _, query, clinician) = store_with_query(true);
        store
            .apply_transition(
                &query.id,
                &QueryEvent::Assign {
                    clinician_id: clinician.id,
                },
                Some(clinician.id),
                None,
            )
            .unwrap();

        let by_clinician = store.clinician_audit_trail(&clinician.id).unwrap();
        assert!(by_clinician
            .iter()
            .any(|e| e.action == "query_assigned"));

        let now = Utc::now();
        let in_range = store
            .audit_in_range(now - chrono::Duration::minutes(5), now + chrono::Duration::minutes(1))
            .unwrap();
        assert!(in_range.len() >= by_clinician.len());
        let empty = store
            .audit_in_range(now + chrono::Duration::hours(1), now + chrono::Duration::hours(2))
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn vitals_merge_never_erases_known_values() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut patient = Patient::new("Vitals", ConsentFlags::granted());
        patient.latest_vitals.systolic = crate::models::Datum::known(134);
        store.create_patient(&patient).unwrap();

        let update = VitalSigns {
            glucose_mg_dl: crate::models::Datum::known(52.0),
            ..VitalSigns::default()
        };
        store.record_patient_vitals(&patient.id, &update).unwrap();

        let loaded = store.patient(&patient.id).unwrap().unwrap();
        assert_eq!(loaded.latest_vitals.glucose_mg_dl.get(), Some(52.0));
        assert_eq!(loaded.latest_vitals.systolic.get(), Some(134));
        assert!(loaded.latest_vitals.recorded_at.is_some());
    }
}
