//! Platform service: the inbound API facade.
//!
//! Sequences the pipeline for each query (consent gate, admission,
//! context assembly, bridge round trip, safety scoring, lifecycle
//! transition, assignment) and enforces backpressure: per-patient
//! bound plus global AI concurrency. Patients never see internal errors
//! or fallback markers; gated queries get the awaiting-review notice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::assignment::{select_clinician, ReviewDecision};
use crate::audit::{AuditAction, NewAuditEntry};
use crate::bridge::{AiBridge, AiResponse, BridgeError, BridgeStats, ResponseSource};
use crate::config::Config;
use crate::context::MedicalContext;
use crate::lifecycle::{QueryEvent, TransitionError};
use crate::models::clinician::Clinician;
use crate::models::enums::{
    QueryCategory, QueryPriority, QueryStatus, RiskLabel, Urgency,
};
use crate::models::patient::{ConsentFlags, Patient, VitalSigns};
use crate::models::query::{AiAnalysis, Query};
use crate::models::specialty::Specialty;
use crate::reconciler::{BridgeReconciler, BridgeWebhook, ReconcilerError, WebhookOutcome};
use crate::scoring;
use crate::store::{RecordStore, StoreError};

/// Patient-facing notice for gated queries.
pub const REVIEW_NOTICE: &str = "Thank you, your question has been received. Because of its \
     content it is being reviewed by your care team, and you will get a response shortly.";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("caller lacks rights for this action")]
    Unauthorized,

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("concurrent update detected")]
    Conflict,

    #[error("rate limited; retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("patient queue is full")]
    QueueFull,

    #[error("upstream AI failure: {0}")]
    Upstream(String),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => Self::NotFound(entity),
            StoreError::Conflict => Self::Conflict,
            StoreError::Invalid(m) => Self::Invalid(m),
            StoreError::Unavailable(m) => Self::Fatal(m),
            StoreError::ReadOnly => Self::Fatal("store is read-only".into()),
            StoreError::InvalidBridgeTransition { from, to } => {
                Self::Invalid(format!("invalid bridge transition {from} -> {to}"))
            }
            StoreError::Transition(t) => match t {
                TransitionError::PolicyViolation(reason) => {
                    Self::PolicyViolation(reason.to_string())
                }
                TransitionError::NotAssignedClinician => Self::Unauthorized,
                TransitionError::NotPermitted { from, event } => {
                    Self::Invalid(format!("event {event} not permitted in status {from}"))
                }
                TransitionError::InvalidEvent(m) => Self::Invalid(m.to_string()),
            },
        }
    }
}

impl From<BridgeError> for ServiceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::RateLimited { retry_after_s } => Self::RateLimited { retry_after_s },
            BridgeError::Timeout => Self::Timeout,
            other => Self::Upstream(other.to_string()),
        }
    }
}

/// What the patient gets back from `process_medical_query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientReply {
    pub content: String,
    pub safety_score: u8,
    pub urgency: Urgency,
    pub requires_review: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    pub items: Vec<Query>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub patients: i64,
    pub active_patients: i64,
    pub clinicians: i64,
    pub queries: i64,
    pub queries_by_status: HashMap<String, i64>,
    pub bridge_by_status: HashMap<String, i64>,
    pub avg_response_time_minutes: Option<f64>,
    pub bridge: BridgeStats,
}

pub struct PlatformService {
    store: Arc<RecordStore>,
    bridge: Arc<AiBridge>,
    reconciler: Arc<BridgeReconciler>,
    config: Config,
    ai_permits: Semaphore,
    in_flight: Mutex<HashMap<Uuid, usize>>,
}

impl PlatformService {
    pub fn new(
        store: Arc<RecordStore>,
        bridge: Arc<AiBridge>,
        reconciler: Arc<BridgeReconciler>,
        config: Config,
    ) -> Self {
        let permits = config.global_ai_concurrency.max(1);
        Self {
            store,
            bridge,
            reconciler,
            config,
            ai_permits: Semaphore::new(permits),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<BridgeReconciler> {
        &self.reconciler
    }

    // ── Registration ────────────────────────────────────────

    pub fn register_patient(
        &self,
        full_name: &str,
        date_of_birth: Option<NaiveDate>,
        consents: ConsentFlags,
    ) -> Result<Uuid, ServiceError> {
        if full_name.trim().is_empty() {
            return Err(ServiceError::Invalid("patient name is required".into()));
        }
        let mut patient = Patient::new(full_name.trim(), consents);
        patient.date_of_birth = date_of_birth;
        self.store.create_patient(&patient)?;
        Ok(patient.id)
    }

    /// Register a patient from a full record (demographics, history,
    /// vitals, preferences) in one call.
    pub fn create_enhanced_patient(&self, patient: Patient) -> Result<Uuid, ServiceError> {
        if patient.full_name.trim().is_empty() {
            return Err(ServiceError::Invalid("patient name is required".into()));
        }
        self.store.create_patient(&patient)?;
        Ok(patient.id)
    }

    pub fn register_clinician(
        &self,
        full_name: &str,
        specialties: Vec<Specialty>,
        license_number: Option<String>,
    ) -> Result<Uuid, ServiceError> {
        if full_name.trim().is_empty() {
            return Err(ServiceError::Invalid("clinician name is required".into()));
        }
        let mut clinician = Clinician::new(full_name.trim(), specialties);
        clinician.license_number = license_number;
        self.store.create_clinician(&clinician)?;
        Ok(clinician.id)
    }

    pub fn set_patient_active(&self, patient_id: &Uuid, active: bool) -> Result<(), ServiceError> {
        self.store.set_patient_active(patient_id, active)?;
        Ok(())
    }

    // ── Query intake ────────────────────────────────────────

    /// Create a query in `submitted`, merging any reported vitals into
    /// the patient record first.
    pub fn submit_query(
        &self,
        patient_id: &Uuid,
        title: &str,
        description: &str,
        category: Option<QueryCategory>,
        priority: Option<QueryPriority>,
        vitals: Option<&VitalSigns>,
    ) -> Result<Uuid, ServiceError> {
        if title.trim().is_empty() || description.trim().is_empty() {
            return Err(ServiceError::Invalid(
                "query title and description are required".into(),
            ));
        }
        let patient = self
            .store
            .patient(patient_id)?
            .ok_or_else(|| ServiceError::NotFound("patient".into()))?;
        if !patient.active {
            return Err(ServiceError::Invalid("patient record is inactive".into()));
        }

        if let Some(v) = vitals {
            self.store.record_patient_vitals(patient_id, v)?;
        }

        let query = Query::new(
            *patient_id,
            title.trim(),
            description.trim(),
            category.unwrap_or(QueryCategory::General),
            priority.unwrap_or(QueryPriority::Normal),
        );
        self.store.create_query(&query)?;
        Ok(query.id)
    }

    /// Run the full pipeline for a submitted query.
    pub async fn process_query(&self, query_id: &Uuid) -> Result<Query, ServiceError> {
        let query = self
            .store
            .query(query_id)?
            .ok_or_else(|| ServiceError::NotFound("query".into()))?;
        if query.status != QueryStatus::Submitted {
            return Err(ServiceError::Conflict);
        }

        let patient = self.store.patient(&query.patient_id)?;

        // Consent gate: nothing leaves `submitted` without all three
        // consent flags.
        if let Some(p) = &patient {
            if !p.consents.all_granted() {
                self.store.append_audit(
                    NewAuditEntry::new(AuditAction::ConsentBlocked)
                        .patient(p.id)
                        .query(query.id),
                )?;
                return Err(ServiceError::PolicyViolation(
                    "patient consent is required before processing".into(),
                ));
            }
        }

        let context = match &patient {
            Some(p) => MedicalContext::assemble(p),
            None => MedicalContext::unknown(),
        };

        // Backpressure: bounded per-patient work, bounded global AI
        // concurrency (FIFO), then the bridge's own sliding window.
        let _in_flight = self.begin_patient_work(query.patient_id)?;
        let _permit = self
            .ai_permits
            .acquire()
            .await
            .map_err(|_| ServiceError::Fatal("AI concurrency limiter closed".into()))?;

        self.bridge.try_admit(query.patient_id)?;

        // Cached drafts skip the bridge-query lifecycle entirely: no
        // outbound request is made.
        let (response, tracked) = match self.bridge.cached(&context, &query.description) {
            Some(cached) => {
                self.store.append_audit(
                    NewAuditEntry::new(AuditAction::AiCacheHit)
                        .patient(query.patient_id)
                        .query(query.id),
                )?;
                (cached, false)
            }
            None => {
                self.reconciler.register(&query.id)?;
                self.reconciler.mark_processing(&query.id)?;
                match self.bridge.fetch(&context, &query.description).await {
                    Ok(response) => (response, true),
                    Err(err) => {
                        let label = match &err {
                            BridgeError::Timeout => "Timeout".to_string(),
                            other => other.to_string(),
                        };
                        self.reconciler.fail(&query.id, &label)?;
                        return Err(err.into());
                    }
                }
            }
        };

        if response.source == ResponseSource::Fallback {
            self.store.append_audit(
                NewAuditEntry::new(AuditAction::AiFallbackServed)
                    .patient(query.patient_id)
                    .query(query.id)
                    .detail(serde_json::json!({ "model": response.model })),
            )?;
        }

        // Score the draft together with the query text and vitals.
        let vitals = patient.as_ref().map(|p| &p.latest_vitals);
        let assessment = scoring::score(&query.description, vitals, Some(&response.content));

        // The gate: unsafe score, high urgency, an unknown patient, or
        // a fallback draft (its text promises clinician follow-up).
        let review_required = assessment.requires_review()
            || context.is_minimal()
            || response.source == ResponseSource::Fallback;

        let analysis = build_analysis(&response, &assessment);
        let updated = self.store.record_ai_outcome(
            &query.id,
            analysis,
            response.content.clone(),
            assessment.score,
            assessment.urgency,
            review_required,
        )?;

        if tracked {
            self.reconciler
                .complete(&query.id, &response, assessment.score, assessment.urgency)?;
        }

        self.finish_processing(updated, &patient).await
    }

    /// Submit + process + patient-visible projection, in one call.
    pub async fn process_medical_query(
        &self,
        patient_id: &Uuid,
        query_text: &str,
        vitals: Option<&VitalSigns>,
    ) -> Result<PatientReply, ServiceError> {
        let title = summarize_title(query_text);
        let query_id = self.submit_query(
            patient_id,
            &title,
            query_text,
            Some(QueryCategory::General),
            None,
            vitals,
        )?;
        let query = self.process_query(&query_id).await?;

        let requires_review = query.human_review_required;
        let content = if requires_review {
            REVIEW_NOTICE.to_string()
        } else {
            query.ai_draft.clone().unwrap_or_else(|| REVIEW_NOTICE.to_string())
        };
        Ok(PatientReply {
            content,
            safety_score: query.safety_score.unwrap_or(0),
            urgency: query.urgency.unwrap_or(Urgency::High),
            requires_review,
            timestamp: query.updated_at,
        })
    }

    /// Route a scored query onward: policy-enabled auto-release for
    /// safe drafts, otherwise clinician assignment.
    async fn finish_processing(
        &self,
        query: Query,
        patient: &Option<Patient>,
    ) -> Result<Query, ServiceError> {
        if !query.human_review_required && self.config.auto_release_safe {
            let released =
                self.store
                    .apply_transition(&query.id, &QueryEvent::AutoRelease, None, None)?;
            return Ok(released);
        }

        let clinicians = self.store.active_clinicians()?;
        let open_counts: HashMap<Uuid, i64> = self.store.open_counts_by_clinician()?;
        let suggested = query
            .ai_analysis
            .as_ref()
            .and_then(|a| a.suggested_specialty.as_ref());
        let primary = patient.as_ref().and_then(|p| p.primary_clinician_id);

        match select_clinician(&clinicians, &open_counts, suggested, primary) {
            Some(clinician_id) => {
                let assigned = self.store.apply_transition(
                    &query.id,
                    &QueryEvent::Assign { clinician_id },
                    None,
                    None,
                )?;
                Ok(assigned)
            }
            None => {
                tracing::info!(query_id = %query.id, "no active clinician; query stays pending");
                Ok(query)
            }
        }
    }

    // ── Clinician actions ───────────────────────────────────

    /// Claim a query for review: assign (if still pending) and open it.
    pub fn take_query(&self, query_id: &Uuid, clinician_id: &Uuid) -> Result<Query, ServiceError> {
        let clinician = self.active_clinician(clinician_id)?;
        let query = self
            .store
            .query(query_id)?
            .ok_or_else(|| ServiceError::NotFound("query".into()))?;

        let query = match query.status {
            QueryStatus::Pending => self.store.apply_transition(
                query_id,
                &QueryEvent::Assign {
                    clinician_id: clinician.id,
                },
                Some(clinician.id),
                None,
            )?,
            _ => query,
        };

        let opened = self.store.apply_transition(
            &query.id,
            &QueryEvent::OpenReview {
                clinician_id: clinician.id,
            },
            Some(clinician.id),
            None,
        )?;
        self.store.touch_clinician_seen(&clinician.id)?;
        Ok(opened)
    }

    /// Respond to a query under review. For gated queries this is the
    /// clinician decision event the audit trail must witness.
    pub fn respond_to_query(
        &self,
        query_id: &Uuid,
        clinician_id: &Uuid,
        text: &str,
    ) -> Result<Query, ServiceError> {
        let clinician = self.active_clinician(clinician_id)?;
        let query = self
            .store
            .query(query_id)?
            .ok_or_else(|| ServiceError::NotFound("query".into()))?;

        if query.human_review_required && query.status == QueryStatus::InReview {
            self.store
                .record_review_decision(query_id, &clinician.id, "respond", None)?;
        }

        let resolved = self.store.apply_transition(
            query_id,
            &QueryEvent::Respond {
                clinician_id: clinician.id,
                text: text.to_string(),
            },
            Some(clinician.id),
            None,
        )?;
        self.store.touch_clinician_seen(&clinician.id)?;
        Ok(resolved)
    }

    /// Apply a structured review decision to a query in review.
    pub fn review_query(
        &self,
        query_id: &Uuid,
        clinician_id: &Uuid,
        decision: ReviewDecision,
        note: Option<&str>,
    ) -> Result<Query, ServiceError> {
        let clinician = self.active_clinician(clinician_id)?;
        let query = self
            .store
            .query(query_id)?
            .ok_or_else(|| ServiceError::NotFound("query".into()))?;
        // Decisions only exist for queries under review; recording one
        // first and failing the transition after would leave a stray
        // decision event that could satisfy the gate later.
        if query.status != QueryStatus::InReview {
            return Err(ServiceError::Invalid("query is not in review".into()));
        }

        self.store
            .record_review_decision(query_id, &clinician.id, decision.label(), note)?;

        let event = match &decision {
            ReviewDecision::Approve => {
                let draft = query.ai_draft.clone().ok_or_else(|| {
                    ServiceError::Invalid("no AI draft to approve".into())
                })?;
                QueryEvent::Respond {
                    clinician_id: clinician.id,
                    text: draft,
                }
            }
            ReviewDecision::Edit { text } => QueryEvent::Respond {
                clinician_id: clinician.id,
                text: text.clone(),
            },
            ReviewDecision::Reject { reason } => QueryEvent::Escalate {
                reason: reason.clone(),
            },
        };

        let updated =
            self.store
                .apply_transition(query_id, &event, Some(clinician.id), None)?;
        self.store.touch_clinician_seen(&clinician.id)?;
        Ok(updated)
    }

    /// Ask the patient for more information; the query waits on them.
    pub fn request_patient_info(
        &self,
        query_id: &Uuid,
        clinician_id: &Uuid,
    ) -> Result<Query, ServiceError> {
        let clinician = self.active_clinician(clinician_id)?;
        let updated = self.store.apply_transition(
            query_id,
            &QueryEvent::RequestPatientInfo {
                clinician_id: clinician.id,
            },
            Some(clinician.id),
            None,
        )?;
        self.store.touch_clinician_seen(&clinician.id)?;
        Ok(updated)
    }

    // ── Patient actions ─────────────────────────────────────

    /// Record the patient's reply and put the query back in review.
    pub fn record_patient_reply(
        &self,
        query_id: &Uuid,
        patient_id: &Uuid,
        text: &str,
    ) -> Result<Query, ServiceError> {
        let query = self
            .store
            .query(query_id)?
            .ok_or_else(|| ServiceError::NotFound("query".into()))?;
        if query.patient_id != *patient_id {
            return Err(ServiceError::NotFound("query".into()));
        }
        let updated = self.store.apply_transition(
            query_id,
            &QueryEvent::PatientReplied {
                patient_id: *patient_id,
                text: text.to_string(),
            },
            Some(*patient_id),
            None,
        )?;
        Ok(updated)
    }

    /// Patient cancellation; permitted only before review starts. The
    /// associated bridge query (if any) fails with `Cancelled`.
    pub fn cancel_query(&self, query_id: &Uuid, patient_id: &Uuid) -> Result<Query, ServiceError> {
        let query = self
            .store
            .query(query_id)?
            .ok_or_else(|| ServiceError::NotFound("query".into()))?;
        if query.patient_id != *patient_id {
            return Err(ServiceError::NotFound("query".into()));
        }

        let closed =
            self.store
                .apply_transition(query_id, &QueryEvent::Cancel, Some(*patient_id), None)?;

        if let Some(b) = self.store.bridge_query_for(query_id)? {
            if !b.status.is_terminal() {
                self.reconciler.fail(query_id, "Cancelled")?;
            }
        }
        Ok(closed)
    }

    pub fn rate_query(
        &self,
        query_id: &Uuid,
        patient_id: &Uuid,
        rating: u8,
    ) -> Result<(), ServiceError> {
        self.store.rate_query(query_id, patient_id, rating)?;
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────

    pub fn get_query(&self, query_id: &Uuid) -> Result<Option<Query>, ServiceError> {
        Ok(self.store.query(query_id)?)
    }

    pub fn get_patient_queries(
        &self,
        patient_id: &Uuid,
        status: Option<QueryStatus>,
        page: u32,
        per_page: u32,
    ) -> Result<QueryPage, ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let offset = i64::from(page) * i64::from(per_page);
        let items =
            self.store
                .patient_queries(patient_id, status, i64::from(per_page), offset)?;
        Ok(QueryPage {
            items,
            page,
            per_page,
        })
    }

    pub fn get_pending_queries(&self) -> Result<Vec<Query>, ServiceError> {
        Ok(self.store.queries_by_status(QueryStatus::Pending)?)
    }

    pub fn get_platform_stats(&self) -> Result<PlatformStats, ServiceError> {
        let counts = self.store.counts()?;
        Ok(PlatformStats {
            patients: counts.patients,
            active_patients: counts.active_patients,
            clinicians: counts.clinicians,
            queries: counts.queries,
            queries_by_status: counts
                .queries_by_status
                .into_iter()
                .map(|(s, n)| (s.as_str().to_string(), n))
                .collect(),
            bridge_by_status: counts
                .bridge_by_status
                .into_iter()
                .map(|(s, n)| (s.as_str().to_string(), n))
                .collect(),
            avg_response_time_minutes: counts.avg_response_minutes,
            bridge: self.bridge.stats(),
        })
    }

    // ── Webhook passthrough ─────────────────────────────────

    pub fn apply_webhook(
        &self,
        hook: &BridgeWebhook,
        client_info: Option<String>,
    ) -> Result<WebhookOutcome, ReconcilerError> {
        self.reconciler.apply_webhook(hook, client_info)
    }

    // ── Internal ────────────────────────────────────────────

    fn active_clinician(&self, clinician_id: &Uuid) -> Result<Clinician, ServiceError> {
        let clinician = self
            .store
            .clinician(clinician_id)?
            .ok_or_else(|| ServiceError::NotFound("clinician".into()))?;
        if !clinician.active {
            return Err(ServiceError::Unauthorized);
        }
        Ok(clinician)
    }

    fn begin_patient_work(&self, patient_id: Uuid) -> Result<InFlightGuard<'_>, ServiceError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| ServiceError::Fatal("in-flight tracker poisoned".into()))?;
        let count = in_flight.entry(patient_id).or_insert(0);
        if *count >= self.config.per_patient_queue_size {
            return Err(ServiceError::QueueFull);
        }
        *count += 1;
        Ok(InFlightGuard {
            service: self,
            patient_id,
        })
    }
}

/// RAII guard for the per-patient in-flight bound.
struct InFlightGuard<'a> {
    service: &'a PlatformService,
    patient_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.service.in_flight.lock() {
            if let Some(count) = in_flight.get_mut(&self.patient_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    in_flight.remove(&self.patient_id);
                }
            }
        }
    }
}

fn build_analysis(response: &AiResponse, assessment: &scoring::SafetyAssessment) -> AiAnalysis {
    let confidence = match response.source {
        ResponseSource::Model | ResponseSource::Cache => 0.75,
        ResponseSource::Fallback => 0.2,
    };
    AiAnalysis {
        confidence,
        flagged_symptoms: response.flagged_symptoms.clone(),
        suggested_specialty: response.suggested_specialty.clone(),
        risk_label: match assessment.urgency {
            Urgency::High => RiskLabel::Critical,
            Urgency::Medium => RiskLabel::Elevated,
            Urgency::Low => RiskLabel::Routine,
        },
        model_version: response.model.clone(),
        analyzed_at: response.generated_at,
    }
}

/// First line of the query text, trimmed to a short title.
fn summarize_title(query_text: &str) -> String {
    let first_line = query_text.lines().next().unwrap_or("").trim();
    let mut title: String = first_line.chars().take(80).collect();
    if title.is_empty() {
        title = "Patient query".into();
    }
    title
}
