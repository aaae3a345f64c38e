//! Bridge reconciliation: tracks every in-flight AI call as a
//! BridgeQuery, accepts direct completion callbacks and authenticated
//! webhook updates, and sweeps stale entries on a timer.
//!
//! Status only ever moves forward (pending → processing → terminal);
//! replays of the current status are accepted as no-ops, regressions
//! are rejected.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditAction;
use crate::bridge::AiResponse;
use crate::lifecycle::QueryEvent;
use crate::models::bridge::BridgeQuery;
use crate::models::enums::{BridgeStatus, QueryStatus, RiskLabel, Urgency};
use crate::models::query::AiAnalysis;
use crate::store::{BridgeAdvance, BridgeUpdateFields, RecordStore, StoreError};

/// Error message recorded for swept entries.
pub const SWEEP_ERROR: &str = "TimedOut";

/// Webhook payload. Field names follow the wire convention of the
/// bridge operator, hence camelCase.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeWebhook {
    pub query_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub safety_score: Option<u8>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub secret: String,
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("webhook secret mismatch")]
    Unauthorized,

    #[error("invalid bridge transition {from} -> {to}")]
    InvalidTransition {
        from: BridgeStatus,
        to: BridgeStatus,
    },

    #[error("invalid webhook payload: {0}")]
    Invalid(String),

    #[error("bridge query not found")]
    NotFound,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReconcilerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::InvalidBridgeTransition { from, to } => {
                Self::InvalidTransition { from, to }
            }
            other => Self::Store(other),
        }
    }
}

/// Result of applying a webhook: a real transition or an idempotent
/// replay with no further effect.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied(BridgeQuery),
    Replay(BridgeQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub swept: usize,
    pub escalated: usize,
}

pub struct BridgeReconciler {
    store: Arc<RecordStore>,
    shared_secret: String,
    stale_threshold: Duration,
}

impl BridgeReconciler {
    pub fn new(store: Arc<RecordStore>, shared_secret: String, stale_threshold_h: i64) -> Self {
        Self {
            store,
            shared_secret,
            stale_threshold: Duration::hours(stale_threshold_h),
        }
    }

    // ── Direct lifecycle callbacks from the bridge path ─────

    pub fn register(&self, query_id: &Uuid) -> Result<BridgeQuery, StoreError> {
        self.store.create_bridge_query(query_id)
    }

    pub fn mark_processing(&self, query_id: &Uuid) -> Result<(), StoreError> {
        self.store.advance_bridge(
            query_id,
            BridgeStatus::Processing,
            BridgeUpdateFields::default(),
            AuditAction::BridgeProcessing,
            None,
        )?;
        Ok(())
    }

    pub fn complete(
        &self,
        query_id: &Uuid,
        response: &AiResponse,
        safety_score: u8,
        urgency: Urgency,
    ) -> Result<(), StoreError> {
        self.store.advance_bridge(
            query_id,
            BridgeStatus::Completed,
            BridgeUpdateFields {
                safety_score: Some(safety_score),
                urgency: Some(urgency),
                response: Some(response.content.clone()),
                error_message: None,
            },
            AuditAction::BridgeCompleted,
            None,
        )?;
        Ok(())
    }

    pub fn fail(&self, query_id: &Uuid, error: &str) -> Result<(), StoreError> {
        self.store.advance_bridge(
            query_id,
            BridgeStatus::Failed,
            BridgeUpdateFields {
                error_message: Some(error.to_string()),
                ..BridgeUpdateFields::default()
            },
            AuditAction::BridgeFailed,
            None,
        )?;
        Ok(())
    }

    // ── Webhook path ────────────────────────────────────────

    /// Apply an authenticated webhook update.
    ///
    /// Replaying the current status is idempotent (no write, no audit
    /// entry); moving backwards is `InvalidTransition`.
    pub fn apply_webhook(
        &self,
        hook: &BridgeWebhook,
        client_info: Option<String>,
    ) -> Result<WebhookOutcome, ReconcilerError> {
        if !secret_matches(&self.shared_secret, &hook.secret) {
            tracing::warn!(query_id = %hook.query_id, "webhook rejected: bad secret");
            return Err(ReconcilerError::Unauthorized);
        }

        let status: BridgeStatus = hook
            .status
            .parse()
            .map_err(|_| ReconcilerError::Invalid(format!("unknown status: {}", hook.status)))?;

        if let Some(score) = hook.safety_score {
            if score > 100 {
                return Err(ReconcilerError::Invalid(format!(
                    "safety score out of range: {score}"
                )));
            }
        }
        let urgency = match hook.urgency.as_deref() {
            Some(raw) => Some(Urgency::from_wire(raw).ok_or_else(|| {
                ReconcilerError::Invalid(format!("unknown urgency: {raw}"))
            })?),
            None => None,
        };

        let fields = BridgeUpdateFields {
            safety_score: hook.safety_score,
            urgency,
            response: hook.response.clone(),
            error_message: hook.error_message.clone(),
        };

        let outcome = self.store.advance_bridge(
            &hook.query_id,
            status,
            fields,
            AuditAction::WebhookApplied,
            client_info,
        )?;

        match outcome {
            BridgeAdvance::Applied(b) => {
                tracing::info!(
                    query_id = %b.query_id,
                    status = b.status.as_str(),
                    "webhook applied"
                );
                if b.status == BridgeStatus::Completed {
                    self.reconcile_completed(&b);
                }
                Ok(WebhookOutcome::Applied(b))
            }
            BridgeAdvance::Replay(b) => Ok(WebhookOutcome::Replay(b)),
        }
    }

    /// When a webhook completes an AI call whose query is still waiting
    /// on it, attach the delivered outcome and move it forward.
    fn reconcile_completed(&self, b: &BridgeQuery) {
        let (Some(response), Some(score)) = (b.response.clone(), b.safety_score) else {
            return;
        };
        let query = match self.store.query(&b.query_id) {
            Ok(Some(q)) if q.status == QueryStatus::Submitted => q,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(error = %e, "webhook reconciliation read failed");
                return;
            }
        };

        let urgency = b.urgency.unwrap_or(if score < 40 {
            Urgency::High
        } else if score < 70 {
            Urgency::Medium
        } else {
            Urgency::Low
        });
        let review_required = score < 70 || urgency == Urgency::High;
        let analysis = AiAnalysis {
            confidence: 0.5,
            flagged_symptoms: Vec::new(),
            suggested_specialty: None,
            risk_label: match urgency {
                Urgency::High => RiskLabel::Critical,
                Urgency::Medium => RiskLabel::Elevated,
                Urgency::Low => RiskLabel::Routine,
            },
            model_version: "bridge-webhook".into(),
            analyzed_at: Utc::now(),
        };

        if let Err(e) = self.store.record_ai_outcome(
            &query.id,
            analysis,
            response,
            score,
            urgency,
            review_required,
        ) {
            tracing::warn!(query_id = %query.id, error = %e, "webhook reconciliation failed");
        }
    }

    // ── Sweeper ─────────────────────────────────────────────

    /// Mark entries stuck in a non-terminal state past the threshold as
    /// failed (`TimedOut`) and escalate their queries.
    pub fn sweep_stale(&self) -> Result<SweepReport, StoreError> {
        let cutoff = Utc::now() - self.stale_threshold;
        let stale = self.store.stale_bridge_queries(cutoff)?;
        let mut report = SweepReport::default();

        for b in stale {
            self.store.advance_bridge(
                &b.query_id,
                BridgeStatus::Failed,
                BridgeUpdateFields {
                    error_message: Some(SWEEP_ERROR.to_string()),
                    ..BridgeUpdateFields::default()
                },
                AuditAction::BridgeSwept,
                None,
            )?;
            report.swept += 1;

            let escalatable = matches!(
                self.store.query(&b.query_id)?.map(|q| q.status),
                Some(QueryStatus::Pending | QueryStatus::Assigned | QueryStatus::InReview)
            );
            if escalatable {
                self.store.apply_transition(
                    &b.query_id,
                    &QueryEvent::Escalate {
                        reason: "bridge query timed out".into(),
                    },
                    None,
                    None,
                )?;
                report.escalated += 1;
            }
        }

        if report.swept > 0 {
            tracing::warn!(
                swept = report.swept,
                escalated = report.escalated,
                "stale bridge queries swept"
            );
        }
        Ok(report)
    }

    /// Run the sweeper at a fixed interval until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let reconciler = self;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh boot
            // does not race startup writes.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = reconciler.sweep_stale() {
                    tracing::error!(error = %e, "bridge sweep failed");
                }
            }
        })
    }
}

fn secret_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{QueryCategory, QueryPriority};
    use crate::models::patient::{ConsentFlags, Patient};
    use crate::models::query::Query;

    const SECRET: &str = "test-webhook-secret";

    fn setup() -> (Arc<RecordStore>, BridgeReconciler, Uuid) {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let patient = Patient::new("Hook Patient", ConsentFlags::granted());
        store.create_patient(&patient).unwrap();
        let query = Query::new(
            patient.id,
            "Hooked",
            "A question",
            QueryCategory::General,
            QueryPriority::Normal,
        );
        store.create_query(&query).unwrap();
        let reconciler = BridgeReconciler::new(Arc::clone(&store), SECRET.into(), 24);
        (store, reconciler, query.id)
    }

    fn hook(query_id: Uuid, status: &str) -> BridgeWebhook {
        BridgeWebhook {
            query_id,
            status: status.into(),
            response: None,
            safety_score: None,
            urgency: None,
            error_message: None,
            secret: SECRET.into(),
        }
    }

    #[test]
    fn bad_secret_is_unauthorized() {
        let (_store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        let mut h = hook(query_id, "processing");
        h.secret = "wrong".into();
        assert!(matches!(
            reconciler.apply_webhook(&h, None).unwrap_err(),
            ReconcilerError::Unauthorized
        ));
    }

    #[test]
    fn unknown_status_or_urgency_is_invalid() {
        let (_store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        let h = hook(query_id, "half_done");
        assert!(matches!(
            reconciler.apply_webhook(&h, None).unwrap_err(),
            ReconcilerError::Invalid(_)
        ));

        let mut h = hook(query_id, "completed");
        h.urgency = Some("CRITICAL".into());
        assert!(matches!(
            reconciler.apply_webhook(&h, None).unwrap_err(),
            ReconcilerError::Invalid(_)
        ));
    }

    #[test]
    fn webhook_moves_status_forward() {
        let (store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        let outcome = reconciler
            .apply_webhook(&hook(query_id, "processing"), Some("203.0.113.9".into()))
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Applied(_)));

        let b = store.bridge_query_for(&query_id).unwrap().unwrap();
        assert_eq!(b.status, BridgeStatus::Processing);
    }

    #[test]
    fn regression_is_rejected_and_state_preserved() {
        // A completed entry receiving a stale "processing" update.
        let (store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        let mut done = hook(query_id, "completed");
        done.response = Some("analysis".into());
        done.safety_score = Some(90);
        done.urgency = Some("LOW".into());
        reconciler.apply_webhook(&done, None).unwrap();

        let err = reconciler
            .apply_webhook(&hook(query_id, "processing"), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::InvalidTransition {
                from: BridgeStatus::Completed,
                to: BridgeStatus::Processing
            }
        ));
        let b = store.bridge_query_for(&query_id).unwrap().unwrap();
        assert_eq!(b.status, BridgeStatus::Completed);
    }

    #[test]
    fn replaying_the_same_status_is_idempotent() {
        let (store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();
        reconciler
            .apply_webhook(&hook(query_id, "processing"), None)
            .unwrap();

        let audit_before = store.query_audit_trail(&query_id).unwrap().len();
        let outcome = reconciler
            .apply_webhook(&hook(query_id, "processing"), None)
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Replay(_)));
        let audit_after = store.query_audit_trail(&query_id).unwrap().len();
        assert_eq!(audit_before, audit_after, "replay adds no audit entry");
    }

    #[test]
    fn completed_webhook_reconciles_waiting_query() {
        let (store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        let mut done = hook(query_id, "completed");
        done.response = Some("delivered analysis".into());
        done.safety_score = Some(55);
        done.urgency = Some("MEDIUM".into());
        reconciler.apply_webhook(&done, None).unwrap();

        let q = store.query(&query_id).unwrap().unwrap();
        assert_eq!(q.status, QueryStatus::Pending);
        assert_eq!(q.ai_draft.as_deref(), Some("delivered analysis"));
        assert_eq!(q.safety_score, Some(55));
        assert!(q.human_review_required, "score 55 gates review");
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let (_store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        let mut h = hook(query_id, "completed");
        h.safety_score = Some(180);
        assert!(matches!(
            reconciler.apply_webhook(&h, None).unwrap_err(),
            ReconcilerError::Invalid(_)
        ));
    }

    #[test]
    fn unknown_bridge_query_is_not_found() {
        let (_store, reconciler, _query_id) = setup();
        let h = hook(Uuid::new_v4(), "processing");
        assert!(matches!(
            reconciler.apply_webhook(&h, None).unwrap_err(),
            ReconcilerError::NotFound
        ));
    }

    #[test]
    fn sweep_fails_stale_entries_and_escalates_queries() {
        let (store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        // Move the owning query to pending so escalation is legal
        let analysis = AiAnalysis {
            confidence: 0.6,
            flagged_symptoms: vec![],
            suggested_specialty: None,
            risk_label: RiskLabel::Routine,
            model_version: "clinical-llm-2".into(),
            analyzed_at: Utc::now(),
        };
        store
            .record_ai_outcome(&query_id, analysis, "draft".into(), 95, Urgency::Low, false)
            .unwrap();

        // Backdate the bridge entry to 25 hours ago
        let old = crate::db::repository::ts(Utc::now() - Duration::hours(25));
        store
            .raw_conn()
            .execute(
                "UPDATE bridge_queries SET created_at = ?1",
                rusqlite::params![old],
            )
            .unwrap();

        let report = reconciler.sweep_stale().unwrap();
        assert_eq!(report, SweepReport { swept: 1, escalated: 1 });

        let b = store.bridge_query_for(&query_id).unwrap().unwrap();
        assert_eq!(b.status, BridgeStatus::Failed);
        assert_eq!(b.error_message.as_deref(), Some(SWEEP_ERROR));

        let q = store.query(&query_id).unwrap().unwrap();
        assert_eq!(q.status, QueryStatus::Escalated);

        let trail = store.query_audit_trail(&query_id).unwrap();
        let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"bridge_swept"));
        assert!(actions.contains(&"query_escalated"));

        // Second sweep finds nothing
        let again = reconciler.sweep_stale().unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[test]
    fn fresh_entries_are_not_swept() {
        let (store, reconciler, query_id) = setup();
        reconciler.register(&query_id).unwrap();

        let report = reconciler.sweep_stale().unwrap();
        assert_eq!(report, SweepReport::default());
        let b = store.bridge_query_for(&query_id).unwrap().unwrap();
        assert_eq!(b.status, BridgeStatus::Pending);
    }

    #[test]
    fn secret_comparison_accepts_exact_match_only() {
        assert!(secret_matches("abc", "abc"));
        assert!(!secret_matches("abc", "abd"));
        assert!(!secret_matches("abc", "ab"));
        assert!(!secret_matches("abc", ""));
    }
}
