//! AI bridge: the single gateway to the external LLM.
//!
//! Owns the rate limiter and response cache (other components go
//! through this API), retries transient upstream failures with
//! exponential backoff, enforces the request-level deadline, and
//! degrades to canned fallbacks instead of surfacing upstream noise.

pub mod cache;
pub mod client;
pub mod fallback;
pub mod rate_limit;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::context::{GlucoseBucket, MedicalContext};
use crate::models::specialty::Specialty;
use crate::scoring::keywords::{
    CRITICAL_KEYWORDS, HYPOGLYCEMIA_SYMPTOM_KEYWORDS, INFECTION_KEYWORDS,
    MEDICATION_RISK_KEYWORDS,
};

pub use cache::{cache_key, normalize_query, ResponseCache};
pub use client::{ChatRequest, HttpLlmClient, LlmClient, MockLlmClient};
pub use fallback::{fallback_draft, FallbackReason, FALLBACK_DISCLAIMER, FALLBACK_MODEL};
pub use rate_limit::SlidingWindowLimiter;

/// System prompt for draft generation. The model drafts; it never
/// decides; everything it produces is scored and gated downstream.
const SYSTEM_PROMPT: &str = "You are a clinical decision support assistant drafting a response \
     for a diabetes care team. Analyze the patient context and question. Be specific and calm. \
     Never prescribe or change medication doses, never claim a diagnosis, and advise contacting \
     the care team or emergency services when the presentation warrants it. Your draft will be \
     reviewed by a clinician before release.";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("rate limited; retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("request deadline exceeded")]
    Timeout,

    #[error("upstream rejected credentials")]
    Unauthorized,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unusable upstream response: {0}")]
    InvalidResponse(String),

    #[error("upstream error (status {status})")]
    Upstream { status: u16, body: String },
}

impl BridgeError {
    /// Only transport failures and upstream 5xx / 429 warrant a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Where a draft came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Model,
    Cache,
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Cache => "cache",
            Self::Fallback => "fallback",
        }
    }
}

/// A draft response from the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiResponse {
    pub content: String,
    pub model: String,
    pub source: ResponseSource,
    pub processing_ms: u64,
    pub generated_at: DateTime<Utc>,
    pub flagged_symptoms: Vec<String>,
    pub suggested_specialty: Option<Specialty>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub window_secs: u64,
    pub max_per_window: u32,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub retry_max_attempts: u32,
    pub request_timeout_secs: u64,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_per_window: 10,
            cache_ttl_secs: 300,
            cache_max_entries: 100,
            retry_max_attempts: 3,
            request_timeout_secs: 60,
            model: "clinical-llm-2".into(),
            temperature: 0.2,
            max_tokens: 700,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStats {
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limited: u64,
}

pub struct AiBridge {
    client: Arc<dyn LlmClient>,
    config: BridgeConfig,
    limiter: Mutex<SlidingWindowLimiter>,
    cache: Mutex<ResponseCache>,
    rate_limited: AtomicU64,
}

impl AiBridge {
    pub fn new(client: Arc<dyn LlmClient>, config: BridgeConfig) -> Self {
        let limiter = SlidingWindowLimiter::new(config.window_secs, config.max_per_window);
        let cache = ResponseCache::new(config.cache_ttl_secs, config.cache_max_entries);
        Self {
            client,
            config,
            limiter: Mutex::new(limiter),
            cache: Mutex::new(cache),
            rate_limited: AtomicU64::new(0),
        }
    }

    /// Admit a request against the patient's sliding window. Rejected
    /// submissions never register a bridge query.
    pub fn try_admit(&self, patient_id: uuid::Uuid) -> Result<(), BridgeError> {
        let mut limiter = self
            .limiter
            .lock()
            .map_err(|_| BridgeError::Transport("rate limiter lock poisoned".into()))?;
        limiter.check(patient_id).map_err(|retry_after_s| {
            self.rate_limited.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(patient_id = %patient_id, retry_after_s, "bridge rate limit hit");
            BridgeError::RateLimited { retry_after_s }
        })
    }

    /// Look up a cached draft for this (query, context) pair.
    pub fn cached(&self, context: &MedicalContext, query_text: &str) -> Option<AiResponse> {
        let key = self.key_for(context, query_text);
        let cached = self.cache.lock().ok()?.get(&key)?;
        let (flagged_symptoms, suggested_specialty) =
            derive_findings(context, query_text, &cached.content);
        tracing::debug!("bridge cache hit");
        Some(AiResponse {
            content: cached.content,
            model: cached.model,
            source: ResponseSource::Cache,
            processing_ms: 0,
            generated_at: Utc::now(),
            flagged_symptoms,
            suggested_specialty,
        })
    }

    /// Obtain a draft from the model, or a fallback.
    ///
    /// Critical glucose short-circuits straight to the urgent fallback;
    /// retryable upstream failures back off 2^(attempt-1) seconds
    /// between attempts and degrade to the unavailable fallback once
    /// exhausted. Only the request-level deadline surfaces as an error.
    pub async fn fetch(
        &self,
        context: &MedicalContext,
        query_text: &str,
    ) -> Result<AiResponse, BridgeError> {
        let started = Instant::now();

        let bucket = context.glucose_bucket();
        if bucket.mandates_urgent_handling() {
            let reason = match bucket {
                GlucoseBucket::SevereLow | GlucoseBucket::Low => {
                    FallbackReason::CriticalLowGlucose
                }
                _ => FallbackReason::CriticalHighGlucose,
            };
            tracing::warn!(
                bucket = bucket.as_str(),
                "critical glucose; serving urgent fallback without model call"
            );
            return Ok(self.fallback_response(reason, context, query_text, started));
        }

        let request = ChatRequest {
            model: self.config.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            user: format!(
                "{}\n\nPatient question:\n{}",
                context.render_prompt(),
                query_text
            ),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let deadline = Duration::from_secs(self.config.request_timeout_secs);
        match tokio::time::timeout(deadline, self.attempt_with_backoff(request)).await {
            Err(_elapsed) => {
                tracing::warn!(
                    deadline_s = deadline.as_secs(),
                    "bridge request deadline exceeded"
                );
                Err(BridgeError::Timeout)
            }
            Ok(Ok(content)) => {
                let key = self.key_for(context, query_text);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(key, content.clone(), self.config.model.clone());
                }
                let (flagged_symptoms, suggested_specialty) =
                    derive_findings(context, query_text, &content);
                Ok(AiResponse {
                    content,
                    model: self.config.model.clone(),
                    source: ResponseSource::Model,
                    processing_ms: started.elapsed().as_millis() as u64,
                    generated_at: Utc::now(),
                    flagged_symptoms,
                    suggested_specialty,
                })
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "bridge exhausted; serving fallback draft");
                Ok(self.fallback_response(
                    FallbackReason::UpstreamUnavailable,
                    context,
                    query_text,
                    started,
                ))
            }
        }
    }

    pub fn stats(&self) -> BridgeStats {
        let (entries, hits, misses) = self
            .cache
            .lock()
            .map(|c| (c.len(), c.hits(), c.misses()))
            .unwrap_or((0, 0, 0));
        BridgeStats {
            cache_entries: entries,
            cache_hits: hits,
            cache_misses: misses,
            rate_limited: self.rate_limited.load(Ordering::SeqCst),
        }
    }

    // ── Internal ────────────────────────────────────────────

    fn key_for(&self, context: &MedicalContext, query_text: &str) -> String {
        cache_key(
            &normalize_query(query_text),
            context.diabetes_type,
            context.glucose_bucket(),
        )
    }

    async fn attempt_with_backoff(&self, request: ChatRequest) -> Result<String, BridgeError> {
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let client = Arc::clone(&self.client);
            let req = request.clone();
            let outcome = tokio::task::spawn_blocking(move || client.complete(&req))
                .await
                .map_err(|e| BridgeError::Transport(format!("bridge worker failed: {e}")))?;

            match outcome {
                Ok(content) => return Ok(content),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let backoff = Duration::from_secs(1u64 << (attempt - 1));
                    tracing::warn!(
                        attempt,
                        backoff_s = backoff.as_secs(),
                        error = %err,
                        "bridge attempt failed; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn fallback_response(
        &self,
        reason: FallbackReason,
        context: &MedicalContext,
        query_text: &str,
        started: Instant,
    ) -> AiResponse {
        let content = fallback_draft(reason);
        let (flagged_symptoms, suggested_specialty) =
            derive_findings(context, query_text, &content);
        AiResponse {
            content,
            model: FALLBACK_MODEL.to_string(),
            source: ResponseSource::Fallback,
            processing_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
            flagged_symptoms,
            suggested_specialty,
        }
    }
}

/// Extract structured findings from the query + draft text: symptom
/// keywords worth surfacing to the clinician, and a referral specialty
/// suggestion when one is clearly indicated.
fn derive_findings(
    context: &MedicalContext,
    query_text: &str,
    content: &str,
) -> (Vec<String>, Option<Specialty>) {
    let mut text = query_text.to_lowercase();
    text.push('\n');
    text.push_str(&content.to_lowercase());

    let mut flagged: Vec<String> = Vec::new();
    for (kw, _) in CRITICAL_KEYWORDS {
        if text.contains(kw) {
            flagged.push((*kw).to_string());
        }
    }
    for table in [HYPOGLYCEMIA_SYMPTOM_KEYWORDS, INFECTION_KEYWORDS] {
        for kw in table {
            if text.contains(kw) && !flagged.iter().any(|f| f == kw) {
                flagged.push((*kw).to_string());
            }
        }
    }

    let glucose_abnormal = context.glucose_bucket() != GlucoseBucket::InRange
        && context.glucose_bucket() != GlucoseBucket::Unknown;
    let medication_risk = MEDICATION_RISK_KEYWORDS.iter().any(|kw| text.contains(kw));

    let suggested_specialty = if text.contains("chest pain") || text.contains("heart attack") {
        Some(Specialty::Cardiology)
    } else if text.contains("vision loss") || text.contains("blurred vision") {
        Some(Specialty::Ophthalmology)
    } else if glucose_abnormal || medication_risk {
        Some(Specialty::Endocrinology)
    } else {
        None
    };

    (flagged, suggested_specialty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datum::Datum;
    use crate::models::patient::VitalSigns;
    use uuid::Uuid;

    fn context_with_glucose(g: Option<f64>) -> MedicalContext {
        let mut ctx = MedicalContext::unknown();
        ctx.vitals = VitalSigns {
            glucose_mg_dl: g.into(),
            ..VitalSigns::default()
        };
        ctx
    }

    fn bridge_with(client: MockLlmClient, config: BridgeConfig) -> AiBridge {
        AiBridge::new(Arc::new(client), config)
    }

    #[tokio::test]
    async fn model_path_returns_content_and_caches() {
        let bridge = bridge_with(
            MockLlmClient::new("drafted clinical analysis"),
            BridgeConfig::default(),
        );
        let ctx = context_with_glucose(Some(120.0));

        let response = bridge.fetch(&ctx, "how is my glucose trend?").await.unwrap();
        assert_eq!(response.source, ResponseSource::Model);
        assert_eq!(response.content, "drafted clinical analysis");
        assert_eq!(response.model, "clinical-llm-2");

        // Cache correctness law: identical inputs within TTL return
        // byte-identical content.
        let cached = bridge.cached(&ctx, "how is my glucose trend?").unwrap();
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.content, response.content);
        assert_eq!(bridge.stats().cache_entries, 1);
    }

    #[tokio::test]
    async fn normalized_queries_share_a_cache_entry() {
        let bridge = bridge_with(MockLlmClient::new("answer"), BridgeConfig::default());
        let ctx = context_with_glucose(Some(120.0));

        bridge.fetch(&ctx, "How is my glucose trend?").await.unwrap();
        let cached = bridge.cached(&ctx, "  how is my GLUCOSE trend!  ");
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn critical_low_glucose_short_circuits_to_fallback() {
        let client = MockLlmClient::new("should never be called");
        let calls_probe = Arc::new(client);
        let bridge = AiBridge::new(calls_probe.clone(), BridgeConfig::default());
        let ctx = context_with_glucose(Some(52.0));

        let response = bridge.fetch(&ctx, "I feel shaky and dizzy").await.unwrap();
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(response.model, FALLBACK_MODEL);
        assert!(response.content.contains(FALLBACK_DISCLAIMER));
        assert_eq!(calls_probe.calls(), 0, "model must not be consulted");
    }

    #[tokio::test]
    async fn critical_high_glucose_short_circuits_to_fallback() {
        let bridge = bridge_with(MockLlmClient::new("unused"), BridgeConfig::default());
        let ctx = context_with_glucose(Some(310.0));

        let response = bridge.fetch(&ctx, "should I double my metformin?").await.unwrap();
        assert_eq!(response.source, ResponseSource::Fallback);
        assert!(response
            .content
            .contains("do not change your medication dose"));
    }

    // Real backoff sleeps (1s + 2s); paused time interacts badly with
    // the blocking worker, so these two tests run on the wall clock.
    #[tokio::test]
    async fn retries_on_5xx_then_succeeds() {
        let client = MockLlmClient::new("unused")
            .script(Err(BridgeError::Upstream {
                status: 503,
                body: "overloaded".into(),
            }))
            .script(Err(BridgeError::Upstream {
                status: 429,
                body: "slow down".into(),
            }))
            .script(Ok("third time lucky".into()));
        let probe = Arc::new(client);
        let bridge = AiBridge::new(probe.clone(), BridgeConfig::default());
        let ctx = context_with_glucose(Some(120.0));

        let response = bridge.fetch(&ctx, "question").await.unwrap();
        assert_eq!(response.source, ResponseSource::Model);
        assert_eq!(response.content, "third time lucky");
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_fallback() {
        let client = MockLlmClient::new("unused")
            .script(Err(BridgeError::Transport("connection refused".into())))
            .script(Err(BridgeError::Transport("connection refused".into())))
            .script(Err(BridgeError::Transport("connection refused".into())));
        let probe = Arc::new(client);
        let bridge = AiBridge::new(probe.clone(), BridgeConfig::default());
        let ctx = context_with_glucose(Some(120.0));

        let response = bridge.fetch(&ctx, "question").await.unwrap();
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(probe.calls(), 3, "three attempts, then degrade");
    }

    #[tokio::test]
    async fn non_retryable_errors_fall_back_without_retry() {
        let client = MockLlmClient::new("unused").script(Err(BridgeError::Unauthorized));
        let probe = Arc::new(client);
        let bridge = AiBridge::new(probe.clone(), BridgeConfig::default());
        let ctx = context_with_glucose(Some(120.0));

        let response = bridge.fetch(&ctx, "question").await.unwrap();
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn elapsed_deadline_times_out() {
        struct SlowClient;
        impl LlmClient for SlowClient {
            fn complete(&self, _request: &ChatRequest) -> Result<String, BridgeError> {
                std::thread::sleep(Duration::from_millis(500));
                Ok("too slow".into())
            }
        }

        let config = BridgeConfig {
            request_timeout_secs: 0,
            ..BridgeConfig::default()
        };
        let bridge = AiBridge::new(Arc::new(SlowClient), config);
        let ctx = context_with_glucose(Some(120.0));

        let err = bridge.fetch(&ctx, "question").await.unwrap_err();
        assert_eq!(err, BridgeError::Timeout);
    }

    #[tokio::test]
    async fn rate_limiter_rejects_eleventh_call() {
        let bridge = bridge_with(MockLlmClient::new("ok"), BridgeConfig::default());
        let patient = Uuid::new_v4();

        for i in 0..10 {
            assert!(bridge.try_admit(patient).is_ok(), "call {i} admitted");
        }
        let err = bridge.try_admit(patient).unwrap_err();
        assert!(matches!(err, BridgeError::RateLimited { .. }));
        assert_eq!(bridge.stats().rate_limited, 1);
    }

    #[test]
    fn retryability_table() {
        assert!(BridgeError::Transport("x".into()).is_retryable());
        assert!(BridgeError::Upstream {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(BridgeError::Upstream {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!BridgeError::Upstream {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!BridgeError::Unauthorized.is_retryable());
        assert!(!BridgeError::Timeout.is_retryable());
        assert!(!BridgeError::InvalidResponse("x".into()).is_retryable());
        assert!(!BridgeError::RateLimited { retry_after_s: 60 }.is_retryable());
    }

    #[test]
    fn findings_surface_symptoms_and_specialty() {
        let ctx = context_with_glucose(Some(310.0));
        let (flagged, specialty) =
            derive_findings(&ctx, "I feel shaky after skipping meals", "watch for dizziness");
        assert!(flagged.contains(&"shaky".to_string()));
        assert!(flagged.contains(&"dizziness".to_string()));
        assert_eq!(specialty, Some(Specialty::Endocrinology));

        let ctx = context_with_glucose(None);
        let (_, specialty) = derive_findings(&ctx, "sudden chest pain", "");
        assert_eq!(specialty, Some(Specialty::Cardiology));

        let (_, specialty) = derive_findings(&ctx, "scheduling my next check-up", "sure");
        assert_eq!(specialty, None);
    }
}
