//! Canned fallback drafts, served when the upstream model is out of
//! reach or when the vitals already mandate urgent handling.
//!
//! Fallbacks are tagged `source=fallback`, carry a fixed safety
//! disclaimer, and still pass through the safety scorer and review
//! gate before anything reaches the patient.

/// Model identifier recorded for fallback responses.
pub const FALLBACK_MODEL: &str = "fallback";

/// Fixed disclaimer appended to every fallback draft.
pub const FALLBACK_DISCLAIMER: &str = "This is an automated safety message, not a diagnosis. \
     Your question has been queued for review by your care team.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Glucose below 70 mg/dL on the submitted vitals.
    CriticalLowGlucose,
    /// Glucose above 300 mg/dL on the submitted vitals.
    CriticalHighGlucose,
    /// Retries exhausted or the upstream answer was unusable.
    UpstreamUnavailable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriticalLowGlucose => "critical_low_glucose",
            Self::CriticalHighGlucose => "critical_high_glucose",
            Self::UpstreamUnavailable => "upstream_unavailable",
        }
    }
}

/// Build the canned draft for a reason.
pub fn fallback_draft(reason: FallbackReason) -> String {
    let body = match reason {
        FallbackReason::CriticalLowGlucose => {
            "Your reported blood glucose is in a low range that needs prompt attention. \
             If you feel unwell, treat for low blood sugar as your care plan directs \
             (for example 15 grams of fast-acting carbohydrate) and recheck in 15 minutes. \
             Contact your care team now; do not wait for this message to be reviewed."
        }
        FallbackReason::CriticalHighGlucose => {
            "Your reported blood glucose is in a high range that needs prompt attention. \
             Check for ketones if your care plan includes it, drink water, and do not \
             change your medication dose on your own. Contact your care team now."
        }
        FallbackReason::UpstreamUnavailable => {
            "We could not generate an automated draft for your question right now. \
             Your question has been saved and a clinician will respond. If your \
             symptoms worsen, contact your care team directly."
        }
    };
    format!("{body}\n\n{FALLBACK_DISCLAIMER}")
}
