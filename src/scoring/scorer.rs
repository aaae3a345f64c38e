//! Deterministic safety scoring and urgency classification.
//!
//! Pure function over (query text, vitals, AI response text). Starts at
//! 100 and applies the deduction table in a fixed order, each rule at
//! most once, clamping to [0, 100]. Urgency is derived afterwards from
//! the triggers and the final score.

use serde::Serialize;

use super::keywords::{
    any_match, first_critical_match, first_match, HYPOGLYCEMIA_SYMPTOM_KEYWORDS,
    INFECTION_KEYWORDS, MEDICATION_RISK_KEYWORDS, MODERATE_RISK_KEYWORDS, PREGNANCY_KEYWORDS,
    URGENCY_KEYWORDS,
};
use crate::models::enums::Urgency;
use crate::models::patient::VitalSigns;

/// A single deduction the scorer applied, kept for the AI analysis and
/// the audit payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trigger {
    pub rule: &'static str,
    pub matched: String,
    pub deduction: u8,
}

/// Scorer output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyAssessment {
    pub score: u8,
    pub urgency: Urgency,
    pub triggers: Vec<Trigger>,
}

impl SafetyAssessment {
    /// The review gate: score below 70 or high urgency.
    pub fn requires_review(&self) -> bool {
        self.score < 70 || self.urgency == Urgency::High
    }
}

/// Score a query with optional vitals and AI response text.
pub fn score(
    query_text: &str,
    vitals: Option<&VitalSigns>,
    ai_response: Option<&str>,
) -> SafetyAssessment {
    let mut text = query_text.to_lowercase();
    if let Some(response) = ai_response {
        text.push('\n');
        text.push_str(&response.to_lowercase());
    }

    let mut total: i32 = 100;
    let mut triggers = Vec::new();
    let mut critical_hit = false;

    let mut apply = |rule: &'static str, matched: String, deduction: u8, total: &mut i32| {
        *total -= i32::from(deduction);
        triggers.push(Trigger {
            rule,
            matched,
            deduction,
        });
    };

    // 1. Critical presentations (first match only, per-keyword weight)
    if let Some((kw, weight)) = first_critical_match(&text) {
        critical_hit = true;
        apply("critical_keyword", kw.to_string(), weight, &mut total);
    }

    let glucose = vitals.and_then(|v| v.glucose_mg_dl.get());
    let systolic = vitals.and_then(|v| v.systolic.get());

    // 2. Glucose (mg/dL)
    if let Some(g) = glucose {
        let deduction = if g < 54.0 {
            Some(60)
        } else if g < 70.0 {
            Some(40)
        } else if g > 400.0 {
            Some(55)
        } else if g > 300.0 {
            Some(35)
        } else if g > 250.0 {
            Some(25)
        } else {
            None
        };
        if let Some(d) = deduction {
            apply("glucose", format!("{g}"), d, &mut total);
        }
    }

    // 3. Temperature (°C)
    if let Some(t) = vitals.and_then(|v| v.temperature_c.get()) {
        let deduction = if t > 40.0 || t < 35.0 {
            Some(30)
        } else if (t > 38.5 && t <= 40.0) || (t >= 35.0 && t < 36.0) {
            Some(15)
        } else {
            None
        };
        if let Some(d) = deduction {
            apply("temperature", format!("{t}"), d, &mut total);
        }
    }

    // 4. Heart rate
    if let Some(hr) = vitals.and_then(|v| v.heart_rate.get()) {
        if hr > 120 || hr < 50 {
            apply("heart_rate", format!("{hr}"), 20, &mut total);
        }
    }

    // 5. Systolic blood pressure
    if let Some(s) = systolic {
        if s > 180 || s < 90 {
            apply("blood_pressure", format!("{s}"), 25, &mut total);
        }
    }

    // 6. Medication-risk wording (first match only)
    if let Some(kw) = first_match(MEDICATION_RISK_KEYWORDS, &text) {
        apply("medication_risk", kw.to_string(), 35, &mut total);
    }

    // 7. Urgency wording
    if let Some(kw) = first_match(URGENCY_KEYWORDS, &text) {
        apply("urgency_wording", kw.to_string(), 20, &mut total);
    }

    // 8. Pregnancy
    if let Some(kw) = first_match(PREGNANCY_KEYWORDS, &text) {
        apply("pregnancy", kw.to_string(), 25, &mut total);
    }

    // 9. Infection markers (first match only)
    if let Some(kw) = first_match(INFECTION_KEYWORDS, &text) {
        apply("infection", kw.to_string(), 15, &mut total);
    }

    // 10. Hypoglycemia symptom markers (first match only)
    if let Some(kw) = first_match(HYPOGLYCEMIA_SYMPTOM_KEYWORDS, &text) {
        apply("hypoglycemia_symptom", kw.to_string(), 15, &mut total);
    }

    let score = total.clamp(0, 100) as u8;

    // Urgency, evaluated after scoring
    let glucose_high_trigger = glucose.map(|g| g < 70.0 || g > 300.0).unwrap_or(false);
    let systolic_trigger = systolic.map(|s| s > 180 || s < 90).unwrap_or(false);
    let urgency = if critical_hit || glucose_high_trigger || systolic_trigger || score < 40 {
        Urgency::High
    } else if score < 70 || any_match(MODERATE_RISK_KEYWORDS, &text) {
        Urgency::Medium
    } else {
        Urgency::Low
    };

    if urgency == Urgency::High {
        tracing::warn!(
            score,
            triggers = triggers.len(),
            "safety scorer flagged high urgency"
        );
    }

    SafetyAssessment {
        score,
        urgency,
        triggers,
    }
}
