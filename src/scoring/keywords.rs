//! Keyword tables for the deterministic safety scorer.
//!
//! All matching is case-insensitive substring over the combined query
//! and AI-response text. Each table deducts at most once; critical
//! keywords carry per-keyword weights and the first match in listed
//! order wins.

/// Critical presentations. Weight 70 for immediately life-threatening
/// events, 60 for severe presentations that still demand escalation.
pub const CRITICAL_KEYWORDS: &[(&str, u8)] = &[
    ("chest pain", 60),
    ("difficulty breathing", 60),
    ("unconscious", 70),
    ("seizure", 70),
    ("severe bleeding", 70),
    ("stroke", 70),
    ("heart attack", 70),
    ("collapse", 70),
    ("severe abdominal pain", 60),
    ("severe headache", 60),
    ("vision loss", 60),
    ("inability to speak", 70),
    ("numbness on one side", 70),
];

/// Medication-risk wording. Matching any of these flags a dangerous
/// self-directed medication change. Bare "double" is deliberate: the
/// dangerous phrasing in the wild is "double my metformin", not the
/// textbook "double dose".
pub const MEDICATION_RISK_KEYWORDS: &[&str] = &[
    "stop medication",
    "stop taking",
    "quit drug",
    "discontinue",
    "skip insulin",
    "skip dose",
    "double",
    "take extra pills",
    "extra pills",
];

/// Urgency wording from the patient.
pub const URGENCY_KEYWORDS: &[&str] = &[
    "emergency",
    "urgent",
    "immediately",
    "right away",
    "hospital now",
];

/// Pregnancy mentions change risk stratification entirely.
pub const PREGNANCY_KEYWORDS: &[&str] = &["pregnant", "pregnancy"];

/// Infection markers.
pub const INFECTION_KEYWORDS: &[&str] = &["fever", "infection", "pus", "wound", "sore"];

/// Hypoglycemia symptom markers.
pub const HYPOGLYCEMIA_SYMPTOM_KEYWORDS: &[&str] = &[
    "shaky",
    "shaking",
    "dizzy",
    "dizziness",
    "sweating",
    "trembling",
    "confusion",
    "blurred vision",
];

/// Moderate-risk markers consulted by the urgency rules only.
pub const MODERATE_RISK_KEYWORDS: &[&str] = &["fever", "pain", "monitor", "concern"];

/// First critical keyword (in table order) found in `text_lower`,
/// with its weight.
pub fn first_critical_match(text_lower: &str) -> Option<(&'static str, u8)> {
    CRITICAL_KEYWORDS
        .iter()
        .find(|(kw, _)| text_lower.contains(kw))
        .map(|(kw, w)| (*kw, *w))
}

/// First keyword from `table` found in `text_lower`.
pub fn first_match<'a>(table: &'a [&'a str], text_lower: &str) -> Option<&'a str> {
    table.iter().find(|kw| text_lower.contains(*kw)).copied()
}

pub fn any_match(table: &[&str], text_lower: &str) -> bool {
    table.iter().any(|kw| text_lower.contains(kw))
}
