//! Clinician specialty: a closed set plus a free-text `Other` variant.

use serde::{Deserialize, Serialize};

/// Clinical specialty. The known set covers the diabetes-care referral
/// surface; anything else is carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Endocrinology,
    InternalMedicine,
    FamilyMedicine,
    Cardiology,
    Nephrology,
    Ophthalmology,
    Podiatry,
    DiabetesEducation,
    Other(String),
}

impl Specialty {
    /// Stable storage label. `Other` labels are prefixed so they cannot
    /// collide with future known variants.
    pub fn label(&self) -> String {
        match self {
            Self::Endocrinology => "endocrinology".into(),
            Self::InternalMedicine => "internal_medicine".into(),
            Self::FamilyMedicine => "family_medicine".into(),
            Self::Cardiology => "cardiology".into(),
            Self::Nephrology => "nephrology".into(),
            Self::Ophthalmology => "ophthalmology".into(),
            Self::Podiatry => "podiatry".into(),
            Self::DiabetesEducation => "diabetes_education".into(),
            Self::Other(text) => format!("other:{text}"),
        }
    }

    /// Parse a storage label. Unrecognized labels become `Other`.
    pub fn parse_label(s: &str) -> Self {
        match s {
            "endocrinology" => Self::Endocrinology,
            "internal_medicine" => Self::InternalMedicine,
            "family_medicine" => Self::FamilyMedicine,
            "cardiology" => Self::Cardiology,
            "nephrology" => Self::Nephrology,
            "ophthalmology" => Self::Ophthalmology,
            "podiatry" => Self::Podiatry,
            "diabetes_education" => Self::DiabetesEducation,
            other => {
                let text = other.strip_prefix("other:").unwrap_or(other);
                Self::Other(text.to_string())
            }
        }
    }
}

impl std::fmt::Display for Specialty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_round_trip() {
        for s in [
            Specialty::Endocrinology,
            Specialty::InternalMedicine,
            Specialty::FamilyMedicine,
            Specialty::Cardiology,
            Specialty::Nephrology,
            Specialty::Ophthalmology,
            Specialty::Podiatry,
            Specialty::DiabetesEducation,
        ] {
            assert_eq!(Specialty::parse_label(&s.label()), s);
        }
    }

    #[test]
    fn other_round_trips_with_prefix() {
        let s = Specialty::Other("sports medicine".into());
        assert_eq!(s.label(), "other:sports medicine");
        assert_eq!(Specialty::parse_label(&s.label()), s);
    }

    #[test]
    fn unprefixed_unknown_label_parses_as_other() {
        assert_eq!(
            Specialty::parse_label("rheumatology"),
            Specialty::Other("rheumatology".into())
        );
    }
}
