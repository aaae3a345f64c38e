use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(QueryStatus {
    Submitted => "submitted",
    Pending => "pending",
    Assigned => "assigned",
    InReview => "in_review",
    AwaitingPatientResponse => "awaiting_patient_response",
    Resolved => "resolved",
    Closed => "closed",
    Escalated => "escalated",
});

impl QueryStatus {
    /// Terminal states accept no further lifecycle events except `close`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    /// Open queries count toward a clinician's workload.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

str_enum!(QueryCategory {
    General => "general",
    Symptom => "symptom",
    Medication => "medication",
    FollowUp => "follow_up",
    TestResults => "test_results",
    Refill => "refill",
    Appointment => "appointment",
    Emergency => "emergency",
    SecondOpinion => "second_opinion",
    Other => "other",
});

str_enum!(QueryPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
    Emergency => "emergency",
});

str_enum!(Urgency {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl Urgency {
    /// Parse the uppercase wire form used by the bridge webhook.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

str_enum!(BridgeStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl BridgeStatus {
    /// Position along the monotone pending → processing → terminal path.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

str_enum!(BloodType {
    APositive => "a_positive",
    ANegative => "a_negative",
    BPositive => "b_positive",
    BNegative => "b_negative",
    AbPositive => "ab_positive",
    AbNegative => "ab_negative",
    OPositive => "o_positive",
    ONegative => "o_negative",
});

str_enum!(Gender {
    Female => "female",
    Male => "male",
    NonBinary => "non_binary",
    Undisclosed => "undisclosed",
});

str_enum!(DiabetesType {
    Type1 => "type1",
    Type2 => "type2",
    Gestational => "gestational",
    Prediabetes => "prediabetes",
    Other => "other",
});

str_enum!(RiskLabel {
    Routine => "routine",
    Elevated => "elevated",
    Critical => "critical",
});
