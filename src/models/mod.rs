pub mod bridge;
pub mod clinician;
pub mod datum;
pub mod enums;
pub mod patient;
pub mod query;
pub mod specialty;

pub use bridge::BridgeQuery;
pub use clinician::Clinician;
pub use datum::Datum;
pub use enums::*;
pub use patient::{ConsentFlags, ContactPreferences, MedicalHistory, Patient, VitalSigns};
pub use query::{AiAnalysis, Query, QueryMessage};
pub use specialty::Specialty;
