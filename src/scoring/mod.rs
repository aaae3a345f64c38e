pub mod keywords;
pub mod scorer;

pub use scorer::{score, SafetyAssessment, Trigger};
