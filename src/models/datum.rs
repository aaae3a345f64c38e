//! Explicit known/unknown sum for optional medical fields.
//!
//! Scorer and context rules inspect presence directly, so missing data
//! is carried as a visible `Unknown` token instead of a bare null.

use serde::{Deserialize, Serialize};

/// A medical datum that is either known or explicitly unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Datum<T> {
    Known(T),
    #[default]
    Unknown,
}

impl<T> Datum<T> {
    pub fn known(value: T) -> Self {
        Self::Known(value)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Borrow the value when known.
    pub fn as_known(&self) -> Option<&T> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }

    /// Consume into an `Option` (for SQL NULL columns).
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Datum<U> {
        match self {
            Self::Known(v) => Datum::Known(f(v)),
            Self::Unknown => Datum::Unknown,
        }
    }
}

impl<T: Copy> Datum<T> {
    /// Copy out the value when known.
    pub fn get(&self) -> Option<T> {
        match self {
            Self::Known(v) => Some(*v),
            Self::Unknown => None,
        }
    }
}

impl<T> From<Option<T>> for Datum<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Self::Known(v),
            None => Self::Unknown,
        }
    }
}

impl<T: std::fmt::Display> std::fmt::Display for Datum<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
