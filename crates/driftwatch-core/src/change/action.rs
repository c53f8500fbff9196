//! Audit action enum covering the three mutation kinds in the change log.
//!
//! The string representation uses the uppercase SQL verb stored in the
//! `audit_log.action` column.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three mutation kinds recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    /// A row was created.
    Insert,
    /// A row was modified in place; the payload carries before/after maps.
    Update,
    /// A row was hard-deleted; the payload carries the final row values.
    Delete,
}

/// Error returned when parsing an unknown action string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown audit action '{}': expected one of INSERT, UPDATE, DELETE",
            self.raw
        )
    }
}

impl std::error::Error for UnknownAction {}

impl ChangeAction {
    /// All known actions in catalog order.
    pub const ALL: [Self; 3] = [Self::Insert, Self::Update, Self::Delete];

    /// Return the canonical uppercase string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Deterministic ordering rank used to break exact timestamp ties:
    /// a creation sorts before a modification, which sorts before a delete.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Insert => 0,
            Self::Update => 1,
            Self::Delete => 2,
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Audit writers are not consistent about case; accept either.
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(UnknownAction { raw: s.to_string() }),
        }
    }
}

// Custom serde: serialize as the uppercase verb string.
impl Serialize for ChangeAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChangeAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
