//! Entity kinds and the parent/child schema registry.
//!
//! The registry makes cascade relationships explicit: each child kind names
//! its parent kind and the foreign-key column that points at it. Relations
//! are declared once and validated at startup, never inferred from table-name
//! patterns at query time.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The audited entity kinds this subsystem reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Per-date reservation detail row (one row per room-night).
    #[serde(rename = "reservation_details")]
    ReservationDetail,
    /// The owning reservation header.
    #[serde(rename = "reservations")]
    Reservation,
}

impl EntityKind {
    /// The audit-log table name this kind is recorded under.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::ReservationDetail => "reservation_details",
            Self::Reservation => "reservations",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Error returned when parsing an unknown entity table name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity table '{raw}': expected reservation_details or reservations")]
pub struct UnknownEntity {
    /// The unrecognised input string.
    pub raw: String,
}

impl FromStr for EntityKind {
    type Err = UnknownEntity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation_details" => Ok(Self::ReservationDetail),
            "reservations" => Ok(Self::Reservation),
            _ => Err(UnknownEntity { raw: s.to_string() }),
        }
    }
}

/// One declared child → parent relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    /// The child entity whose rows cascade on parent deletion.
    pub child: EntityKind,
    /// The parent entity.
    pub parent: EntityKind,
    /// Column in the child snapshot holding the parent's record id.
    pub parent_key: &'static str,
}

/// Errors from registry validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Two relations claim the same child kind.
    #[error("duplicate relation for child entity {0}")]
    DuplicateChild(EntityKind),

    /// A relation points an entity at itself.
    #[error("entity {0} cannot be its own parent")]
    SelfParent(EntityKind),

    /// A relation has an empty parent-key column name.
    #[error("relation for child {0} has an empty parent key column")]
    EmptyParentKey(EntityKind),
}

/// Validated set of parent/child relations.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    relations: Vec<Relation>,
}

impl SchemaRegistry {
    /// Build a registry from explicit relations, validating invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] for duplicate children, self-parenting, or
    /// empty key columns.
    pub fn new(relations: Vec<Relation>) -> Result<Self, SchemaError> {
        for (i, rel) in relations.iter().enumerate() {
            if rel.child == rel.parent {
                return Err(SchemaError::SelfParent(rel.child));
            }
            if rel.parent_key.is_empty() {
                return Err(SchemaError::EmptyParentKey(rel.child));
            }
            if relations[..i].iter().any(|r| r.child == rel.child) {
                return Err(SchemaError::DuplicateChild(rel.child));
            }
        }
        Ok(Self { relations })
    }

    /// The standard PMS registry: detail rows cascade from reservations.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the declared relations are valid by
    /// construction, but the validation path is shared with custom registries.
    pub fn pms() -> Result<Self, SchemaError> {
        Self::new(vec![Relation {
            child: EntityKind::ReservationDetail,
            parent: EntityKind::Reservation,
            parent_key: "reservation_id",
        }])
    }

    /// Look up the relation whose child is `kind`, if any.
    #[must_use]
    pub fn parent_of(&self, kind: EntityKind) -> Option<&Relation> {
        self.relations.iter().find(|r| r.child == kind)
    }
}
