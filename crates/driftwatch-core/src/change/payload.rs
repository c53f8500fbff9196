//! Typed payload for an audit row, resolved once at ingestion.
//!
//! The audit writer stores action-dependent JSON shapes: `INSERT` and
//! `DELETE` rows carry the row values at the top level, while `UPDATE` rows
//! nest the snapshots under `old` and `new`. This module resolves that shape
//! into a tagged union exactly once, so no downstream logic ever branches on
//! the action to find a field again.
//!
//! Field access is tolerant by design: a missing or mistyped field yields
//! `None` plus a `warn!`, never an error. Malformed audit data must degrade a
//! single event, not abort a reconciliation pass.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, ser::SerializeMap};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use super::action::ChangeAction;

/// Field-name → value snapshot of one audited row.
pub type FieldMap = BTreeMap<String, Value>;

/// Error returned when an audit payload cannot be resolved for its action.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse {action} audit payload: {source}")]
pub struct PayloadParseError {
    /// The action whose payload schema was expected.
    pub action: ChangeAction,
    /// The underlying JSON error.
    #[source]
    pub source: serde_json::Error,
}

/// Typed payload for an audit row. The discriminant comes from the row's
/// action column, not from the JSON itself.
///
/// **Serde note:** `ChangePayload` serializes back to the writer's on-disk
/// shape (top-level map for `Insert`/`Delete`, `{old, new}` for `Update`)
/// but does **not** implement `Deserialize` directly. Use
/// [`ChangePayload::deserialize_for`] with the known [`ChangeAction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangePayload {
    /// Row values at creation.
    Insert(FieldMap),
    /// Before and after snapshots of a modification.
    Update {
        /// Row values before the mutation.
        before: FieldMap,
        /// Row values after the mutation.
        after: FieldMap,
    },
    /// Row values at deletion.
    Delete(FieldMap),
}

/// On-disk shape of an `UPDATE` payload.
#[derive(Deserialize)]
struct UpdateRaw {
    old: FieldMap,
    new: FieldMap,
}

impl ChangePayload {
    /// Resolve a raw JSON payload into the typed union for the given action.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadParseError`] if the JSON is malformed or does not
    /// match the expected shape for the action.
    pub fn deserialize_for(action: ChangeAction, json: &Value) -> Result<Self, PayloadParseError> {
        let result = match action {
            ChangeAction::Insert => {
                serde_json::from_value::<FieldMap>(json.clone()).map(Self::Insert)
            }
            ChangeAction::Update => {
                serde_json::from_value::<UpdateRaw>(json.clone()).map(|raw| Self::Update {
                    before: raw.old,
                    after: raw.new,
                })
            }
            ChangeAction::Delete => {
                serde_json::from_value::<FieldMap>(json.clone()).map(Self::Delete)
            }
        };
        result.map_err(|source| PayloadParseError { action, source })
    }

    /// The most recent row snapshot carried by this payload: the created row,
    /// the post-update row, or the row as it stood at deletion.
    #[must_use]
    pub const fn current(&self) -> &FieldMap {
        match self {
            Self::Insert(fields) | Self::Delete(fields) => fields,
            Self::Update { after, .. } => after,
        }
    }

    /// The pre-mutation snapshot, present only for updates.
    #[must_use]
    pub const fn previous(&self) -> Option<&FieldMap> {
        match self {
            Self::Update { before, .. } => Some(before),
            Self::Insert(_) | Self::Delete(_) => None,
        }
    }
}

impl Serialize for ChangePayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Insert(fields) | Self::Delete(fields) => fields.serialize(serializer),
            Self::Update { before, after } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("old", before)?;
                map.serialize_entry("new", after)?;
                map.end()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tolerant field accessors
// ---------------------------------------------------------------------------

/// Read an integer field from a snapshot, tolerating absence and mistypes.
///
/// Audit writers occasionally stringify numeric columns; both `42` and
/// `"42"` resolve. Anything else logs a warning and yields `None`.
#[must_use]
pub fn field_i64(fields: &FieldMap, name: &str) -> Option<i64> {
    match fields.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => match s.parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(field = name, value = %s, "non-numeric value in integer audit field");
                None
            }
        },
        Some(other) => {
            warn!(field = name, value = %other, "unexpected type in integer audit field");
            None
        }
    }
}

/// Read a string field from a snapshot, tolerating absence and mistypes.
#[must_use]
pub fn field_str<'a>(fields: &'a FieldMap, name: &str) -> Option<&'a str> {
    match fields.get(name) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => {
            warn!(field = name, value = %other, "unexpected type in string audit field");
            None
        }
    }
}

/// Read a `YYYY-MM-DD` date field from a snapshot.
///
/// Timestamp-valued columns are tolerated by taking their date prefix.
#[must_use]
pub fn field_date(fields: &FieldMap, name: &str) -> Option<NaiveDate> {
    let raw = field_str(fields, name)?;
    let prefix = raw.get(..10).unwrap_or(raw);
    match NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            warn!(field = name, value = %raw, "unparseable date in audit field");
            None
        }
    }
}

/// Whether a snapshot describes a cancelled-equivalent row.
///
/// Two writer conventions are in play: a non-null `cancelled_at` timestamp,
/// or a `status` of `cancelled`/`canceled`/`no_show`.
#[must_use]
pub fn is_cancelled_state(fields: &FieldMap) -> bool {
    if matches!(fields.get("cancelled_at"), Some(v) if !v.is_null()) {
        return true;
    }
    matches!(
        field_str(fields, "status"),
        Some("cancelled" | "canceled" | "no_show")
    )
}
