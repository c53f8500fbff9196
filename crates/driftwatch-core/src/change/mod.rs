//! Change-event model for the append-only audit log.
//!
//! This module defines the core [`ChangeEvent`] struct, the [`ChangeAction`]
//! enum, and the tagged [`ChangePayload`] union. A `ChangeEvent` maps 1:1 to
//! one audit-log row; the row's action-dependent JSON shape is resolved into
//! the typed payload exactly once, at deserialization time.
//!
//! Events are immutable inputs. Everything derived from them (lifecycles,
//! significant events, gap records) is recomputed fresh per run.

pub mod action;
pub mod payload;

pub use action::{ChangeAction, UnknownAction};
pub use payload::{
    ChangePayload, FieldMap, PayloadParseError, field_date, field_i64, field_str,
    is_cancelled_state,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{EntityKind, SchemaRegistry};

/// A single row of the change-audit log.
///
/// # Serde
///
/// The custom `Deserialize` implementation uses the `action` field to drive
/// typed resolution of the `payload` field, since `INSERT`/`DELETE` payloads
/// are flat maps while `UPDATE` payloads nest `old`/`new` snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// The audited entity table.
    pub entity: EntityKind,

    /// Primary key of the mutated row.
    pub record_id: i64,

    /// The mutation kind.
    pub action: ChangeAction,

    /// When the mutation was recorded.
    pub occurred_at: DateTime<Utc>,

    /// Typed row snapshot(s), resolved from the writer's JSON shape.
    pub payload: ChangePayload,
}

impl<'de> Deserialize<'de> for ChangeEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        /// Two-pass helper: read the action first, then resolve the payload.
        #[derive(Deserialize)]
        struct ChangeRaw {
            entity: EntityKind,
            record_id: i64,
            action: ChangeAction,
            occurred_at: DateTime<Utc>,
            payload: Value,
        }

        let raw = ChangeRaw::deserialize(deserializer)?;
        let payload = ChangePayload::deserialize_for(raw.action, &raw.payload)
            .map_err(serde::de::Error::custom)?;

        Ok(Self {
            entity: raw.entity,
            record_id: raw.record_id,
            action: raw.action,
            occurred_at: raw.occurred_at,
            payload,
        })
    }
}

impl ChangeEvent {
    /// The parent record id per the schema registry, read from the most
    /// recent snapshot (falling back to the before-snapshot for updates that
    /// moved the row between parents and dropped the column from `new`).
    #[must_use]
    pub fn parent_id(&self, registry: &SchemaRegistry) -> Option<i64> {
        let key = registry.parent_of(self.entity)?.parent_key;
        field_i64(self.payload.current(), key)
            .or_else(|| self.payload.previous().and_then(|f| field_i64(f, key)))
    }

    /// The stay date of the affected row, from the current snapshot.
    #[must_use]
    pub fn stay_date(&self) -> Option<NaiveDate> {
        field_date(self.payload.current(), "date")
    }

    /// The hotel (tenant) id, from either snapshot.
    #[must_use]
    pub fn hotel_id(&self) -> Option<i64> {
        field_i64(self.payload.current(), "hotel_id")
            .or_else(|| self.payload.previous().and_then(|f| field_i64(f, "hotel_id")))
    }

    /// Whether any snapshot in this event touches the given hotel and date.
    ///
    /// An update that moved a row *off* the date still touches it, so the
    /// before-snapshot participates.
    #[must_use]
    pub fn touches(&self, hotel_id: i64, date: NaiveDate) -> bool {
        let hit = |fields: &FieldMap| {
            field_i64(fields, "hotel_id") == Some(hotel_id)
                && field_date(fields, "date") == Some(date)
        };
        hit(self.payload.current()) || self.payload.previous().is_some_and(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::pms().expect("valid registry")
    }

    #[test]
    fn deserialize_resolves_payload_by_action() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "entity": "reservation_details",
            "record_id": 7,
            "action": "UPDATE",
            "occurred_at": "2026-01-10T09:00:00Z",
            "payload": {
                "old": {"date": "2026-01-10", "hotel_id": 25, "reservation_id": 3},
                "new": {"date": "2026-01-12", "hotel_id": 25, "reservation_id": 3},
            },
        }))
        .expect("deserialize");

        assert_eq!(event.action, ChangeAction::Update);
        assert_eq!(event.stay_date(), NaiveDate::from_ymd_opt(2026, 1, 12));
        assert_eq!(event.parent_id(&registry()), Some(3));
    }

    #[test]
    fn deserialize_rejects_update_without_old_new() {
        let result: Result<ChangeEvent, _> = serde_json::from_value(json!({
            "entity": "reservation_details",
            "record_id": 7,
            "action": "UPDATE",
            "occurred_at": "2026-01-10T09:00:00Z",
            "payload": {"date": "2026-01-10"},
        }));
        assert!(result.is_err());
    }

    #[test]
    fn touches_considers_before_snapshot() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "entity": "reservation_details",
            "record_id": 7,
            "action": "UPDATE",
            "occurred_at": "2026-01-10T09:00:00Z",
            "payload": {
                "old": {"date": "2026-01-10", "hotel_id": 25},
                "new": {"date": "2026-01-12", "hotel_id": 25},
            },
        }))
        .expect("deserialize");

        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).expect("date");
        assert!(event.touches(25, d(2026, 1, 10)));
        assert!(event.touches(25, d(2026, 1, 12)));
        assert!(!event.touches(25, d(2026, 1, 11)));
        assert!(!event.touches(26, d(2026, 1, 10)));
    }

    #[test]
    fn parent_id_absent_for_parent_entity() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "entity": "reservations",
            "record_id": 3,
            "action": "DELETE",
            "occurred_at": "2026-01-10T09:00:00Z",
            "payload": {"hotel_id": 25, "status": "confirmed"},
        }))
        .expect("deserialize");
        assert_eq!(event.parent_id(&registry()), None);
    }
}
