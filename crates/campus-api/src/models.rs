//! Wire shapes returned by the intranet API and their conversion into
//! `campus-engine` entities.
//!
//! Location records decode straight into [`campus_engine::LocationRecord`].

use std::collections::BTreeMap;

use campus_engine::interval::parse_timestamp;
use campus_engine::SlotRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reservation key used for slots whose owning team the API hides.
pub const HIDDEN_RESERVATION_KEY: i64 = -1;

/// The authenticated user, as returned by `/v2/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub displayname: Option<String>,
}

/// One evaluation slot as returned by `/v2/me/slots` or `POST /v2/slots`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlotDto {
    pub id: i64,
    pub begin_at: String,
    pub end_at: String,
    /// `null` when free, an object with an `id` when booked, or the string
    /// `"invisible"` when booked by a team the viewer may not see.
    #[serde(default)]
    pub scale_team: Value,
}

impl SlotDto {
    /// Convert into a slot record. `None` when either timestamp is malformed
    /// or the slot ends before it begins.
    pub fn to_record(&self) -> Option<SlotRecord> {
        let begin = parse_timestamp(&self.begin_at)?;
        let end = parse_timestamp(&self.end_at)?;
        if end < begin {
            return None;
        }
        Some(SlotRecord {
            id: self.id,
            begin,
            end,
            reservation_key: reservation_key(&self.scale_team),
        })
    }
}

/// Interpret a `scale_team` value.
pub fn reservation_key(scale_team: &Value) -> Option<i64> {
    match scale_team {
        Value::Null => None,
        Value::Object(fields) => match fields.get("id") {
            Some(Value::Number(id)) => Some(id.as_i64().unwrap_or(HIDDEN_RESERVATION_KEY)),
            _ => Some(HIDDEN_RESERVATION_KEY),
        },
        Value::String(_) => Some(HIDDEN_RESERVATION_KEY),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) => None,
    }
}

/// Convert slot DTOs, dropping the malformed ones.
pub fn slot_records(slots: &[SlotDto]) -> Vec<SlotRecord> {
    slots
        .iter()
        .filter_map(|slot| {
            let record = slot.to_record();
            if record.is_none() {
                tracing::debug!(id = slot.id, "dropping malformed slot");
            }
            record
        })
        .collect()
}

/// Extract `"YYYY-MM-DD" -> "HH:MM:SS"` pairs from a `locations_stats` body.
///
/// Non-object bodies yield an empty map; non-string values are skipped.
pub fn raw_stats(body: &Value) -> BTreeMap<String, String> {
    let Value::Object(days) = body else {
        return BTreeMap::new();
    };
    days.iter()
        .filter_map(|(day, duration)| match duration {
            Value::String(text) => Some((day.clone(), text.clone())),
            _ => None,
        })
        .collect()
}

/// Body of `POST /v2/slots`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSlotRequest {
    pub slot: NewSlot,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSlot {
    pub user_id: i64,
    pub begin_at: String,
    pub end_at: String,
}
