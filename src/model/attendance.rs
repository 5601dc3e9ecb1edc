use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::team::{AttendanceStatus, RosterEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkedBy {
    #[schema(example = "u_7f3a")]
    pub uid: String,
    #[schema(example = "Priya (Override)")]
    pub name: String,
}

/// One immutable audit snapshot, appended on every successful mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub present_count: u32,
    pub absent_count: u32,
    pub status: AttendanceStatus,
    pub roster: Vec<RosterEntry>,
    pub marked_by: MarkedBy,
    #[schema(value_type = String, format = "date-time")]
    pub marked_at: DateTime<Utc>,
    /// Session captured at mark time; later session changes never relabel it.
    #[schema(example = "Morning")]
    pub round: String,
}

/// Who holds the lock on a team, shown to a caller that was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display)]
#[serde(rename_all = "camelCase")]
#[display(fmt = "{} at {} ({})", name, marked_at, round)]
pub struct Holder {
    pub uid: String,
    pub name: String,
    #[schema(value_type = String, format = "date-time")]
    pub marked_at: DateTime<Utc>,
    pub round: String,
}
