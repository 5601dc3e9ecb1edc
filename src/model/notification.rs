use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Announcement,
}

/// A message broadcast to every signed-in staff member.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[schema(example = "3f9c2a1e0b7d4c58a6e1f2d3c4b5a697")]
    pub id: String,
    #[schema(example = "Lunch break until 1:30 PM")]
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[schema(example = "Chief")]
    pub sent_by: String,
    pub sent_by_uid: String,
    #[schema(value_type = String, format = "date-time")]
    pub timestamp: DateTime<Utc>,
}
