use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "attendanceEnabled": false,
    "currentSession": "Morning",
    "sessions": ["Morning", "Afternoon", "Final"]
}))]
pub struct Settings {
    pub attendance_enabled: bool,
    pub current_session: String,
    pub sessions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            attendance_enabled: false,
            current_session: "Morning".to_string(),
            sessions: vec![
                "Morning".to_string(),
                "Afternoon".to_string(),
                "Final".to_string(),
            ],
            last_modified: None,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub attendance_enabled: Option<bool>,
    #[schema(example = "Afternoon")]
    pub current_session: Option<String>,
    pub sessions: Option<Vec<String>>,
}

impl Settings {
    pub fn merged(&self, patch: &SettingsPatch, now: DateTime<Utc>) -> Settings {
        Settings {
            attendance_enabled: patch.attendance_enabled.unwrap_or(self.attendance_enabled),
            current_session: patch
                .current_session
                .clone()
                .unwrap_or_else(|| self.current_session.clone()),
            sessions: patch.sessions.clone().unwrap_or_else(|| self.sessions.clone()),
            last_modified: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_fields_not_in_patch() {
        let base = Settings::default();
        let patch = SettingsPatch {
            attendance_enabled: Some(true),
            ..Default::default()
        };
        let merged = base.merged(&patch, Utc::now());
        assert!(merged.attendance_enabled);
        assert_eq!(merged.current_session, "Morning");
        assert_eq!(merged.sessions.len(), 3);
        assert!(merged.last_modified.is_some());
    }
}
