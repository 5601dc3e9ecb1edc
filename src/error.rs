use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::model::attendance::Holder;

/// Everything an attendance or directory operation can fail with.
///
/// `WindowClosed` and `AlreadyLocked` are ordinary business outcomes; the
/// HTTP layer hands them straight to the client with enough detail to show
/// which guard blocked the action.
#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("account is awaiting admin approval")]
    NotApproved,

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("attendance window is closed")]
    WindowClosed,

    #[error("already marked by {holder}")]
    AlreadyLocked { holder: Holder },

    #[error("lost the write race {attempts} times in a row")]
    WriteConflict { attempts: u32 },

    #[error("team '{0}' not found")]
    TeamNotFound(String),

    #[error("user '{0}' not found")]
    UserNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored record is malformed: {0}")]
    Corrupt(String),
}

pub type Result<T, E = AttendanceError> = std::result::Result<T, E>;

impl AttendanceError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::Validation(_) => "validation_error",
            AttendanceError::PermissionDenied(_) => "permission_denied",
            AttendanceError::NotApproved => "not_approved",
            AttendanceError::Unauthenticated(_) => "unauthenticated",
            AttendanceError::WindowClosed => "window_closed",
            AttendanceError::AlreadyLocked { .. } => "already_locked",
            AttendanceError::WriteConflict { .. } => "write_conflict",
            AttendanceError::TeamNotFound(_) | AttendanceError::UserNotFound(_) => "not_found",
            AttendanceError::Database(_) | AttendanceError::Corrupt(_) => "internal_error",
        }
    }
}

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::Validation(_) => StatusCode::BAD_REQUEST,
            AttendanceError::PermissionDenied(_) | AttendanceError::NotApproved => {
                StatusCode::FORBIDDEN
            }
            AttendanceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AttendanceError::WindowClosed | AttendanceError::AlreadyLocked { .. } => {
                StatusCode::LOCKED
            }
            AttendanceError::WriteConflict { .. } => StatusCode::CONFLICT,
            AttendanceError::TeamNotFound(_) | AttendanceError::UserNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AttendanceError::Database(_) | AttendanceError::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AttendanceError::AlreadyLocked { holder } => json!({
                "error": self.code(),
                "message": self.to_string(),
                "holder": holder,
            }),
            AttendanceError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                json!({
                    "error": self.code(),
                    "message": "Internal Server Error",
                })
            }
            AttendanceError::Corrupt(detail) => {
                tracing::error!(detail = %detail, "Malformed stored record");
                json!({
                    "error": self.code(),
                    "message": "Internal Server Error",
                })
            }
            _ => json!({
                "error": self.code(),
                "message": self.to_string(),
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn already_locked_names_the_holder() {
        let err = AttendanceError::AlreadyLocked {
            holder: Holder {
                uid: "u1".to_string(),
                name: "Asha".to_string(),
                marked_at: Utc::now(),
                round: "Morning".to_string(),
            },
        };
        assert_eq!(err.status_code(), StatusCode::LOCKED);
        assert!(err.to_string().starts_with("already marked by Asha at"));
        assert!(err.to_string().ends_with("(Morning)"));
    }

    #[test]
    fn business_outcomes_map_to_distinct_statuses() {
        assert_eq!(AttendanceError::WindowClosed.status_code(), StatusCode::LOCKED);
        assert_eq!(
            AttendanceError::WriteConflict { attempts: 3 }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(AttendanceError::NotApproved.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AttendanceError::TeamNotFound("x".into()).code(),
            "not_found"
        );
    }
}
