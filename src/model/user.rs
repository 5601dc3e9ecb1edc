use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{AttendanceError, Result};
use crate::model::role::Role;

/// Caller identity as resolved by the identity gate; trusted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub role: Role,
    pub approved: bool,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn ensure_admin(&self, denied: &'static str) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AttendanceError::PermissionDenied(denied))
        }
    }
}

/// A row of the `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub approved: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            display_name: self.name.clone(),
            role: self.role,
            approved: self.approved,
        }
    }
}
