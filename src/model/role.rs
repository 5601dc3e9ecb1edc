use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin,
    Coordinator,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_role_names() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("coordinator".parse::<Role>(), Ok(Role::Coordinator));
        assert!("hr".parse::<Role>().is_err());
        assert_eq!(Role::Coordinator.as_ref(), "coordinator");
    }
}
