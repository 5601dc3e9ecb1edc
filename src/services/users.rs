use std::sync::Arc;

use tracing::info;

use crate::auth::identity::IdentityGate;
use crate::error::{AttendanceError, Result};
use crate::model::role::Role;
use crate::model::user::{Identity, User};
use crate::store::UserStore;

/// Admin management of staff accounts: approval and role assignment.
pub struct UserService {
    users: Arc<dyn UserStore>,
    gate: Arc<dyn IdentityGate>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>, gate: Arc<dyn IdentityGate>) -> Self {
        Self { users, gate }
    }

    pub async fn list(&self, caller: &Identity) -> Result<Vec<User>> {
        caller.ensure_admin("only admins can list users")?;
        self.users.list().await
    }

    pub async fn set_approved(&self, caller: &Identity, uid: &str, approved: bool) -> Result<User> {
        caller.ensure_admin("only admins can approve users")?;
        if uid == caller.uid && !approved {
            return Err(AttendanceError::Validation("admins cannot revoke their own approval".to_string()));
        }
        if !self.users.set_approved(uid, approved).await? {
            return Err(AttendanceError::UserNotFound(uid.to_string()));
        }
        self.gate.invalidate(uid).await;
        info!(uid = %uid, approved, by = %caller.uid, "User approval changed");
        self.reload(uid).await
    }

    pub async fn set_role(&self, caller: &Identity, uid: &str, role: Role) -> Result<User> {
        caller.ensure_admin("only admins can change roles")?;
        if uid == caller.uid && !role.is_admin() {
            return Err(AttendanceError::Validation("admins cannot demote themselves".to_string()));
        }
        if !self.users.set_role(uid, role).await? {
            return Err(AttendanceError::UserNotFound(uid.to_string()));
        }
        self.gate.invalidate(uid).await;
        info!(uid = %uid, %role, by = %caller.uid, "User role changed");
        self.reload(uid).await
    }

    async fn reload(&self, uid: &str) -> Result<User> {
        self.users
            .get(uid)
            .await?
            .ok_or_else(|| AttendanceError::UserNotFound(uid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::identity::JwtIdentityGate;
    use crate::auth::jwt::issue_token;
    use crate::store::memory::MemoryUserStore;

    fn admin() -> Identity {
        Identity {
            uid: "boss".to_string(),
            display_name: "Chief".to_string(),
            role: Role::Admin,
            approved: true,
        }
    }

    fn setup() -> (Arc<JwtIdentityGate>, UserService) {
        let users = Arc::new(MemoryUserStore::default());
        let gate = Arc::new(JwtIdentityGate::new(
            "s3cret".to_string(),
            users.clone(),
            Duration::from_secs(60),
            None,
        ));
        let service = UserService::new(users, gate.clone());
        (gate, service)
    }

    #[actix_web::test]
    async fn approval_takes_effect_on_the_next_request() {
        let (gate, service) = setup();
        let token = issue_token("u1", "Asha", "asha@kncet.edu", "s3cret");
        assert!(!gate.resolve(&token).await.unwrap().approved);

        let user = service.set_approved(&admin(), "u1", true).await.unwrap();
        assert!(user.approved);
        assert!(gate.resolve(&token).await.unwrap().approved);

        service.set_role(&admin(), "u1", Role::Admin).await.unwrap();
        assert_eq!(gate.resolve(&token).await.unwrap().role, Role::Admin);
    }

    #[actix_web::test]
    async fn management_is_admin_only() {
        let (_gate, service) = setup();
        let mut coord = admin();
        coord.role = Role::Coordinator;

        assert!(matches!(
            service.list(&coord).await.unwrap_err(),
            AttendanceError::PermissionDenied(_)
        ));
        assert!(matches!(
            service.set_approved(&admin(), "ghost", true).await.unwrap_err(),
            AttendanceError::UserNotFound(_)
        ));
        assert!(matches!(
            service.set_role(&admin(), "boss", Role::Coordinator).await.unwrap_err(),
            AttendanceError::Validation(_)
        ));
    }
}
