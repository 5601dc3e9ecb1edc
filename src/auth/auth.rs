use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

use crate::error::AttendanceError;
use crate::model::user::Identity;

/// An approved caller, as resolved by the auth middleware.
pub struct AuthUser {
    pub identity: Identity,
}

impl FromRequest for AuthUser {
    type Error = AttendanceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let identity = match req.extensions().get::<Identity>() {
            Some(identity) => identity.clone(),
            None => {
                return ready(Err(AttendanceError::Unauthenticated(
                    "missing credentials".to_string(),
                )));
            }
        };

        if !identity.approved {
            return ready(Err(AttendanceError::NotApproved));
        }

        ready(Ok(AuthUser { identity }))
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AttendanceError> {
        self.identity.ensure_admin("admin only")
    }
}
