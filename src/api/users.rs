use actix_web::{HttpResponse, web};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::error::AttendanceError;
use crate::model::role::Role;
use crate::model::user::{Identity, User};
use crate::services::users::UserService;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApprovalReq {
    #[schema(example = true)]
    pub approved: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleReq {
    #[schema(example = "coordinator")]
    pub role: Role,
}

/// The caller's own identity
///
/// Works for unapproved accounts too, so clients can show a waiting screen.
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Resolved identity", body = Identity),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn me(identity: web::ReqData<Identity>) -> HttpResponse {
    HttpResponse::Ok().json(identity.into_inner())
}

/// List staff accounts (admin)
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "Newest first", body = [User]),
        (status = 403, description = "Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    users: web::Data<UserService>,
) -> Result<HttpResponse, AttendanceError> {
    Ok(HttpResponse::Ok().json(users.list(&auth.identity).await?))
}

/// Approve or revoke a staff account (admin)
#[utoipa::path(
    put,
    path = "/api/users/{uid}/approval",
    params(
        ("uid" = String, Path, description = "User id")
    ),
    request_body = ApprovalReq,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn set_approval(
    auth: AuthUser,
    users: web::Data<UserService>,
    path: web::Path<String>,
    payload: web::Json<ApprovalReq>,
) -> Result<HttpResponse, AttendanceError> {
    let user = users
        .set_approved(&auth.identity, &path, payload.approved)
        .await?;
    Ok(HttpResponse::Ok().json(user))
}

/// Change a staff account's role (admin)
#[utoipa::path(
    put,
    path = "/api/users/{uid}/role",
    params(
        ("uid" = String, Path, description = "User id")
    ),
    request_body = RoleReq,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn set_role(
    auth: AuthUser,
    users: web::Data<UserService>,
    path: web::Path<String>,
    payload: web::Json<RoleReq>,
) -> Result<HttpResponse, AttendanceError> {
    let user = users.set_role(&auth.identity, &path, payload.role).await?;
    Ok(HttpResponse::Ok().json(user))
}
