use std::collections::HashMap;

use actix_web::{HttpResponse, web};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::error::AttendanceError;
use crate::models::ResetTargetReq;
use crate::services::attendance_engine::{AttendanceEngine, MarkOutcome, ResetOutcome, UnlockOutcome};

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkAttendanceReq {
    /// `personKey -> present` for every person on the team.
    #[schema(example = json!({"leader": true, "m0": true, "m1": false}))]
    pub roster: HashMap<String, bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkCountReq {
    #[schema(example = 3)]
    pub present_count: u32,
}

/// Mark a team's attendance
#[utoipa::path(
    post,
    path = "/api/teams/{team_id}/attendance",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    request_body = MarkAttendanceReq,
    responses(
        (status = 200, description = "Attendance recorded and locked", body = MarkOutcome),
        (status = 400, description = "Roster does not match the team"),
        (status = 403, description = "Account not approved"),
        (status = 404, description = "Team not found"),
        (status = 409, description = "Lost the write race after retries"),
        (status = 423, description = "Window closed, or already marked", body = Object, example = json!({
            "error": "already_locked",
            "message": "already marked by Asha at 2026-03-14 09:12:05 UTC (Morning)",
            "holder": {"uid": "u_7f3a", "name": "Asha", "markedAt": "2026-03-14T09:12:05Z", "round": "Morning"}
        }))
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
#[instrument(name = "http_mark", skip(auth, engine, payload), fields(team_id = %path))]
pub async fn mark_attendance(
    auth: AuthUser,
    engine: web::Data<AttendanceEngine>,
    path: web::Path<String>,
    payload: web::Json<MarkAttendanceReq>,
) -> Result<HttpResponse, AttendanceError> {
    let outcome = engine
        .mark_attendance(&path, &auth.identity, &payload.roster)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Count-only marking (deprecated)
///
/// Always rejected; clients must submit a per-person roster instead.
#[utoipa::path(
    post,
    path = "/api/teams/{team_id}/attendance/count",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    request_body = MarkCountReq,
    responses(
        (status = 400, description = "Count-only marking is deprecated")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
#[allow(deprecated)]
pub async fn mark_count(
    _auth: AuthUser,
    engine: web::Data<AttendanceEngine>,
    path: web::Path<String>,
    payload: web::Json<MarkCountReq>,
) -> Result<HttpResponse, AttendanceError> {
    let outcome = engine.mark_count(&path, payload.present_count)?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Unlock a team (admin)
#[utoipa::path(
    post,
    path = "/api/teams/{team_id}/unlock",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    responses(
        (status = 200, description = "Team unlocked", body = UnlockOutcome),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Team not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn unlock(
    auth: AuthUser,
    engine: web::Data<AttendanceEngine>,
    path: web::Path<String>,
) -> Result<HttpResponse, AttendanceError> {
    let outcome = engine.unlock(&path, &auth.identity).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Reset attendance for some or all teams (admin)
///
/// Best effort: teams that fail are listed in `failures`, the rest stay reset.
#[utoipa::path(
    post,
    path = "/api/attendance/reset",
    request_body = ResetTargetReq,
    responses(
        (status = 200, description = "Reset finished", body = ResetOutcome),
        (status = 403, description = "Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn reset(
    auth: AuthUser,
    engine: web::Data<AttendanceEngine>,
    payload: web::Json<ResetTargetReq>,
) -> Result<HttpResponse, AttendanceError> {
    let outcome = engine.reset(&payload.teams, &auth.identity).await?;
    Ok(HttpResponse::Ok().json(outcome))
}
