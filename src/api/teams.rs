use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use utoipa::{IntoParams, ToSchema};

use crate::api::sse_response;
use crate::auth::auth::AuthUser;
use crate::error::AttendanceError;
use crate::model::team::{Leader, Person, PublicTeamView, SortKey, TeamView};
use crate::models::MessageResponse;
use crate::services::directory::{DirectoryPage, DirectoryQuery, DirectoryStats, DirectorySync, StatusFilter};
use crate::services::teams::{NewTeam, TeamService};
use crate::store::TeamProfilePatch;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DirectoryParams {
    /// Case-insensitive team name prefix
    #[param(example = "byte")]
    pub search: Option<String>,
    /// all | present | partial | absent | not-marked
    #[serde(default)]
    #[param(value_type = Option<String>, example = "not-marked")]
    pub filter: StatusFilter,
    /// `name` of the last item already shown
    pub cursor_name: Option<String>,
    /// `id` of the last item already shown
    pub cursor_id: Option<String>,
}

impl DirectoryParams {
    fn query(&self) -> DirectoryQuery {
        DirectoryQuery::new(self.search.as_deref(), self.filter)
    }

    fn cursor(&self) -> Result<Option<SortKey>, AttendanceError> {
        match (&self.cursor_name, &self.cursor_id) {
            (Some(name), Some(id)) => Ok(Some(SortKey {
                name: name.clone(),
                id: id.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err(AttendanceError::Validation(
                "cursorName and cursorId must be given together".to_string(),
            )),
        }
    }
}

// absent stays `None`, explicit null becomes `Some(None)`
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTeam {
    pub team_name: Option<String>,
    pub college_name: Option<String>,
    /// `null` removes the leader
    #[serde(default, deserialize_with = "present_or_null")]
    #[schema(value_type = Option<Leader>)]
    pub leader: Option<Option<Leader>>,
    pub members: Option<Vec<Person>>,
    pub track: Option<String>,
    pub project_title: Option<String>,
}

impl From<UpdateTeam> for TeamProfilePatch {
    fn from(req: UpdateTeam) -> Self {
        TeamProfilePatch {
            team_name: req.team_name,
            college_name: req.college_name,
            leader: req.leader,
            members: req.members,
            track: req.track,
            project_title: req.project_title,
        }
    }
}

#[derive(serde::Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QrTokenResponse {
    #[schema(example = "T-014_1773479525123")]
    pub qr_token: String,
    #[schema(value_type = String, format = "date-time")]
    pub qr_generated_at: DateTime<Utc>,
}

/// List teams
///
/// Without a status filter this returns one page; pass the previous page's
/// `nextCursor` as `cursorName`/`cursorId` to continue. With a filter the
/// whole matching set is returned at once.
#[utoipa::path(
    get,
    path = "/api/teams",
    params(DirectoryParams),
    responses(
        (status = 200, description = "Ordered team list", body = DirectoryPage),
        (status = 400, description = "Cursor used with a status filter"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn list_teams(
    _auth: AuthUser,
    directory: web::Data<DirectorySync>,
    params: web::Query<DirectoryParams>,
) -> Result<HttpResponse, AttendanceError> {
    let query = params.query();
    let page = match params.cursor()? {
        Some(cursor) => directory.load_more(&query, cursor).await?,
        None => directory.query(&query).await?,
    };
    Ok(HttpResponse::Ok().json(page))
}

/// Every team with full detail, for exports
#[utoipa::path(
    get,
    path = "/api/teams/all",
    responses(
        (status = 200, description = "All teams", body = [TeamView]),
        (status = 403, description = "Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn all_teams(
    auth: AuthUser,
    directory: web::Data<DirectorySync>,
) -> Result<HttpResponse, AttendanceError> {
    auth.require_admin()?;
    Ok(HttpResponse::Ok().json(directory.get_all().await?))
}

/// Dashboard counts and the most recent marks
#[utoipa::path(
    get,
    path = "/api/teams/stats",
    responses(
        (status = 200, description = "Attendance totals", body = DirectoryStats)
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn stats(
    _auth: AuthUser,
    directory: web::Data<DirectorySync>,
) -> Result<HttpResponse, AttendanceError> {
    Ok(HttpResponse::Ok().json(directory.stats().await?))
}

/// Live team list as server-sent events
///
/// Each event is a full `DirectoryPage` snapshot for the given search and
/// filter. Cursor parameters are ignored.
#[utoipa::path(
    get,
    path = "/api/teams/stream",
    params(DirectoryParams),
    responses(
        (status = 200, description = "text/event-stream of DirectoryPage snapshots")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn stream_teams(
    _auth: AuthUser,
    directory: web::Data<DirectorySync>,
    params: web::Query<DirectoryParams>,
) -> HttpResponse {
    let subscription = directory.subscribe(params.query());
    sse_response(subscription.into_stream())
}

/// Create a team (admin)
#[utoipa::path(
    post,
    path = "/api/teams",
    request_body = NewTeam,
    responses(
        (status = 201, description = "Team created", body = TeamView),
        (status = 400, description = "Invalid team or duplicate id"),
        (status = 403, description = "Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn create_team(
    auth: AuthUser,
    teams: web::Data<TeamService>,
    payload: web::Json<NewTeam>,
) -> Result<HttpResponse, AttendanceError> {
    let team = teams.create(&auth.identity, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(team.view()))
}

/// Get one team
#[utoipa::path(
    get,
    path = "/api/teams/{team_id}",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    responses(
        (status = 200, description = "Team detail with roster and audit log", body = TeamView),
        (status = 404, description = "Team not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn get_team(
    _auth: AuthUser,
    teams: web::Data<TeamService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AttendanceError> {
    let team = teams.get(&path).await?;
    Ok(HttpResponse::Ok().json(team.view()))
}

/// Public team page
///
/// The page a scanned team QR code opens. Needs no token and hides contact
/// details, the roster and the audit log.
#[utoipa::path(
    get,
    path = "/api/public/teams/{team_id}",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    responses(
        (status = 200, description = "Read-only team card", body = PublicTeamView),
        (status = 404, description = "Team not found")
    ),
    tag = "Teams"
)]
pub async fn public_team(
    teams: web::Data<TeamService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AttendanceError> {
    let team = teams.get(&path).await?;
    Ok(HttpResponse::Ok().json(team.public_view()))
}

/// Update a team's profile (admin)
#[utoipa::path(
    patch,
    path = "/api/teams/{team_id}",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    request_body = UpdateTeam,
    responses(
        (status = 200, description = "Team updated", body = TeamView),
        (status = 400, description = "Nothing to update, or roster change on a checked-in team"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Team not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn update_team(
    auth: AuthUser,
    teams: web::Data<TeamService>,
    path: web::Path<String>,
    payload: web::Json<UpdateTeam>,
) -> Result<HttpResponse, AttendanceError> {
    let team = teams
        .update_profile(&auth.identity, &path, payload.into_inner().into())
        .await?;
    Ok(HttpResponse::Ok().json(team.view()))
}

/// Delete a team (admin)
#[utoipa::path(
    delete,
    path = "/api/teams/{team_id}",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    responses(
        (status = 200, description = "Team deleted", body = MessageResponse),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Team not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn delete_team(
    auth: AuthUser,
    teams: web::Data<TeamService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AttendanceError> {
    teams.delete(&auth.identity, &path).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Team deleted")))
}

/// Issue a new check-in QR token (admin)
#[utoipa::path(
    post,
    path = "/api/teams/{team_id}/qr",
    params(
        ("team_id" = String, Path, description = "Team id")
    ),
    responses(
        (status = 200, description = "New token", body = QrTokenResponse),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Team not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Teams"
)]
pub async fn regenerate_qr(
    auth: AuthUser,
    teams: web::Data<TeamService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AttendanceError> {
    let (qr_token, qr_generated_at) = teams.regenerate_qr(&auth.identity, &path).await?;
    Ok(HttpResponse::Ok().json(QrTokenResponse {
        qr_token,
        qr_generated_at,
    }))
}
