use actix_web::{HttpResponse, web};
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;

use crate::api::sse_response;
use crate::auth::auth::AuthUser;
use crate::error::{AttendanceError, Result};
use crate::model::settings::{Settings, SettingsPatch};
use crate::services::settings_registry::SettingsRegistry;

/// Current event settings
#[utoipa::path(
    get,
    path = "/api/settings",
    responses(
        (status = 200, description = "Attendance window and sessions", body = Settings)
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Settings"
)]
pub async fn get_settings(_auth: AuthUser, registry: web::Data<SettingsRegistry>) -> HttpResponse {
    HttpResponse::Ok().json(registry.read())
}

/// Change event settings (admin)
///
/// Fields left out are unchanged. Last write wins.
#[utoipa::path(
    patch,
    path = "/api/settings",
    request_body = SettingsPatch,
    responses(
        (status = 200, description = "Merged settings", body = Settings),
        (status = 403, description = "Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Settings"
)]
pub async fn update_settings(
    auth: AuthUser,
    registry: web::Data<SettingsRegistry>,
    payload: web::Json<SettingsPatch>,
) -> Result<HttpResponse, AttendanceError> {
    let settings = registry.update(&auth.identity, &payload).await?;
    Ok(HttpResponse::Ok().json(settings))
}

/// Live settings as server-sent events
#[utoipa::path(
    get,
    path = "/api/settings/stream",
    responses(
        (status = 200, description = "text/event-stream of Settings snapshots")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Settings"
)]
pub async fn stream_settings(_auth: AuthUser, registry: web::Data<SettingsRegistry>) -> HttpResponse {
    let snapshots = WatchStream::new(registry.subscribe()).map(Ok::<Settings, AttendanceError>);
    sse_response(snapshots)
}
