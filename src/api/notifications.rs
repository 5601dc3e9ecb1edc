use actix_web::{HttpResponse, web};
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::WatchStream;
use utoipa::ToSchema;

use crate::api::sse_response;
use crate::auth::auth::AuthUser;
use crate::error::AttendanceError;
use crate::model::notification::Notification;
use crate::services::notifications::NotificationFeed;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PostNotificationReq {
    #[schema(example = "Judging starts in Hall B at 2 PM")]
    pub message: String,
}

/// Latest announcements
#[utoipa::path(
    get,
    path = "/api/notifications",
    responses(
        (status = 200, description = "Up to 50, newest first", body = [Notification])
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Notifications"
)]
pub async fn list_notifications(_auth: AuthUser, feed: web::Data<NotificationFeed>) -> HttpResponse {
    HttpResponse::Ok().json(feed.recent())
}

/// Send an announcement to all staff (admin)
#[utoipa::path(
    post,
    path = "/api/notifications",
    request_body = PostNotificationReq,
    responses(
        (status = 201, description = "Stored announcement", body = Notification),
        (status = 400, description = "Empty or oversized message"),
        (status = 403, description = "Admin only")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Notifications"
)]
pub async fn post_notification(
    auth: AuthUser,
    feed: web::Data<NotificationFeed>,
    payload: web::Json<PostNotificationReq>,
) -> Result<HttpResponse, AttendanceError> {
    let notification = feed.post(&auth.identity, &payload.message).await?;
    Ok(HttpResponse::Created().json(notification))
}

/// Live announcements as server-sent events
#[utoipa::path(
    get,
    path = "/api/notifications/stream",
    responses(
        (status = 200, description = "text/event-stream of the latest 50 announcements")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Notifications"
)]
pub async fn stream_notifications(_auth: AuthUser, feed: web::Data<NotificationFeed>) -> HttpResponse {
    let snapshots = WatchStream::new(feed.subscribe()).map(Ok::<Vec<Notification>, AttendanceError>);
    sse_response(snapshots)
}
