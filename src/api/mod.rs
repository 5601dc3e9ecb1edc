pub mod attendance;
pub mod notifications;
pub mod settings;
pub mod teams;
pub mod users;

use actix_web::{HttpResponse, http::header, web::Bytes};
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::error::{AttendanceError, Result};

/// Encode one snapshot as a server-sent event.
fn sse_event<T: Serialize>(value: &T) -> Result<Bytes> {
    let json = serde_json::to_string(value)
        .map_err(|e| AttendanceError::Corrupt(format!("snapshot did not serialise: {}", e)))?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

/// Stream every snapshot as its own `text/event-stream` event.
fn sse_response<S, T>(snapshots: S) -> HttpResponse
where
    S: Stream<Item = Result<T>> + 'static,
    T: Serialize,
{
    let events = snapshots.map(|snapshot| snapshot.and_then(|value| sse_event(&value)));
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(events)
}
