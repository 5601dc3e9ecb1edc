use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::{Data, Query},
};
use serde::Deserialize;
use tracing::debug;

use crate::auth::identity::IdentityGate;
use crate::error::AttendanceError;

fn reject(req: ServiceRequest, err: AttendanceError) -> ServiceResponse<BoxBody> {
    debug!(error = %err, path = %req.path(), "Request rejected by auth");
    let resp = err.error_response();
    req.into_response(resp)
}

/// Resolve the bearer token through the identity gate and attach the
/// resulting `Identity` to the request.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let gate = req
        .app_data::<Data<dyn IdentityGate>>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("Identity gate missing"))?;

    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    // browsers cannot set headers on EventSource
    let token = match bearer.or_else(|| access_token_param(req.query_string())) {
        Some(t) => t,
        None => {
            let err = AttendanceError::Unauthenticated(
                "Authorization header must carry a Bearer token".to_string(),
            );
            return Ok(reject(req, err));
        }
    };

    match gate.resolve(&token).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.call(req).await
        }
        Err(err) => Ok(reject(req, err)),
    }
}

#[derive(Deserialize)]
struct TokenParam {
    access_token: Option<String>,
}

fn access_token_param(query: &str) -> Option<String> {
    Query::<TokenParam>::from_query(query)
        .ok()
        .and_then(|param| param.into_inner().access_token)
        .filter(|token| !token.is_empty())
}
