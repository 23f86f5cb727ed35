use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;

/// Reject requests without `Authorization: Bearer <api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if let Some(token) = auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
        if token == &*state.api_key {
            return Ok(next.run(request).await);
        }
    }

    tracing::debug!(path = %request.uri().path(), "Admin request rejected");
    Err(StatusCode::UNAUTHORIZED)
}
