use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap},
    response::Response,
};
use std::sync::Arc;
use tracing::error;

use super::{
    service::AuthError,
    session::{clear_session_cookie, token_from_cookie, SessionError},
    state::AuthState,
    utils::hx_redirect,
};

#[utoipa::path(
    get,
    path = "/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    Extension(auth_state): Extension<Arc<AuthState>>,
) -> Response {
    if let Some(token) = token_from_cookie(&headers) {
        match auth_state.service().logout(&token).await {
            Ok(()) | Err(AuthError::Session(SessionError::Invalid)) => {}
            Err(err) => error!("Failed to invalidate session: {err:#}"),
        }
    }

    // The cookie is cleared even when no session matched.
    let mut response = hx_redirect("/login");
    response
        .headers_mut()
        .append(SET_COOKIE, clear_session_cookie());
    response
}
