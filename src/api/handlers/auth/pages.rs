//! Form pages. Each issues a fresh CSRF token for the form it backs.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::error;

use super::{csrf::CSRF_COOKIE_NAME, state::AuthState, types::CsrfTokenResponse};

async fn issue_csrf_token(auth_state: &AuthState) -> Response {
    let token = match auth_state.csrf().generate_token().await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue CSRF token: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cookie = format!("{CSRF_COOKIE_NAME}={token}; Path=/; Secure; SameSite=Strict");
    let mut response = Json(CsrfTokenResponse { csrf_token: token }).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => error!("Failed to build CSRF cookie: {err}"),
    }
    response
}

#[utoipa::path(
    get,
    path = "/login",
    responses(
        (status = 200, description = "CSRF token for the login form", body = CsrfTokenResponse)
    ),
    tag = "auth"
)]
pub async fn login_page(Extension(auth_state): Extension<Arc<AuthState>>) -> Response {
    issue_csrf_token(&auth_state).await
}

#[utoipa::path(
    get,
    path = "/register",
    responses(
        (status = 200, description = "CSRF token for the registration form", body = CsrfTokenResponse)
    ),
    tag = "auth"
)]
pub async fn register_page(Extension(auth_state): Extension<Arc<AuthState>>) -> Response {
    issue_csrf_token(&auth_state).await
}

#[utoipa::path(
    get,
    path = "/verify-email",
    responses(
        (status = 200, description = "CSRF token for the verification form", body = CsrfTokenResponse),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email_page(Extension(auth_state): Extension<Arc<AuthState>>) -> Response {
    issue_csrf_token(&auth_state).await
}
