//! Email verification with the emailed code.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use std::sync::Arc;

use super::{
    service::AuthError,
    session::{token_from_cookie, SessionError},
    state::AuthState,
    types::VerifyEmailForm,
    utils::hx_redirect,
};

#[utoipa::path(
    post,
    path = "/email-verification-request",
    request_body(content = VerifyEmailForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Expired request or invalid code", body = String),
        (status = 401, description = "No valid session", body = String),
        (status = 403, description = "Origin or CSRF token rejected", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    Extension(auth_state): Extension<Arc<AuthState>>,
    form: Option<Form<VerifyEmailForm>>,
) -> Response {
    let Some(Form(form)) = form else {
        return (StatusCode::BAD_REQUEST, "Invalid form").into_response();
    };
    let Some(token) = token_from_cookie(&headers) else {
        return AuthError::Session(SessionError::Invalid).into_response();
    };

    match auth_state.service().verify_email(&token, &form.code).await {
        Ok(()) => hx_redirect("/"),
        Err(err) => err.into_response(),
    }
}
