//! Account registration.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form,
};
use std::sync::Arc;

use super::{
    service::AuthError,
    state::AuthState,
    types::RegisterForm,
    utils::hx_redirect,
};

#[utoipa::path(
    post,
    path = "/users",
    request_body(content = RegisterForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 204, description = "User registered; verification email sent"),
        (status = 400, description = "Password does not meet requirements", body = String),
        (status = 403, description = "Origin or CSRF token rejected", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 500, description = "Internal server error, including an unavailable email", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    Extension(auth_state): Extension<Arc<AuthState>>,
    form: Option<Form<RegisterForm>>,
) -> Response {
    let Some(Form(form)) = form else {
        return (StatusCode::BAD_REQUEST, "Invalid form").into_response();
    };

    if form
        .confirm_password
        .as_deref()
        .is_some_and(|confirm| confirm != form.password)
    {
        return AuthError::PasswordMismatch.into_response();
    }

    match auth_state
        .service()
        .register_user(&form.email, &form.password)
        .await
    {
        // Delivery is best-effort; the task logs its own failure.
        Ok(_registered) => hx_redirect("/login"),
        Err(err) => err.into_response(),
    }
}
