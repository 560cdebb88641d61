//! Email and password login.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form,
};
use std::sync::Arc;

use super::{
    session::set_session_cookie, state::AuthState, types::LoginForm, utils::hx_redirect,
};

#[utoipa::path(
    post,
    path = "/authenticate/password",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 204, description = "Authenticated; session cookie set"),
        (status = 401, description = "Invalid email or password", body = String),
        (status = 403, description = "Origin or CSRF token rejected", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(auth_state): Extension<Arc<AuthState>>,
    form: Option<Form<LoginForm>>,
) -> Response {
    let Some(Form(form)) = form else {
        return (StatusCode::BAD_REQUEST, "Invalid form").into_response();
    };

    match auth_state
        .service()
        .authenticate_with_password(&form.email, &form.password)
        .await
    {
        Ok((validated, token)) => {
            let mut response = hx_redirect("/");
            set_session_cookie(response.headers_mut(), &token, validated.session.expires_at);
            response
        }
        Err(err) => err.into_response(),
    }
}
