use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::{middleware::CurrentUser, types::MeResponse};

/// Current session user. Mounted behind `protected_route`.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Signed-in user", body = MeResponse),
        (status = 302, description = "No session cookie or email not verified"),
        (status = 401, description = "Session expired or invalid", body = String)
    ),
    tag = "auth"
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Response {
    match user {
        Some(user) => Json(MeResponse {
            user_id: user.id.to_string(),
            email: user.email,
            email_verified: user.email_verified,
        })
        .into_response(),
        None => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
    }
}
