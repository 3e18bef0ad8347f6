//! Session handlers

use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use folio_common::{
    auth::{authenticate, clear_session_cookie, session_cookie, AuthSession},
    db::models::UserProfile,
    errors::{AppError, Result},
    metrics::record_login,
};

/// Login request body
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 255))]
    pub username: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Identity carried by a valid session
#[derive(Serialize)]
pub struct VerifyResponse {
    pub username: String,
    pub id: String,
}

/// Check credentials and set the session cookie
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let user = match authenticate(&state.repo, &request.username, &request.password).await {
        Ok(user) => user,
        Err(e) => {
            if matches!(e, AppError::InvalidCredentials) {
                record_login(false);
                tracing::info!(username = %request.username, "Login rejected");
            }
            return Err(e);
        }
    };

    let token = state.jwt.generate_token(&user.username, user.id)?;
    let cookie = session_cookie(&token, state.config.cookie_policy(), state.jwt.expiration_secs());

    record_login(true);
    tracing::info!(user_id = %user.id, username = %user.username, "Login successful");

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(MessageResponse {
            message: "Login successful".to_string(),
        }),
    ))
}

/// Report who the session cookie belongs to
pub async fn verify_token(session: AuthSession) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        username: session.username,
        id: session.user_id,
    })
}

/// Clear the session cookie
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, clear_session_cookie(state.config.cookie_policy()))],
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
}

/// List accounts; requires a session
pub async fn list_users(
    State(state): State<AppState>,
    _session: AuthSession,
) -> Result<Json<Vec<UserProfile>>> {
    let users = state.repo.list_users().await?;
    Ok(Json(users.into_iter().map(UserProfile::from).collect()))
}
