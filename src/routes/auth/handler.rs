use axum::{
    extract::{Extension, Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};

use crate::{
    AppState,
    error::AppError,
    utils::{CurrentUser, generate_token, message_to_api_response, success_to_api_response},
};

use super::model::{
    CurrentSessionResponse, LoginRequest, RegisterRequest, ResetPasswordRequest,
    SecretQuestionQuery, SecretQuestionResponse, SessionResponse, User, UserError,
    validate_password,
};

const INVALID_LOGIN: &str = "Invalid username or password";

fn issue_session(state: &AppState, user: &User) -> Result<SessionResponse, AppError> {
    let (token, expires_at) = generate_token(user.id, &user.username, &state.config)
        .map_err(|e| AppError::internal("Failed to create session", e))?;
    Ok(SessionResponse {
        user_id: user.id,
        username: user.username.clone(),
        token,
        expires_at,
    })
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::AlreadyExists => AppError::Conflict(err.to_string()),
            UserError::Hash(e) => AppError::internal("Failed to process account", e),
            UserError::Database(e) => AppError::internal("Failed to process account", e),
        }
    }
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate().map_err(AppError::Validation)?;

    let user = User::create(&state.pool, &req).await?;
    info!(user_id = user.id, "User registered");

    Ok((StatusCode::CREATED, success_to_api_response(issue_session(&state, &user)?)))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::Validation("Username and password are required".into()));
    }

    let user = User::find_by_username(&state.pool, &req.username)
        .await
        .map_err(|e| AppError::internal("Failed to log in", e))?;

    // 用户不存在和密码错误返回同样的提示
    let Some(user) = user.filter(|u| u.verify_password(&req.password)) else {
        warn!(username = %req.username.trim(), "Failed login attempt");
        return Err(AppError::InvalidCredentials(INVALID_LOGIN.into()));
    };

    if let Err(e) = user.touch_last_login(&state.pool).await {
        warn!(user_id = user.id, error = %e, "Failed to record last login");
    }
    info!(user_id = user.id, "User logged in");

    Ok(success_to_api_response(issue_session(&state, &user)?))
}

#[axum::debug_handler]
pub async fn secret_question(
    State(state): State<AppState>,
    Query(query): Query<SecretQuestionQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.username.trim().is_empty() {
        return Err(AppError::Validation("Username is required".into()));
    }

    let user = User::find_by_username(&state.pool, &query.username)
        .await
        .map_err(|e| AppError::internal("Failed to load secret question", e))?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(success_to_api_response(SecretQuestionResponse {
        username: user.username,
        secret_question: user.secret_question,
    }))
}

#[axum::debug_handler]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.username.trim().is_empty() || req.secret_answer.trim().is_empty() {
        return Err(AppError::Validation("All fields are required".into()));
    }
    validate_password(&req.new_password, &req.confirm_password).map_err(AppError::Validation)?;

    let user = User::find_by_username(&state.pool, &req.username)
        .await
        .map_err(|e| AppError::internal("Failed to reset password", e))?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if !user.verify_secret_answer(&req.secret_answer) {
        warn!(user_id = user.id, "Wrong secret answer on password reset");
        return Err(AppError::InvalidCredentials("Incorrect secret answer".into()));
    }

    user.update_password(&state.pool, &req.new_password).await?;
    info!(user_id = user.id, "Password reset");

    Ok(message_to_api_response("Password has been reset"))
}

#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    state
        .sessions
        .revoke(&user.session_id, user.expires_at, state.clock.now())
        .await
        .map_err(|e| AppError::internal("Logout failed", e))?;
    info!(user_id = user.id, "User logged out");

    Ok(message_to_api_response("Logged out successfully"))
}

#[axum::debug_handler]
pub async fn session(Extension(user): Extension<CurrentUser>) -> impl IntoResponse {
    success_to_api_response(CurrentSessionResponse {
        user_id: user.id,
        username: user.username,
    })
}
