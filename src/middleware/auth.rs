use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::debug;

use crate::{
    AppState,
    error::AppError,
    utils::{CurrentUser, verify_token},
};

/// 校验 Bearer 令牌和会话是否已注销，并把当前用户注入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = request
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(AppError::Unauthorized)?;

    let claims = verify_token(bearer.token(), &state.config).map_err(|e| {
        debug!(error = %e, "Rejected session token");
        AppError::Unauthorized
    })?;

    // sub 必须是数字用户ID
    let id = claims.user_id().ok_or(AppError::Unauthorized)?;

    let revoked = state
        .sessions
        .is_revoked(&claims.jti, state.clock.now())
        .await
        .map_err(|e| AppError::internal("Failed to verify session", e))?;
    if revoked {
        debug!(user_id = id, "Rejected logged-out session");
        return Err(AppError::Unauthorized);
    }

    request.extensions_mut().insert(CurrentUser {
        id,
        username: claims.username,
        session_id: claims.jti,
        expires_at: claims.exp,
    });

    Ok(next.run(request).await)
}
