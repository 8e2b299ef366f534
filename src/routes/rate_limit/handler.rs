use axum::{
    extract::{Extension, State},
    response::IntoResponse,
};

use crate::{
    AppState,
    error::AppError,
    utils::{CurrentUser, success_to_api_response},
};

#[axum::debug_handler]
pub async fn usage(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let usage = state.rate_limiter.usage(user.id, state.clock.now()).await?;
    Ok(success_to_api_response(usage))
}
