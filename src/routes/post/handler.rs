use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::{
    AppState,
    error::AppError,
    feed::FeedEvent,
    posts::{PostId, page_params},
    utils::{CurrentUser, message_to_api_response, success_to_api_response},
};

use super::model::{CreatePostRequest, CreatePostResponse, ListPostsQuery, ListPostsResponse};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[axum::debug_handler]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListPostsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit) = page_params(query.page, query.limit);
    let posts = state.posts.list(Some(page), Some(limit)).await?;

    Ok(success_to_api_response(ListPostsResponse { posts, page, limit }))
}

#[axum::debug_handler]
pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now = state.clock.now();
    let post = state.posts.create(user.id, &req.content, now).await?;

    // 帖子已写入，额度查询失败不影响本次结果
    let rate_limit = match state.rate_limiter.usage(user.id, now).await {
        Ok(usage) => Some(usage),
        Err(e) => {
            warn!(user_id = user.id, error = %e, "Failed to load rate limit usage after post");
            None
        }
    };

    Ok((
        StatusCode::CREATED,
        success_to_api_response(CreatePostResponse { post, rate_limit }),
    ))
}

#[axum::debug_handler]
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(post_id): Path<PostId>,
) -> Result<impl IntoResponse, AppError> {
    state.posts.delete(user.id, post_id).await?;
    Ok(message_to_api_response("Post deleted"))
}

fn to_sse_event(event: &FeedEvent) -> Option<Event> {
    match Event::default().json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!(error = %e, "Failed to encode feed event");
            None
        }
    }
}

/// 新帖推送：先发送 `connected`，之后每条新帖一个 `new_post` 事件
pub async fn post_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.feed.subscribe();
    debug!("Feed subscriber connected");

    let connected = stream::iter(to_sse_event(&FeedEvent::Connected));
    let updates = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => to_sse_event(&event),
            Err(e) => {
                // 订阅者落后时跳过丢失的事件
                warn!(error = %e, "Feed subscriber lagged");
                None
            }
        }
    });

    Sse::new(connected.chain(updates).map(Ok)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
