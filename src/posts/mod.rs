//! 帖子：公共时间线上只追加的帖子流

mod repository;
mod service;

pub use repository::{MemoryPostRepository, PgPostRepository, PostRepository};
pub use service::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PostService, page_params};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

use crate::rate_limit::{Denial, StoreError, UserId};

pub type PostId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub content: String,
    pub author: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PostError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    RateLimited { denial: Denial, message: String },

    #[error("post not found")]
    NotFound,

    #[error("post belongs to another user")]
    NotOwner,

    #[error("rate limit store error: {0}")]
    RateLimitStore(#[from] StoreError),

    #[error("post repository error: {0}")]
    Repository(#[from] sqlx::Error),
}
