use serde::{Deserialize, Serialize};

use crate::posts::Post;
use crate::rate_limit::RateLimitUsage;

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListPostsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostResponse {
    pub post: Post,
    /// 发帖后的剩余额度，失败时省略
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitUsage>,
}

#[derive(Debug, Serialize)]
pub struct ListPostsResponse {
    pub posts: Vec<Post>,
    pub page: i64,
    pub limit: i64,
}
