//! 新帖推送：进程内广播，订阅者通过 SSE 接收

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::posts::{Post, PostId};

/// 订阅者处理过慢时最多缓存的事件数
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: PostId,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Post> for FeedPost {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id,
            content: post.content.clone(),
            author: post.author.clone(),
            created_at: post.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Connected,
    NewPost { post: FeedPost },
}

#[derive(Clone)]
pub struct FeedHub {
    sender: broadcast::Sender<FeedEvent>,
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.sender.subscribe()
    }

    /// 没有订阅者时直接丢弃
    pub fn publish(&self, post: &Post) {
        let receivers = self
            .sender
            .send(FeedEvent::NewPost { post: post.into() })
            .unwrap_or(0);
        tracing::debug!(post_id = post.id, receivers, "Published new post to feed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post() -> Post {
        Post {
            id: 5,
            content: "hello".into(),
            author: "alice".into(),
            user_id: 1,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_new_posts() {
        let hub = FeedHub::new();
        let mut rx = hub.subscribe();

        hub.publish(&post());

        let event = rx.recv().await.unwrap();
        assert_eq!(event, FeedEvent::NewPost { post: FeedPost::from(&post()) });
    }

    #[test]
    fn test_publish_without_subscribers() {
        FeedHub::new().publish(&post());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(FeedEvent::NewPost { post: FeedPost::from(&post()) }).unwrap();
        assert_eq!(json["type"], "new_post");
        assert_eq!(json["post"]["author"], "alice");
        assert_eq!(json["post"]["createdAt"], "2024-01-01T00:00:00Z");

        let connected = serde_json::to_value(FeedEvent::Connected).unwrap();
        assert_eq!(connected, serde_json::json!({ "type": "connected" }));
    }
}
