use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::{Post, PostError, PostId, PostRepository};
use crate::feed::FeedHub;
use crate::rate_limit::{ConsumeOutcome, RateLimiter, UserId};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// 页码从 1 开始，每页条数限制在 1..=100
pub fn page_params(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    (
        page.unwrap_or(1).max(1),
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    )
}

/// 发帖编排：先限流，再写入，最后推送
#[derive(Clone)]
pub struct PostService {
    repository: Arc<dyn PostRepository>,
    limiter: RateLimiter,
    feed: FeedHub,
    max_length: usize,
}

impl PostService {
    pub fn new(
        repository: Arc<dyn PostRepository>,
        limiter: RateLimiter,
        feed: FeedHub,
        max_length: usize,
    ) -> Self {
        Self {
            repository,
            limiter,
            feed,
            max_length,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn feed(&self) -> &FeedHub {
        &self.feed
    }

    fn validate(&self, content: &str) -> Result<(), PostError> {
        if content.trim().is_empty() {
            return Err(PostError::Validation("Content is required".into()));
        }
        if content.chars().count() > self.max_length {
            return Err(PostError::Validation(format!(
                "Content must be {} characters or less",
                self.max_length
            )));
        }
        Ok(())
    }

    /// 额度检查和计数是同一个原子操作；写入失败时退还额度，
    /// 所以计数只会因成功的写入而增加
    pub async fn create(
        &self,
        user_id: UserId,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Post, PostError> {
        self.validate(content)?;

        let reservation = match self.limiter.try_consume(user_id, now).await? {
            ConsumeOutcome::Consumed(reservation) => reservation,
            ConsumeOutcome::Denied(denial) => {
                let message = self.limiter.rejection_message(&denial, now);
                return Err(PostError::RateLimited { denial, message });
            }
        };

        let post = match self.repository.insert(user_id, content, now).await {
            Ok(post) => post,
            Err(e) => {
                if let Err(refund_err) = self.limiter.refund(&reservation).await {
                    error!(user_id, error = %refund_err, "Failed to refund rate limit after failed post write");
                }
                return Err(e.into());
            }
        };

        info!(user_id, post_id = post.id, "Post created");
        self.feed.publish(&post);
        Ok(post)
    }

    pub async fn list(&self, page: Option<i64>, limit: Option<i64>) -> Result<Vec<Post>, PostError> {
        let (page, limit) = page_params(page, limit);
        Ok(self.repository.list((page - 1) * limit, limit).await?)
    }

    /// 只能删除自己的帖子
    pub async fn delete(&self, user_id: UserId, post_id: PostId) -> Result<(), PostError> {
        let post = self.repository.find(post_id).await?.ok_or(PostError::NotFound)?;
        if post.user_id != user_id {
            return Err(PostError::NotOwner);
        }
        if !self.repository.delete(post_id).await? {
            return Err(PostError::NotFound);
        }
        info!(user_id, post_id, "Post deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::MemoryPostRepository;
    use crate::rate_limit::{Calendar, LimitWindow, MemoryRateLimitStore, RateLimits};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 8, 8, 8, 8).unwrap()
    }

    struct Fixture {
        service: PostService,
        store: Arc<MemoryRateLimitStore>,
        repository: Arc<MemoryPostRepository>,
    }

    async fn fixture(limits: RateLimits) -> Fixture {
        let store = Arc::new(MemoryRateLimitStore::new(Calendar::utc()));
        let repository = Arc::new(MemoryPostRepository::new());
        repository.add_author(1, "alice").await;
        repository.add_author(2, "bob").await;
        let service = PostService::new(
            repository.clone(),
            RateLimiter::new(store.clone(), limits),
            FeedHub::new(),
            1000,
        );
        Fixture { service, store, repository }
    }

    /// 写入总是失败的仓库
    struct BrokenRepository;

    #[async_trait]
    impl PostRepository for BrokenRepository {
        async fn insert(&self, _: UserId, _: &str, _: DateTime<Utc>) -> Result<Post, sqlx::Error> {
            Err(sqlx::Error::PoolTimedOut)
        }

        async fn list(&self, _: i64, _: i64) -> Result<Vec<Post>, sqlx::Error> {
            Ok(Vec::new())
        }

        async fn find(&self, _: PostId) -> Result<Option<Post>, sqlx::Error> {
            Ok(None)
        }

        async fn delete(&self, _: PostId) -> Result<bool, sqlx::Error> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_create_counts_and_publishes() {
        let f = fixture(RateLimits::default()).await;
        let mut feed = f.service.feed().subscribe();

        let post = f.service.create(1, "first!", now()).await.unwrap();
        assert_eq!(post.author, "alice");
        assert_eq!(f.store.snapshot(1).await.unwrap().posts_in_day(), 1);
        assert!(feed.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_post_is_not_written() {
        let f = fixture(RateLimits { per_minute: 1, per_hour: 10, per_day: 10 }).await;
        f.service.create(1, "one", now()).await.unwrap();

        let err = f.service.create(1, "two", now()).await.unwrap_err();
        match err {
            PostError::RateLimited { denial, message } => {
                assert_eq!(denial.limit_type, LimitWindow::Minute);
                assert_eq!(
                    message,
                    "Rate limit exceeded. You can post 1 times per minute. Please wait 1 minute(s)."
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(f.repository.count().await, 1);
        assert_eq!(f.store.snapshot(1).await.unwrap().posts_in_minute(), 1);
    }

    #[tokio::test]
    async fn test_validation_runs_before_rate_limit() {
        let f = fixture(RateLimits::default()).await;

        assert!(matches!(f.service.create(1, "   ", now()).await, Err(PostError::Validation(_))));
        let too_long = "x".repeat(1001);
        assert!(matches!(f.service.create(1, &too_long, now()).await, Err(PostError::Validation(_))));
        assert!(f.store.snapshot(1).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_refunds_quota() {
        let store = Arc::new(MemoryRateLimitStore::new(Calendar::utc()));
        let service = PostService::new(
            Arc::new(BrokenRepository),
            RateLimiter::new(store.clone(), RateLimits::default()),
            FeedHub::new(),
            1000,
        );

        let err = service.create(1, "lost", now()).await.unwrap_err();
        assert!(matches!(err, PostError::Repository(_)));

        let record = store.snapshot(1).await.unwrap();
        assert_eq!(record.posts_in_minute(), 0);
        assert_eq!(record.posts_in_hour(), 0);
        assert_eq!(record.posts_in_day(), 0);
    }

    #[tokio::test]
    async fn test_delete_checks_owner() {
        let f = fixture(RateLimits::default()).await;
        let post = f.service.create(1, "mine", now()).await.unwrap();

        assert!(matches!(f.service.delete(2, post.id).await, Err(PostError::NotOwner)));
        assert!(matches!(f.service.delete(1, 999).await, Err(PostError::NotFound)));
        f.service.delete(1, post.id).await.unwrap();
        assert_eq!(f.repository.count().await, 0);
    }

    #[test]
    fn test_page_params_are_clamped() {
        assert_eq!(page_params(None, None), (1, 20));
        assert_eq!(page_params(Some(0), Some(1000)), (1, 100));
        assert_eq!(page_params(Some(3), Some(0)), (3, 1));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let f = fixture(RateLimits { per_minute: 100, per_hour: 100, per_day: 100 }).await;
        for i in 0..3 {
            f.service
                .create(1, &format!("post {}", i), now() + chrono::TimeDelta::seconds(i))
                .await
                .unwrap();
        }

        let page = f.service.list(Some(1), Some(2)).await.unwrap();
        assert_eq!(page.iter().map(|p| p.content.as_str()).collect::<Vec<_>>(), ["post 2", "post 1"]);

        let rest = f.service.list(Some(2), Some(2)).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "post 0");
    }
}
