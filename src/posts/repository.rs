use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use super::{Post, PostId};
use crate::rate_limit::UserId;

/// 帖子的存取，不涉及限流
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn insert(
        &self,
        user_id: UserId,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Post, sqlx::Error>;

    /// 按创建时间倒序分页
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>, sqlx::Error>;

    async fn find(&self, id: PostId) -> Result<Option<Post>, sqlx::Error>;

    async fn delete(&self, id: PostId) -> Result<bool, sqlx::Error>;
}

pub struct PgPostRepository {
    pool: PgPool,
}

impl PgPostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostRepository for PgPostRepository {
    async fn insert(
        &self,
        user_id: UserId,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Post, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            WITH inserted AS (
                INSERT INTO posts (user_id, content, created_at)
                VALUES ($1, $2, $3)
                RETURNING id, user_id, content, created_at
            )
            SELECT i.id, i.content, u.username AS author, i.user_id, i.created_at
            FROM inserted i
            JOIN users u ON u.id = i.user_id
            "#,
        )
        .bind(user_id)
        .bind(content)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT p.id, p.content, u.username AS author, p.user_id, p.created_at
            FROM posts p
            JOIN users u ON u.id = p.user_id
            ORDER BY p.created_at DESC, p.id DESC
            OFFSET $1
            LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn find(&self, id: PostId) -> Result<Option<Post>, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT p.id, p.content, u.username AS author, p.user_id, p.created_at
            FROM posts p
            JOIN users u ON u.id = p.user_id
            WHERE p.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete(&self, id: PostId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Default)]
struct MemoryPosts {
    next_id: PostId,
    posts: Vec<Post>,
    authors: HashMap<UserId, String>,
}

/// 进程内帖子存储，用于测试
#[derive(Default)]
pub struct MemoryPostRepository {
    inner: RwLock<MemoryPosts>,
}

impl MemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_author(&self, user_id: UserId, username: &str) {
        self.inner.write().await.authors.insert(user_id, username.to_string());
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.posts.len()
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn insert(
        &self,
        user_id: UserId,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Post, sqlx::Error> {
        let mut inner = self.inner.write().await;
        // 与外键约束一致：作者必须存在
        let author = inner.authors.get(&user_id).cloned().ok_or(sqlx::Error::RowNotFound)?;
        inner.next_id += 1;
        let post = Post {
            id: inner.next_id,
            content: content.to_string(),
            author,
            user_id,
            created_at,
        };
        inner.posts.push(post.clone());
        Ok(post)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Post>, sqlx::Error> {
        let inner = self.inner.read().await;
        let mut posts = inner.posts.clone();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(posts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find(&self, id: PostId) -> Result<Option<Post>, sqlx::Error> {
        Ok(self.inner.read().await.posts.iter().find(|p| p.id == id).cloned())
    }

    async fn delete(&self, id: PostId) -> Result<bool, sqlx::Error> {
        let mut inner = self.inner.write().await;
        let before = inner.posts.len();
        inner.posts.retain(|p| p.id != id);
        Ok(inner.posts.len() < before)
    }
}
