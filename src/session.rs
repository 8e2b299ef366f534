//! 会话注销。JWT 本身无状态，注销后把会话ID（jti）记下来直到令牌过期

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;

/// 已注销会话键前缀
const REVOKED_SESSION_PREFIX: &str = "session:revoked:";

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 生成已注销会话键
pub fn revoked_session_key(session_id: &str) -> String {
    format!("{}{}", REVOKED_SESSION_PREFIX, session_id)
}

/// 距令牌过期还剩多少秒，已过期返回 `None`
fn remaining_secs(expires_at: i64, now: DateTime<Utc>) -> Option<u64> {
    u64::try_from(expires_at - now.timestamp()).ok().filter(|ttl| *ttl > 0)
}

#[async_trait]
pub trait SessionRevocations: Send + Sync {
    /// 注销会话，记录保留到 `expires_at`（令牌的 exp）
    async fn revoke(
        &self,
        session_id: &str,
        expires_at: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SessionStoreError>;

    async fn is_revoked(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, SessionStoreError>;
}

#[derive(Default)]
pub struct MemorySessionRevocations {
    revoked: Mutex<HashMap<String, i64>>,
}

impl MemorySessionRevocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.revoked.lock().await.len()
    }
}

#[async_trait]
impl SessionRevocations for MemorySessionRevocations {
    async fn revoke(
        &self,
        session_id: &str,
        expires_at: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let mut revoked = self.revoked.lock().await;
        // 顺便清理已过期的记录
        revoked.retain(|_, exp| *exp > now.timestamp());
        if remaining_secs(expires_at, now).is_some() {
            revoked.insert(session_id.to_string(), expires_at);
        }
        Ok(())
    }

    async fn is_revoked(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, SessionStoreError> {
        Ok(self
            .revoked
            .lock()
            .await
            .get(session_id)
            .is_some_and(|exp| *exp > now.timestamp()))
    }
}

pub struct PgSessionRevocations {
    pool: PgPool,
}

impl PgSessionRevocations {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRevocations for PgSessionRevocations {
    async fn revoke(
        &self,
        session_id: &str,
        expires_at: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let Some(expires_at) = remaining_secs(expires_at, now)
            .and_then(|_| DateTime::from_timestamp(expires_at, 0))
        else {
            return Ok(());
        };

        sqlx::query("DELETE FROM revoked_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO revoked_sessions (session_id, expires_at) VALUES ($1, $2) \
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(session_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_revoked(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, SessionStoreError> {
        let found: Option<(String,)> = sqlx::query_as(
            "SELECT session_id FROM revoked_sessions WHERE session_id = $1 AND expires_at > $2",
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }
}

pub struct RedisSessionRevocations {
    redis: Arc<RedisClient>,
}

impl RedisSessionRevocations {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SessionRevocations for RedisSessionRevocations {
    async fn revoke(
        &self,
        session_id: &str,
        expires_at: i64,
        now: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        // 过期时间与令牌一致
        let Some(ttl) = remaining_secs(expires_at, now) else {
            return Ok(());
        };
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(revoked_session_key(session_id), expires_at, ttl).await?;
        Ok(())
    }

    async fn is_revoked(&self, session_id: &str, _now: DateTime<Utc>) -> Result<bool, SessionStoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        Ok(conn.exists(revoked_session_key(session_id)).await?)
    }
}
