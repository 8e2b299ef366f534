//! 限流记录的持久化存储
//!
//! 每个用户同时只保留一条记录，键为 `(user_id, 当天日期)`。
//! 换日后旧记录直接删除，不做归档。

mod memory;
mod postgres;
mod redis_store;

pub use memory::MemoryRateLimitStore;
pub use postgres::PgRateLimitStore;
pub use redis_store::RedisRateLimitStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::evaluator::{Denial, RateLimits};
use super::record::{RateLimitRecord, Reservation, UserId};
use super::window::Calendar;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("corrupt rate limit record: {0}")]
    Corrupt(String),
}

/// 原子扣减的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed(Reservation),
    Denied(Denial),
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// 计算“今天”所用的日历
    fn calendar(&self) -> Calendar;

    /// 读取当天记录；没有则清理该用户的旧记录并创建计数为 0 的新记录。
    /// 已有记录原样返回，不做修改。
    async fn load_or_initialize(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<RateLimitRecord, StoreError>;

    /// 发帖成功后计数；没有当天记录时创建计数为 1 的记录
    async fn increment(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// 检查与计数在同一个原子操作内完成，并发请求不会多放行
    async fn try_consume(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        limits: &RateLimits,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// 退还一次扣减。只回退窗口未变化的计数，最低到 0
    async fn refund(&self, reservation: &Reservation) -> Result<(), StoreError>;
}
