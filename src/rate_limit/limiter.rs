use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::evaluator::{Decision, Denial, RateLimits, evaluate};
use super::message::rejection_message;
use super::record::{Reservation, UserId};
use super::store::{ConsumeOutcome, RateLimitStore, StoreError};
use super::usage::RateLimitUsage;

/// 发帖限流入口：判定、用量查询和计数都经由存储完成，进程内不缓存计数
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    limits: RateLimits,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, limits: RateLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// 当前是否允许发帖。只读，不改写存储的计数
    pub async fn check(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        let record = self.store.load_or_initialize(user_id, now).await?;
        let bounds = self.store.calendar().bounds(now);
        let decision = evaluate(&record, &bounds, &self.limits);

        if let Decision::Denied(denial) = &decision {
            debug!(user_id, limit_type = %denial.limit_type, reset_time = %denial.reset_time, "Post would exceed rate limit");
        }
        Ok(decision)
    }

    /// 用量展示，与 `check` 使用同一套窗口翻转规则
    pub async fn usage(&self, user_id: UserId, now: DateTime<Utc>) -> Result<RateLimitUsage, StoreError> {
        let record = self.store.load_or_initialize(user_id, now).await?;
        let bounds = self.store.calendar().bounds(now);
        Ok(RateLimitUsage::new(record.effective_counts(&bounds), &self.limits))
    }

    pub async fn increment(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.increment(user_id, now).await
    }

    pub async fn try_consume(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        let outcome = self.store.try_consume(user_id, now, &self.limits).await?;
        if let ConsumeOutcome::Denied(denial) = &outcome {
            info!(user_id, limit_type = %denial.limit_type, "Rate limit exceeded");
        }
        Ok(outcome)
    }

    pub async fn refund(&self, reservation: &Reservation) -> Result<(), StoreError> {
        debug!(user_id = reservation.user_id, "Refunding rate limit reservation");
        self.store.refund(reservation).await
    }

    pub fn rejection_message(&self, denial: &Denial, now: DateTime<Utc>) -> String {
        rejection_message(denial, &self.limits, now)
    }
}
