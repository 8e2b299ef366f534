use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{ConsumeOutcome, RateLimitStore, StoreError};
use crate::rate_limit::evaluator::{Decision, RateLimits, evaluate};
use crate::rate_limit::record::{RateLimitRecord, Reservation, UserId};
use crate::rate_limit::window::{Calendar, WindowBounds};

/// 进程内存储，用于测试和单实例部署
pub struct MemoryRateLimitStore {
    calendar: Calendar,
    records: Mutex<HashMap<UserId, RateLimitRecord>>,
}

impl MemoryRateLimitStore {
    pub fn new(calendar: Calendar) -> Self {
        Self {
            calendar,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// 存储中的原始记录（不做窗口翻转）
    pub async fn snapshot(&self, user_id: UserId) -> Option<RateLimitRecord> {
        self.records.lock().await.get(&user_id).cloned()
    }

    pub async fn insert(&self, record: RateLimitRecord) {
        self.records.lock().await.insert(record.user_id, record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

/// 取当天记录，不存在或已过期时用 `init` 新建并替换旧记录
fn current_record<'a>(
    records: &'a mut HashMap<UserId, RateLimitRecord>,
    user_id: UserId,
    bounds: &WindowBounds,
    init: fn(UserId, &WindowBounds) -> RateLimitRecord,
) -> (&'a mut RateLimitRecord, bool) {
    match records.entry(user_id) {
        Entry::Occupied(entry) => {
            let record = entry.into_mut();
            if record.is_current(bounds) {
                (record, false)
            } else {
                *record = init(user_id, bounds);
                (record, true)
            }
        }
        Entry::Vacant(entry) => (entry.insert(init(user_id, bounds)), true),
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    fn calendar(&self) -> Calendar {
        self.calendar
    }

    async fn load_or_initialize(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<RateLimitRecord, StoreError> {
        let bounds = self.calendar.bounds(now);
        let mut records = self.records.lock().await;
        let (record, _) = current_record(&mut records, user_id, &bounds, RateLimitRecord::fresh);
        Ok(record.clone())
    }

    async fn increment(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let bounds = self.calendar.bounds(now);
        let mut records = self.records.lock().await;
        let (record, created) =
            current_record(&mut records, user_id, &bounds, RateLimitRecord::first_post);
        if !created {
            record.record_post(&bounds);
        }
        Ok(())
    }

    async fn try_consume(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        limits: &RateLimits,
    ) -> Result<ConsumeOutcome, StoreError> {
        let bounds = self.calendar.bounds(now);
        let mut records = self.records.lock().await;
        let (record, _) = current_record(&mut records, user_id, &bounds, RateLimitRecord::fresh);
        match evaluate(record, &bounds, limits) {
            Decision::Allowed => Ok(ConsumeOutcome::Consumed(record.record_post(&bounds))),
            Decision::Denied(denial) => Ok(ConsumeOutcome::Denied(denial)),
        }
    }

    async fn refund(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&reservation.user_id) {
            record.refund(reservation);
        }
        Ok(())
    }
}
