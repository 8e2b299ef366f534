use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::{ConsumeOutcome, RateLimitStore, StoreError};
use crate::rate_limit::evaluator::{Decision, RateLimits, evaluate};
use crate::rate_limit::record::{RateLimitRecord, Reservation, UserId};
use crate::rate_limit::window::{Calendar, WindowBounds, WindowTracker};

const SELECT_CURRENT: &str = r#"
    SELECT user_id, minute_start, hour_start, date_recorded,
           posts_in_minute, posts_in_hour, posts_in_day
    FROM rate_limits
    WHERE user_id = $1 AND date_recorded = $2
"#;

const LOCK_CURRENT: &str = r#"
    SELECT user_id, minute_start, hour_start, date_recorded,
           posts_in_minute, posts_in_hour, posts_in_day
    FROM rate_limits
    WHERE user_id = $1 AND date_recorded = $2
    FOR UPDATE
"#;

const PURGE_STALE: &str = r#"
    DELETE FROM rate_limits
    WHERE user_id = $1 AND date_recorded <> $2
"#;

const INSERT_FRESH: &str = r#"
    INSERT INTO rate_limits
        (user_id, minute_start, hour_start, date_recorded, posts_in_minute, posts_in_hour, posts_in_day)
    VALUES ($1, $3, $4, $2, 0, 0, 0)
    ON CONFLICT (user_id, date_recorded) DO NOTHING
"#;

// SET 中引用的 rate_limits.* 都是更新前的旧值
const UPSERT_INCREMENT: &str = r#"
    INSERT INTO rate_limits
        (user_id, minute_start, hour_start, date_recorded, posts_in_minute, posts_in_hour, posts_in_day)
    VALUES ($1, $3, $4, $2, 1, 1, 1)
    ON CONFLICT (user_id, date_recorded) DO UPDATE SET
        posts_in_minute = CASE WHEN rate_limits.minute_start < EXCLUDED.minute_start
                               THEN 1 ELSE rate_limits.posts_in_minute + 1 END,
        minute_start = GREATEST(rate_limits.minute_start, EXCLUDED.minute_start),
        posts_in_hour = CASE WHEN rate_limits.hour_start < EXCLUDED.hour_start
                             THEN 1 ELSE rate_limits.posts_in_hour + 1 END,
        hour_start = GREATEST(rate_limits.hour_start, EXCLUDED.hour_start),
        posts_in_day = rate_limits.posts_in_day + 1
"#;

const UPDATE_COUNTERS: &str = r#"
    UPDATE rate_limits
    SET minute_start = $3, hour_start = $4,
        posts_in_minute = $5, posts_in_hour = $6, posts_in_day = $7
    WHERE user_id = $1 AND date_recorded = $2
"#;

const REFUND: &str = r#"
    UPDATE rate_limits SET
        posts_in_minute = CASE WHEN minute_start = $3
                               THEN GREATEST(posts_in_minute - 1, 0) ELSE posts_in_minute END,
        posts_in_hour = CASE WHEN hour_start = $4
                             THEN GREATEST(posts_in_hour - 1, 0) ELSE posts_in_hour END,
        posts_in_day = GREATEST(posts_in_day - 1, 0)
    WHERE user_id = $1 AND date_recorded = $2
"#;

#[derive(Debug, FromRow)]
struct RateLimitRow {
    user_id: i64,
    minute_start: DateTime<Utc>,
    hour_start: DateTime<Utc>,
    date_recorded: NaiveDate,
    posts_in_minute: i32,
    posts_in_hour: i32,
    posts_in_day: i32,
}

fn to_count(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} is negative: {}", column, value)))
}

fn to_column(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("counter overflow: {}", value)))
}

impl TryFrom<RateLimitRow> for RateLimitRecord {
    type Error = StoreError;

    fn try_from(row: RateLimitRow) -> Result<Self, Self::Error> {
        Ok(RateLimitRecord {
            user_id: row.user_id,
            minute: WindowTracker::new(row.minute_start, to_count(row.posts_in_minute, "posts_in_minute")?),
            hour: WindowTracker::new(row.hour_start, to_count(row.posts_in_hour, "posts_in_hour")?),
            day: WindowTracker::new(row.date_recorded, to_count(row.posts_in_day, "posts_in_day")?),
        })
    }
}

/// Postgres 存储，表结构见 `migrations/`
#[derive(Clone)]
pub struct PgRateLimitStore {
    pool: PgPool,
    calendar: Calendar,
}

impl PgRateLimitStore {
    pub fn new(pool: PgPool, calendar: Calendar) -> Self {
        Self { pool, calendar }
    }

    /// 在事务内清理旧记录、补建当天记录并加行锁
    async fn lock_current(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        bounds: &WindowBounds,
    ) -> Result<RateLimitRecord, StoreError> {
        let purged = sqlx::query(PURGE_STALE)
            .bind(user_id)
            .bind(bounds.today)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        if purged > 0 {
            tracing::debug!(user_id, purged, "Purged rate limit records from previous days");
        }

        sqlx::query(INSERT_FRESH)
            .bind(user_id)
            .bind(bounds.today)
            .bind(bounds.minute_start)
            .bind(bounds.hour_start)
            .execute(&mut **tx)
            .await?;

        let row = sqlx::query_as::<_, RateLimitRow>(LOCK_CURRENT)
            .bind(user_id)
            .bind(bounds.today)
            .fetch_one(&mut **tx)
            .await?;
        row.try_into()
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    fn calendar(&self) -> Calendar {
        self.calendar
    }

    async fn load_or_initialize(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<RateLimitRecord, StoreError> {
        let bounds = self.calendar.bounds(now);

        let existing = sqlx::query_as::<_, RateLimitRow>(SELECT_CURRENT)
            .bind(user_id)
            .bind(bounds.today)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = existing {
            return row.try_into();
        }

        let mut tx = self.pool.begin().await?;
        let record = Self::lock_current(&mut tx, user_id, &bounds).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn increment(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let bounds = self.calendar.bounds(now);

        let mut tx = self.pool.begin().await?;
        sqlx::query(PURGE_STALE)
            .bind(user_id)
            .bind(bounds.today)
            .execute(&mut *tx)
            .await?;
        sqlx::query(UPSERT_INCREMENT)
            .bind(user_id)
            .bind(bounds.today)
            .bind(bounds.minute_start)
            .bind(bounds.hour_start)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn try_consume(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        limits: &RateLimits,
    ) -> Result<ConsumeOutcome, StoreError> {
        let bounds = self.calendar.bounds(now);

        let mut tx = self.pool.begin().await?;
        let mut record = Self::lock_current(&mut tx, user_id, &bounds).await?;
        let outcome = match evaluate(&record, &bounds, limits) {
            Decision::Denied(denial) => ConsumeOutcome::Denied(denial),
            Decision::Allowed => {
                let reservation = record.record_post(&bounds);
                sqlx::query(UPDATE_COUNTERS)
                    .bind(user_id)
                    .bind(bounds.today)
                    .bind(record.minute_window_start())
                    .bind(record.hour_window_start())
                    .bind(to_column(record.posts_in_minute())?)
                    .bind(to_column(record.posts_in_hour())?)
                    .bind(to_column(record.posts_in_day())?)
                    .execute(&mut *tx)
                    .await?;
                ConsumeOutcome::Consumed(reservation)
            }
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn refund(&self, reservation: &Reservation) -> Result<(), StoreError> {
        sqlx::query(REFUND)
            .bind(reservation.user_id)
            .bind(reservation.date_recorded)
            .bind(reservation.minute_start)
            .bind(reservation.hour_start)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
