use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use redis::{Client as RedisClient, Script};

use super::{ConsumeOutcome, RateLimitStore, StoreError};
use crate::rate_limit::evaluator::{Denial, RateLimits};
use crate::rate_limit::record::{RateLimitRecord, Reservation, UserId};
use crate::rate_limit::window::{Calendar, LimitWindow, WindowBounds, WindowTracker};

/// 限流记录键前缀
const RATE_LIMIT_PREFIX: &str = "rate_limit:user:";

/// 最后一次写入两天后过期，旧记录不会常驻
const RECORD_TTL_SECS: u64 = 2 * 24 * 3600;

const DATE_FORMAT: &str = "%Y-%m-%d";

// 所有脚本共用：日期不是今天时删除旧记录并按 ARGV[5] 初始化计数
const ENSURE_TODAY: &str = r#"
local function ensure_today(key, date, minute_start, hour_start, initial)
  if redis.call('HGET', key, 'date') ~= date then
    redis.call('DEL', key)
    redis.call('HSET', key, 'date', date, 'minute_start', minute_start, 'hour_start', hour_start,
      'minute', initial, 'hour', initial, 'day', initial)
    return true
  end
  return false
end
"#;

const LOAD_SCRIPT: &str = r#"
ensure_today(KEYS[1], ARGV[1], ARGV[2], ARGV[3], 0)
redis.call('EXPIRE', KEYS[1], ARGV[4])
return redis.call('HMGET', KEYS[1], 'date', 'minute_start', 'hour_start', 'minute', 'hour', 'day')
"#;

const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
if not ensure_today(key, ARGV[1], ARGV[2], ARGV[3], 1) then
  if tonumber(redis.call('HGET', key, 'minute_start')) < tonumber(ARGV[2]) then
    redis.call('HSET', key, 'minute_start', ARGV[2], 'minute', 1)
  else
    redis.call('HINCRBY', key, 'minute', 1)
  end
  if tonumber(redis.call('HGET', key, 'hour_start')) < tonumber(ARGV[3]) then
    redis.call('HSET', key, 'hour_start', ARGV[3], 'hour', 1)
  else
    redis.call('HINCRBY', key, 'hour', 1)
  end
  redis.call('HINCRBY', key, 'day', 1)
end
redis.call('EXPIRE', key, ARGV[4])
return 1
"#;

// 返回 0 表示已扣减，1/2/3 分别表示分钟/小时/天超限
const TRY_CONSUME_SCRIPT: &str = r#"
local key = KEYS[1]
ensure_today(key, ARGV[1], ARGV[2], ARGV[3], 0)
redis.call('EXPIRE', key, ARGV[4])

local minute_stale = tonumber(redis.call('HGET', key, 'minute_start')) < tonumber(ARGV[2])
local hour_stale = tonumber(redis.call('HGET', key, 'hour_start')) < tonumber(ARGV[3])
local minute = tonumber(redis.call('HGET', key, 'minute'))
local hour = tonumber(redis.call('HGET', key, 'hour'))
local day = tonumber(redis.call('HGET', key, 'day'))
if minute_stale then minute = 0 end
if hour_stale then hour = 0 end

if minute >= tonumber(ARGV[5]) then return 1 end
if hour >= tonumber(ARGV[6]) then return 2 end
if day >= tonumber(ARGV[7]) then return 3 end

if minute_stale then
  redis.call('HSET', key, 'minute_start', ARGV[2], 'minute', 1)
else
  redis.call('HINCRBY', key, 'minute', 1)
end
if hour_stale then
  redis.call('HSET', key, 'hour_start', ARGV[3], 'hour', 1)
else
  redis.call('HINCRBY', key, 'hour', 1)
end
redis.call('HINCRBY', key, 'day', 1)
return 0
"#;

const REFUND_SCRIPT: &str = r#"
local key = KEYS[1]
if redis.call('HGET', key, 'date') ~= ARGV[1] then return 0 end
if redis.call('HGET', key, 'minute_start') == ARGV[2] and tonumber(redis.call('HGET', key, 'minute')) > 0 then
  redis.call('HINCRBY', key, 'minute', -1)
end
if redis.call('HGET', key, 'hour_start') == ARGV[3] and tonumber(redis.call('HGET', key, 'hour')) > 0 then
  redis.call('HINCRBY', key, 'hour', -1)
end
if tonumber(redis.call('HGET', key, 'day')) > 0 then
  redis.call('HINCRBY', key, 'day', -1)
end
return 1
"#;

/// 生成用户限流记录键
pub fn rate_limit_key(user_id: UserId) -> String {
    format!("{}{}", RATE_LIMIT_PREFIX, user_id)
}

fn with_prelude(body: &str) -> Script {
    Script::new(&format!("{}\n{}", ENSURE_TODAY, body))
}

fn parse_field<T: std::str::FromStr>(value: Option<String>, field: &str) -> Result<T, StoreError> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StoreError::Corrupt(format!("invalid field {} in redis record", field)))
}

fn parse_millis(value: Option<String>, field: &str) -> Result<DateTime<Utc>, StoreError> {
    let millis: i64 = parse_field(value, field)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("{} out of range: {}", field, millis)))
}

/// HMGET 的返回值转为记录
fn parse_record(user_id: UserId, fields: Vec<Option<String>>) -> Result<RateLimitRecord, StoreError> {
    let [date, minute_start, hour_start, minute, hour, day]: [Option<String>; 6] = fields
        .try_into()
        .map_err(|_| StoreError::Corrupt("unexpected field count in redis record".to_string()))?;

    let date = date
        .and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok())
        .ok_or_else(|| StoreError::Corrupt("invalid date in redis record".to_string()))?;

    Ok(RateLimitRecord {
        user_id,
        minute: WindowTracker::new(parse_millis(minute_start, "minute_start")?, parse_field(minute, "minute")?),
        hour: WindowTracker::new(parse_millis(hour_start, "hour_start")?, parse_field(hour, "hour")?),
        day: WindowTracker::new(date, parse_field(day, "day")?),
    })
}

/// Redis 存储：每个用户一个 hash，所有读改写都在 Lua 脚本里原子完成
pub struct RedisRateLimitStore {
    redis: Arc<RedisClient>,
    calendar: Calendar,
    load: Script,
    increment: Script,
    try_consume: Script,
    refund: Script,
}

impl RedisRateLimitStore {
    pub fn new(redis: Arc<RedisClient>, calendar: Calendar) -> Self {
        Self {
            redis,
            calendar,
            load: with_prelude(LOAD_SCRIPT),
            increment: with_prelude(INCREMENT_SCRIPT),
            try_consume: with_prelude(TRY_CONSUME_SCRIPT),
            refund: Script::new(REFUND_SCRIPT),
        }
    }

    /// 所有脚本共用的前四个参数
    fn window_args(bounds: &WindowBounds) -> (String, i64, i64, u64) {
        (
            bounds.today.format(DATE_FORMAT).to_string(),
            bounds.minute_start.timestamp_millis(),
            bounds.hour_start.timestamp_millis(),
            RECORD_TTL_SECS,
        )
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    fn calendar(&self) -> Calendar {
        self.calendar
    }

    async fn load_or_initialize(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<RateLimitRecord, StoreError> {
        let bounds = self.calendar.bounds(now);
        let (date, minute_start, hour_start, ttl) = Self::window_args(&bounds);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let fields: Vec<Option<String>> = self
            .load
            .key(rate_limit_key(user_id))
            .arg(date)
            .arg(minute_start)
            .arg(hour_start)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await?;
        parse_record(user_id, fields)
    }

    async fn increment(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let bounds = self.calendar.bounds(now);
        let (date, minute_start, hour_start, ttl) = Self::window_args(&bounds);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let _: i64 = self
            .increment
            .key(rate_limit_key(user_id))
            .arg(date)
            .arg(minute_start)
            .arg(hour_start)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn try_consume(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        limits: &RateLimits,
    ) -> Result<ConsumeOutcome, StoreError> {
        let bounds = self.calendar.bounds(now);
        let (date, minute_start, hour_start, ttl) = Self::window_args(&bounds);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let code: i64 = self
            .try_consume
            .key(rate_limit_key(user_id))
            .arg(date)
            .arg(minute_start)
            .arg(hour_start)
            .arg(ttl)
            .arg(limits.per_minute)
            .arg(limits.per_hour)
            .arg(limits.per_day)
            .invoke_async(&mut conn)
            .await?;

        let limit_type = match code {
            0 => {
                return Ok(ConsumeOutcome::Consumed(Reservation {
                    user_id,
                    minute_start: bounds.minute_start,
                    hour_start: bounds.hour_start,
                    date_recorded: bounds.today,
                }));
            }
            1 => LimitWindow::Minute,
            2 => LimitWindow::Hour,
            3 => LimitWindow::Day,
            other => {
                return Err(StoreError::Corrupt(format!("unexpected try_consume result: {}", other)));
            }
        };
        Ok(ConsumeOutcome::Denied(Denial {
            limit_type,
            reset_time: bounds.reset_time(limit_type),
        }))
    }

    async fn refund(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let _: i64 = self
            .refund
            .key(rate_limit_key(reservation.user_id))
            .arg(reservation.date_recorded.format(DATE_FORMAT).to_string())
            .arg(reservation.minute_start.timestamp_millis())
            .arg(reservation.hour_start.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
