use chrono::{DateTime, Utc};

use super::evaluator::{Denial, RateLimits};
use super::window::LimitWindow;

const MINUTE_MILLIS: i64 = 60_000;

/// 距离重置还有几分钟，向上取整
pub fn minutes_until(reset_time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (reset_time - now).num_milliseconds();
    -(-millis).div_euclid(MINUTE_MILLIS)
}

/// 发帖被限流时返回给用户的提示
pub fn rejection_message(denial: &Denial, limits: &RateLimits, now: DateTime<Utc>) -> String {
    match denial.limit_type {
        LimitWindow::Minute => format!(
            "Rate limit exceeded. You can post {} times per minute. Please wait {} minute(s).",
            limits.per_minute,
            minutes_until(denial.reset_time, now)
        ),
        LimitWindow::Hour => format!(
            "Rate limit exceeded. You can post {} times per hour. Please wait {} minute(s).",
            limits.per_hour,
            minutes_until(denial.reset_time, now)
        ),
        LimitWindow::Day => format!(
            "Rate limit exceeded. You can post {} times per day. Please try again tomorrow.",
            limits.per_day
        ),
    }
}
