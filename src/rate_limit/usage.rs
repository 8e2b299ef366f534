use serde::{Deserialize, Serialize};

use super::evaluator::RateLimits;
use super::record::PostCounts;

/// 前端展示用的配额使用情况
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitUsage {
    pub posts_in_minute: u32,
    pub posts_in_hour: u32,
    pub posts_in_day: u32,
    pub minute_limit: u32,
    pub hour_limit: u32,
    pub day_limit: u32,
}

impl RateLimitUsage {
    pub fn new(counts: PostCounts, limits: &RateLimits) -> Self {
        Self {
            posts_in_minute: counts.posts_in_minute,
            posts_in_hour: counts.posts_in_hour,
            posts_in_day: counts.posts_in_day,
            minute_limit: limits.per_minute,
            hour_limit: limits.per_hour,
            day_limit: limits.per_day,
        }
    }

    /// 任一窗口剩余配额为 0 时发帖框应禁用
    pub fn is_exhausted(&self) -> bool {
        self.posts_in_minute >= self.minute_limit
            || self.posts_in_hour >= self.hour_limit
            || self.posts_in_day >= self.day_limit
    }

    /// 形如 "2/5 per minute · 3/10 per hour · 3/20 per day"
    pub fn summary(&self) -> String {
        format!(
            "{}/{} per minute · {}/{} per hour · {}/{} per day",
            self.posts_in_minute,
            self.minute_limit,
            self.posts_in_hour,
            self.hour_limit,
            self.posts_in_day,
            self.day_limit
        )
    }
}
