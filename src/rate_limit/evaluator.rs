//! 限流判定：按分钟、小时、天的固定顺序检查有效计数

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{PostCounts, RateLimitRecord};
use super::window::{LimitWindow, WindowBounds};

pub const DEFAULT_PER_MINUTE: u32 = 5;
pub const DEFAULT_PER_HOUR: u32 = 10;
pub const DEFAULT_PER_DAY: u32 = 20;

/// 每个窗口允许的发帖数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            per_hour: DEFAULT_PER_HOUR,
            per_day: DEFAULT_PER_DAY,
        }
    }
}

impl RateLimits {
    pub fn limit_for(&self, window: LimitWindow) -> u32 {
        match window {
            LimitWindow::Minute => self.per_minute,
            LimitWindow::Hour => self.per_hour,
            LimitWindow::Day => self.per_day,
        }
    }
}

/// 被拒绝时命中的窗口以及它的重置时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    pub limit_type: LimitWindow,
    pub reset_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn limit_type(&self) -> Option<LimitWindow> {
        match self {
            Decision::Allowed => None,
            Decision::Denied(denial) => Some(denial.limit_type),
        }
    }

    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Decision::Allowed => None,
            Decision::Denied(denial) => Some(denial.reset_time),
        }
    }
}

fn count_for(counts: &PostCounts, window: LimitWindow) -> u32 {
    match window {
        LimitWindow::Minute => counts.posts_in_minute,
        LimitWindow::Hour => counts.posts_in_hour,
        LimitWindow::Day => counts.posts_in_day,
    }
}

/// 第一个有效计数达到上限的窗口胜出，同时超限时报告最短等待的分钟窗口
pub fn evaluate(record: &RateLimitRecord, bounds: &WindowBounds, limits: &RateLimits) -> Decision {
    let counts = record.effective_counts(bounds);
    LimitWindow::PRIORITY
        .into_iter()
        .find(|window| count_for(&counts, *window) >= limits.limit_for(*window))
        .map_or(Decision::Allowed, |window| {
            Decision::Denied(Denial {
                limit_type: window,
                reset_time: bounds.reset_time(window),
            })
        })
}
