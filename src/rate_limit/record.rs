//! 每个用户每天一条的限流记录

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::window::{WindowBounds, WindowTracker};

pub type UserId = i64;

/// 某一时刻三个窗口的有效发帖数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCounts {
    pub posts_in_minute: u32,
    pub posts_in_hour: u32,
    pub posts_in_day: u32,
}

/// 限流记录。分钟、小时、天三个窗口各自独立翻转
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub user_id: UserId,
    pub minute: WindowTracker<DateTime<Utc>>,
    pub hour: WindowTracker<DateTime<Utc>>,
    pub day: WindowTracker<NaiveDate>,
}

/// 一次成功扣减时的窗口快照，发帖写入失败时据此退还
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub user_id: UserId,
    pub minute_start: DateTime<Utc>,
    pub hour_start: DateTime<Utc>,
    pub date_recorded: NaiveDate,
}

impl RateLimitRecord {
    /// 当天首次检查时创建的空记录
    pub fn fresh(user_id: UserId, bounds: &WindowBounds) -> Self {
        Self::with_counts(user_id, bounds, 0)
    }

    /// 未经检查直接计数时创建的记录，三个计数都为 1
    pub fn first_post(user_id: UserId, bounds: &WindowBounds) -> Self {
        Self::with_counts(user_id, bounds, 1)
    }

    fn with_counts(user_id: UserId, bounds: &WindowBounds, count: u32) -> Self {
        Self {
            user_id,
            minute: WindowTracker::new(bounds.minute_start, count),
            hour: WindowTracker::new(bounds.hour_start, count),
            day: WindowTracker::new(bounds.today, count),
        }
    }

    pub fn date_recorded(&self) -> NaiveDate {
        self.day.start
    }

    pub fn minute_window_start(&self) -> DateTime<Utc> {
        self.minute.start
    }

    pub fn hour_window_start(&self) -> DateTime<Utc> {
        self.hour.start
    }

    pub fn posts_in_minute(&self) -> u32 {
        self.minute.count
    }

    pub fn posts_in_hour(&self) -> u32 {
        self.hour.count
    }

    pub fn posts_in_day(&self) -> u32 {
        self.day.count
    }

    /// 记录是否属于 `bounds` 所在的自然日
    pub fn is_current(&self, bounds: &WindowBounds) -> bool {
        self.day.start == bounds.today
    }

    /// 只读计算有效计数，不改写存储的窗口
    pub fn effective_counts(&self, bounds: &WindowBounds) -> PostCounts {
        PostCounts {
            posts_in_minute: self.minute.effective(bounds.minute_start),
            posts_in_hour: self.hour.effective(bounds.hour_start),
            posts_in_day: self.day.effective(bounds.today),
        }
    }

    pub fn record_post(&mut self, bounds: &WindowBounds) -> Reservation {
        self.minute.record_hit(bounds.minute_start);
        self.hour.record_hit(bounds.hour_start);
        self.day.record_hit(bounds.today);
        Reservation {
            user_id: self.user_id,
            minute_start: self.minute.start,
            hour_start: self.hour.start,
            date_recorded: self.day.start,
        }
    }

    pub fn refund(&mut self, reservation: &Reservation) {
        if self.day.start != reservation.date_recorded {
            return;
        }
        self.minute.undo_hit(reservation.minute_start);
        self.hour.undo_hit(reservation.hour_start);
        self.day.undo_hit(reservation.date_recorded);
    }
}
