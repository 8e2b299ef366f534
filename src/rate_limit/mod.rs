//! 按用户的发帖限流
//!
//! 每个用户每天一条记录，分别统计当前分钟、当前小时和当天的发帖数。
//! 分钟和小时窗口对齐到固定的纪元边界，不是滑动窗口。

mod evaluator;
mod limiter;
mod message;
mod record;
pub mod store;
mod usage;
mod window;

pub use evaluator::{
    DEFAULT_PER_DAY, DEFAULT_PER_HOUR, DEFAULT_PER_MINUTE, Decision, Denial, RateLimits, evaluate,
};
pub use limiter::RateLimiter;
pub use message::{minutes_until, rejection_message};
pub use record::{PostCounts, RateLimitRecord, Reservation, UserId};
pub use store::{
    ConsumeOutcome, MemoryRateLimitStore, PgRateLimitStore, RateLimitStore, RedisRateLimitStore,
    StoreError,
};
pub use usage::RateLimitUsage;
pub use window::{Calendar, LimitWindow, WindowBounds, WindowTracker};
