use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use postboard::clock::{Clock, MockClock};
use postboard::rate_limit::{
    Calendar, ConsumeOutcome, LimitWindow, MemoryRateLimitStore, RateLimitStore, RateLimiter,
    RateLimits,
};

const USER: i64 = 7;

fn start() -> DateTime<Utc> {
    // 分钟内第 10 秒，离整点还有 30 分钟
    Utc.with_ymd_and_hms(2024, 5, 20, 12, 30, 10).unwrap()
}

fn setup(limits: RateLimits) -> (RateLimiter, Arc<MemoryRateLimitStore>, MockClock) {
    let store = Arc::new(MemoryRateLimitStore::new(Calendar::utc()));
    let limiter = RateLimiter::new(store.clone(), limits);
    (limiter, store, MockClock::new(start()))
}

#[tokio::test]
async fn first_check_is_allowed_with_zero_counts() {
    let (limiter, _, clock) = setup(RateLimits::default());

    let decision = limiter.check(USER, clock.now()).await.unwrap();
    assert!(decision.is_allowed());
    assert_eq!(decision.limit_type(), None);

    let usage = limiter.usage(USER, clock.now()).await.unwrap();
    assert_eq!((usage.posts_in_minute, usage.posts_in_hour, usage.posts_in_day), (0, 0, 0));
    assert_eq!((usage.minute_limit, usage.hour_limit, usage.day_limit), (5, 10, 20));
}

#[tokio::test]
async fn minute_limit_denies_sixth_post_then_rolls_over() {
    let (limiter, store, clock) = setup(RateLimits::default());

    for _ in 0..5 {
        assert!(limiter.check(USER, clock.now()).await.unwrap().is_allowed());
        limiter.increment(USER, clock.now()).await.unwrap();
    }
    assert_eq!(store.snapshot(USER).await.unwrap().posts_in_minute(), 5);

    let denied = limiter.check(USER, clock.now()).await.unwrap();
    assert_eq!(denied.limit_type(), Some(LimitWindow::Minute));
    assert_eq!(
        denied.reset_time(),
        Some(Utc.with_ymd_and_hms(2024, 5, 20, 12, 31, 0).unwrap())
    );

    clock.advance(TimeDelta::seconds(61));
    assert!(limiter.check(USER, clock.now()).await.unwrap().is_allowed());

    let usage = limiter.usage(USER, clock.now()).await.unwrap();
    assert_eq!(usage.posts_in_minute, 0);
    assert_eq!(usage.posts_in_hour, 5);
    assert_eq!(usage.posts_in_day, 5);
    // 只读：存储中的分钟计数保持不变
    assert_eq!(store.snapshot(USER).await.unwrap().posts_in_minute(), 5);
}

#[tokio::test]
async fn hour_limit_denies_eleventh_post() {
    let (limiter, _, clock) = setup(RateLimits::default());

    for minute in 0..3 {
        let posts = if minute < 2 { 4 } else { 2 };
        for _ in 0..posts {
            assert!(limiter.check(USER, clock.now()).await.unwrap().is_allowed());
            limiter.increment(USER, clock.now()).await.unwrap();
        }
        clock.advance(TimeDelta::minutes(1));
    }

    let decision = limiter.check(USER, clock.now()).await.unwrap();
    assert_eq!(decision.limit_type(), Some(LimitWindow::Hour));
    assert_eq!(
        decision.reset_time(),
        Some(Utc.with_ymd_and_hms(2024, 5, 20, 13, 0, 0).unwrap())
    );
    let message = limiter.rejection_message(
        &match decision {
            postboard::rate_limit::Decision::Denied(denial) => denial,
            _ => unreachable!(),
        },
        clock.now(),
    );
    assert_eq!(
        message,
        "Rate limit exceeded. You can post 10 times per hour. Please wait 27 minute(s)."
    );
}

#[tokio::test]
async fn minute_wins_when_every_window_is_full() {
    let (limiter, _, clock) = setup(RateLimits { per_minute: 2, per_hour: 2, per_day: 2 });

    limiter.increment(USER, clock.now()).await.unwrap();
    limiter.increment(USER, clock.now()).await.unwrap();

    let decision = limiter.check(USER, clock.now()).await.unwrap();
    assert_eq!(decision.limit_type(), Some(LimitWindow::Minute));
}

#[tokio::test]
async fn day_limit_resets_at_next_local_midnight() {
    let (limiter, _, clock) = setup(RateLimits { per_minute: 100, per_hour: 100, per_day: 3 });

    for _ in 0..3 {
        limiter.increment(USER, clock.now()).await.unwrap();
        clock.advance(TimeDelta::minutes(20));
    }

    let decision = limiter.check(USER, clock.now()).await.unwrap();
    assert_eq!(decision.limit_type(), Some(LimitWindow::Day));
    assert_eq!(
        decision.reset_time(),
        Some(Utc.with_ymd_and_hms(2024, 5, 21, 0, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn new_day_discards_previous_record() {
    let (limiter, store, clock) = setup(RateLimits::default());

    for _ in 0..4 {
        limiter.increment(USER, clock.now()).await.unwrap();
    }

    clock.set(Utc.with_ymd_and_hms(2024, 5, 21, 0, 0, 5).unwrap());
    let usage = limiter.usage(USER, clock.now()).await.unwrap();
    assert_eq!((usage.posts_in_minute, usage.posts_in_hour, usage.posts_in_day), (0, 0, 0));

    let record = store.snapshot(USER).await.unwrap();
    assert_eq!(record.date_recorded(), clock.now().date_naive());
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn calendar_day_follows_server_offset() {
    // UTC+8：UTC 15:59 和 16:01 分属两个自然日
    let offset = FixedOffset::east_opt(8 * 3600).unwrap();
    let store = Arc::new(MemoryRateLimitStore::new(Calendar::new(offset)));
    let limiter = RateLimiter::new(store.clone(), RateLimits::default());

    let before = Utc.with_ymd_and_hms(2024, 5, 20, 15, 59, 0).unwrap();
    limiter.increment(USER, before).await.unwrap();
    assert_eq!(limiter.usage(USER, before).await.unwrap().posts_in_day, 1);

    let after = Utc.with_ymd_and_hms(2024, 5, 20, 16, 1, 0).unwrap();
    assert_eq!(limiter.usage(USER, after).await.unwrap().posts_in_day, 0);
    assert_eq!(
        store.snapshot(USER).await.unwrap().date_recorded(),
        chrono::NaiveDate::from_ymd_opt(2024, 5, 21).unwrap()
    );
}

#[tokio::test]
async fn usage_is_idempotent() {
    let (limiter, store, clock) = setup(RateLimits::default());
    limiter.increment(USER, clock.now()).await.unwrap();
    let before = store.snapshot(USER).await;

    let first = limiter.usage(USER, clock.now()).await.unwrap();
    let second = limiter.usage(USER, clock.now()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.snapshot(USER).await, before);
}

#[tokio::test]
async fn increment_without_check_starts_counters_at_one() {
    let (limiter, store, clock) = setup(RateLimits::default());

    limiter.increment(USER, clock.now()).await.unwrap();

    let record = store.snapshot(USER).await.unwrap();
    assert_eq!((record.posts_in_minute(), record.posts_in_hour(), record.posts_in_day()), (1, 1, 1));
}

#[tokio::test]
async fn concurrent_try_consume_never_exceeds_limit() {
    let (limiter, store, clock) = setup(RateLimits::default());
    let now = clock.now();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.try_consume(USER, now).await.unwrap() })
        })
        .collect();

    let mut consumed = 0;
    for task in tasks {
        if let ConsumeOutcome::Consumed(_) = task.await.unwrap() {
            consumed += 1;
        }
    }

    assert_eq!(consumed, 5);
    assert_eq!(store.snapshot(USER).await.unwrap().posts_in_minute(), 5);
}

#[tokio::test]
async fn refund_after_window_rollover_keeps_new_window() {
    let (limiter, store, clock) = setup(RateLimits::default());

    let reservation = match limiter.try_consume(USER, clock.now()).await.unwrap() {
        ConsumeOutcome::Consumed(reservation) => reservation,
        ConsumeOutcome::Denied(_) => panic!("first post must be allowed"),
    };

    clock.advance(TimeDelta::seconds(60));
    limiter.try_consume(USER, clock.now()).await.unwrap();
    limiter.refund(&reservation).await.unwrap();

    let record = store.snapshot(USER).await.unwrap();
    // 分钟窗口已翻转，只退还小时和日计数
    assert_eq!(record.posts_in_minute(), 1);
    assert_eq!(record.posts_in_hour(), 1);
    assert_eq!(record.posts_in_day(), 1);
    assert_eq!(store.calendar().today(clock.now()), record.date_recorded());
}
