//! 时间窗口：分钟、小时、自然日三个互相独立的计数窗口

use chrono::{DateTime, Days, FixedOffset, Local, NaiveDate, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const MINUTE_MILLIS: i64 = 60_000;
const HOUR_MILLIS: i64 = 3_600_000;

/// 限流窗口类型，检查顺序即优先级：分钟 > 小时 > 天
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitWindow {
    Minute,
    Hour,
    Day,
}

impl LimitWindow {
    pub const PRIORITY: [LimitWindow; 3] = [LimitWindow::Minute, LimitWindow::Hour, LimitWindow::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitWindow::Minute => "minute",
            LimitWindow::Hour => "hour",
            LimitWindow::Day => "day",
        }
    }
}

impl std::fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 把时间向下对齐到固定大小的纪元边界（`now - now mod size`）
fn floor_millis(now: DateTime<Utc>, size_millis: i64) -> DateTime<Utc> {
    now - TimeDelta::milliseconds(now.timestamp_millis().rem_euclid(size_millis))
}

/// 日历所在的时区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    /// 显式配置的固定偏移
    Fixed(FixedOffset),
    /// 宿主机时区，跟随夏令时切换
    Local,
}

/// 服务器本地日历，决定“今天”是哪一天
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    zone: Zone,
}

impl Calendar {
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self { zone: Zone::Fixed(utc_offset) }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    /// 宿主机时区。每次计算时重新取偏移，夏令时切换后不需要重启
    pub fn local() -> Self {
        Self { zone: Zone::Local }
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        match self.zone {
            Zone::Fixed(offset) => date_in(&offset, now),
            Zone::Local => date_in(&Local, now),
        }
    }

    /// 某个本地日期零点对应的 UTC 时间
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        match self.zone {
            Zone::Fixed(offset) => midnight_in(&offset, date),
            Zone::Local => midnight_in(&Local, date),
        }
    }

    pub fn bounds(&self, now: DateTime<Utc>) -> WindowBounds {
        let today = self.today(now);
        WindowBounds {
            now,
            minute_start: floor_millis(now, MINUTE_MILLIS),
            hour_start: floor_millis(now, HOUR_MILLIS),
            today,
            next_day_start: self.start_of(today + Days::new(1)),
        }
    }
}

fn date_in<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(tz).date_naive()
}

fn midnight_in<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    // 零点落在夏令时跳变的空档里时，这一天从跳变后的 01:00 开始
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + TimeDelta::hours(1))).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// 某一时刻三个窗口各自的起点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub now: DateTime<Utc>,
    pub minute_start: DateTime<Utc>,
    pub hour_start: DateTime<Utc>,
    pub today: NaiveDate,
    pub next_day_start: DateTime<Utc>,
}

impl WindowBounds {
    /// 窗口重置时间：分钟/小时为窗口起点加窗口长度，天为下一个自然日零点
    pub fn reset_time(&self, window: LimitWindow) -> DateTime<Utc> {
        match window {
            LimitWindow::Minute => self.minute_start + TimeDelta::milliseconds(MINUTE_MILLIS),
            LimitWindow::Hour => self.hour_start + TimeDelta::milliseconds(HOUR_MILLIS),
            LimitWindow::Day => self.next_day_start,
        }
    }
}

/// 单个窗口的计数器。`S` 是窗口起点（分钟/小时用时间戳，天用日期）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTracker<S> {
    pub start: S,
    pub count: u32,
}

impl<S: Ord + Copy> WindowTracker<S> {
    pub fn new(start: S, count: u32) -> Self {
        Self { start, count }
    }

    pub fn is_stale(&self, current_start: S) -> bool {
        self.start < current_start
    }

    /// 只读的有效计数：窗口已过期则视为 0，存储值不变
    pub fn effective(&self, current_start: S) -> u32 {
        if self.is_stale(current_start) { 0 } else { self.count }
    }

    /// 记一次发帖：窗口过期则重置为 1 并移动起点，否则加一
    pub fn record_hit(&mut self, current_start: S) {
        if self.is_stale(current_start) {
            self.start = current_start;
            self.count = 1;
        } else {
            self.count = self.count.saturating_add(1);
        }
    }

    /// 撤销一次计数，仅当窗口未变化时生效
    pub fn undo_hit(&mut self, reserved_start: S) {
        if self.start == reserved_start {
            self.count = self.count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{MappedLocalTime, NaiveDateTime};

    /// 2024 年的美国东部时间：3 月 10 日 07:00Z 起为 EDT，11 月 3 日 06:00Z 起回到 EST
    #[derive(Debug, Clone, Copy)]
    struct Eastern2024;

    impl Eastern2024 {
        fn offset_at_utc(utc: &NaiveDateTime) -> FixedOffset {
            let dst_start = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap().and_hms_opt(7, 0, 0).unwrap();
            let dst_end = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap().and_hms_opt(6, 0, 0).unwrap();
            let hours = if *utc >= dst_start && *utc < dst_end { -4 } else { -5 };
            FixedOffset::east_opt(hours * 3600).unwrap()
        }
    }

    impl TimeZone for Eastern2024 {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            Eastern2024
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> MappedLocalTime<FixedOffset> {
            self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> MappedLocalTime<FixedOffset> {
            let candidates: Vec<FixedOffset> = [-4, -5]
                .into_iter()
                .map(|h| FixedOffset::east_opt(h * 3600).unwrap())
                .filter(|offset| {
                    let utc = *local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
                    Self::offset_at_utc(&utc) == *offset
                })
                .collect();
            match candidates[..] {
                [] => MappedLocalTime::None,
                [only] => MappedLocalTime::Single(only),
                [edt, est] => MappedLocalTime::Ambiguous(edt, est),
                _ => unreachable!(),
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            Self::offset_at_utc(&utc.and_time(NaiveTime::MIN))
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            Self::offset_at_utc(utc)
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_bounds_align_to_epoch() {
        let now = at(13, 47, 29) + TimeDelta::milliseconds(512);
        let bounds = Calendar::utc().bounds(now);

        assert_eq!(bounds.minute_start, at(13, 47, 0));
        assert_eq!(bounds.hour_start, at(13, 0, 0));
        assert_eq!(bounds.today, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(bounds.next_day_start, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_reset_times() {
        let bounds = Calendar::utc().bounds(at(9, 15, 42));

        assert_eq!(bounds.reset_time(LimitWindow::Minute), at(9, 16, 0));
        assert_eq!(bounds.reset_time(LimitWindow::Hour), at(10, 0, 0));
        assert_eq!(
            bounds.reset_time(LimitWindow::Day),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_local_calendar_day_uses_offset() {
        // UTC+8：UTC 当天 17:00 已经是本地次日 01:00
        let calendar = Calendar::new(FixedOffset::east_opt(8 * 3600).unwrap());
        let bounds = calendar.bounds(at(17, 0, 0));

        assert_eq!(bounds.today, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(bounds.next_day_start, Utc.with_ymd_and_hms(2024, 3, 11, 16, 0, 0).unwrap());
    }

    #[test]
    fn test_day_follows_daylight_saving() {
        // 2024-07-01T04:30Z 是 EDT 7 月 1 日 00:30
        let summer = Utc.with_ymd_and_hms(2024, 7, 1, 4, 30, 0).unwrap();
        assert_eq!(date_in(&Eastern2024, summer), NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(
            midnight_in(&Eastern2024, NaiveDate::from_ymd_opt(2024, 7, 2).unwrap()),
            Utc.with_ymd_and_hms(2024, 7, 2, 4, 0, 0).unwrap()
        );

        // 冬天同一 UTC 时刻还是前一天
        let winter = Utc.with_ymd_and_hms(2024, 1, 1, 4, 30, 0).unwrap();
        assert_eq!(date_in(&Eastern2024, winter), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(
            midnight_in(&Eastern2024, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_day_spanning_clock_change_ends_at_next_local_midnight() {
        // 11 月 3 日有 25 小时：零点是 EDT，次日零点是 EST
        let start = midnight_in(&Eastern2024, NaiveDate::from_ymd_opt(2024, 11, 3).unwrap());
        let end = midnight_in(&Eastern2024, NaiveDate::from_ymd_opt(2024, 11, 4).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 11, 3, 4, 0, 0).unwrap());
        assert_eq!(end - start, TimeDelta::hours(25));
    }

    #[test]
    fn test_local_calendar_agrees_with_host_zone() {
        let now = at(12, 0, 0);
        let calendar = Calendar::local();
        assert_eq!(calendar.today(now), now.with_timezone(&Local).date_naive());
        assert!(calendar.bounds(now).next_day_start > now);
    }

    #[test]
    fn test_tracker_rollover() {
        let mut tracker = WindowTracker::new(at(9, 0, 0), 4);

        assert_eq!(tracker.effective(at(9, 0, 0)), 4);
        assert_eq!(tracker.effective(at(9, 1, 0)), 0);
        assert_eq!(tracker.count, 4);

        tracker.record_hit(at(9, 0, 0));
        assert_eq!(tracker.count, 5);

        tracker.record_hit(at(9, 1, 0));
        assert_eq!(tracker, WindowTracker::new(at(9, 1, 0), 1));
    }

    #[test]
    fn test_tracker_undo_only_within_same_window() {
        let mut tracker = WindowTracker::new(at(9, 1, 0), 2);

        tracker.undo_hit(at(9, 0, 0));
        assert_eq!(tracker.count, 2);

        tracker.undo_hit(at(9, 1, 0));
        tracker.undo_hit(at(9, 1, 0));
        tracker.undo_hit(at(9, 1, 0));
        assert_eq!(tracker.count, 0);
    }
}
