//! Session time windows
//!
//! Time-of-day interval logic at hour:minute granularity. An interval whose start is
//! after its end wraps across midnight. `in_close_period` is always the complement
//! of `in_trading_period` for the same interval.

use chrono::{Duration, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::Bar;

/// Drop seconds and sub-seconds
fn to_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Whether `now` lies in `[start, end]`, wrapping when `start > end`
pub fn in_trading_period(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    let (start, end, now) = (to_minute(start), to_minute(end), to_minute(now));
    if start <= end {
        start <= now && now <= end
    } else {
        start <= now || now <= end
    }
}

pub fn in_close_period(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    !in_trading_period(start, end, now)
}

/// Parse "HH:MM" or "HH:MM:SS"
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, EngineError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| EngineError::Config(format!("invalid time of day '{}'", s)))
}

/// Inclusive time-of-day interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, EngineError> {
        Ok(Self::new(parse_time_of_day(start)?, parse_time_of_day(end)?))
    }

    /// Crosses midnight
    pub fn wraps(&self) -> bool {
        to_minute(self.start) > to_minute(self.end)
    }

    pub fn in_trading_period(&self, now: NaiveTime) -> bool {
        in_trading_period(self.start, self.end, now)
    }

    pub fn in_close_period(&self, now: NaiveTime) -> bool {
        in_close_period(self.start, self.end, now)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// A wall-clock instant at which a bar of fixed period closes.
///
/// Bars are stamped with their open time, so the 10:00 bar of a 30 minute series
/// lands on the 10:30 slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarSlot {
    pub at: NaiveTime,
    pub period: Duration,
}

impl BarSlot {
    pub fn new(at: NaiveTime, period: Duration) -> Self {
        Self { at, period }
    }

    pub fn matches(&self, bar: &Bar) -> bool {
        let close = bar.close_instant(self.period).time();
        close.hour() == self.at.hour() && close.minute() == self.at.minute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn non_wrapping_window_is_inclusive() {
        let w = TimeWindow::parse("10:30:00", "22:30:00").unwrap();
        assert!(!w.wraps());
        assert!(w.in_trading_period(t(10, 30, 0)));
        assert!(w.in_trading_period(t(10, 30, 59)));
        assert!(w.in_trading_period(t(22, 30, 0)));
        assert!(!w.in_trading_period(t(10, 29, 59)));
        assert!(!w.in_trading_period(t(22, 31, 0)));
    }

    #[test]
    fn wrapping_window_crosses_midnight() {
        let w = TimeWindow::parse("14:35", "09:00").unwrap();
        assert!(w.wraps());
        assert!(w.in_trading_period(t(14, 35, 0)));
        assert!(w.in_trading_period(t(23, 59, 0)));
        assert!(w.in_trading_period(t(0, 0, 0)));
        assert!(w.in_trading_period(t(9, 0, 0)));
        assert!(!w.in_trading_period(t(9, 1, 0)));
        assert!(!w.in_trading_period(t(14, 34, 0)));
    }

    #[test]
    fn close_period_is_exact_complement() {
        let windows = [
            (t(10, 30, 0), t(22, 30, 0)),
            (t(14, 35, 0), t(9, 0, 0)),
            (t(9, 30, 0), t(14, 35, 0)),
            (t(0, 0, 0), t(23, 59, 0)),
            (t(12, 0, 0), t(12, 0, 0)),
        ];
        for (start, end) in windows {
            for minute in (0..24 * 60).step_by(7) {
                for sec in [0, 30, 59] {
                    let now = t(minute / 60, minute % 60, sec);
                    assert_ne!(
                        in_trading_period(start, end, now),
                        in_close_period(start, end, now),
                        "start={} end={} now={}",
                        start,
                        end,
                        now
                    );
                }
            }
        }
    }

    #[test]
    fn bad_time_string_is_config_error() {
        assert!(matches!(
            TimeWindow::parse("25:00", "10:00"),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(parse_time_of_day("noon"), Err(EngineError::Config(_))));
    }

    #[test]
    fn bar_slot_matches_on_close_time() {
        let slot = BarSlot::new(t(10, 30, 0), Duration::minutes(30));
        let bar = |h, m| Bar {
            instant: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        assert!(slot.matches(&bar(10, 0)));
        assert!(!slot.matches(&bar(10, 30)));
        assert!(!slot.matches(&bar(9, 30)));
    }
}
