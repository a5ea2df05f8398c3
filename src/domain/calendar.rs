use crate::domain::mode::Mode;
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Market status at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    ClosedWeekend,
    ClosedPre,
    ClosedPost,
}

impl MarketStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, MarketStatus::Open)
    }
}

/// A weekly trading schedule: open days, session bounds, and the market's
/// UTC offset. The session is closed-open: the instant of `close` is
/// already outside the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub open_days: Vec<Weekday>,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub utc_offset_secs: i32,
}

impl WeeklySchedule {
    /// NSE equities: Monday-Friday 09:15 to 15:30 IST.
    pub fn nse() -> Self {
        Self {
            open_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            utc_offset_secs: 5 * 3600 + 30 * 60,
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }
}

/// Calendar answering "is the market open at time T" and suggesting the
/// trading mode that matches. Twenty-four-hour venues (crypto) use
/// [`MarketCalendar::AlwaysOpen`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketCalendar {
    Weekly(WeeklySchedule),
    AlwaysOpen,
}

impl MarketCalendar {
    pub fn nse() -> Self {
        MarketCalendar::Weekly(WeeklySchedule::nse())
    }

    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        self.status(at).is_open()
    }

    pub fn status(&self, at: DateTime<Utc>) -> MarketStatus {
        let schedule = match self {
            MarketCalendar::AlwaysOpen => return MarketStatus::Open,
            MarketCalendar::Weekly(schedule) => schedule,
        };

        let local = at.with_timezone(&schedule.offset());
        if !schedule.open_days.contains(&local.weekday()) {
            return MarketStatus::ClosedWeekend;
        }

        let time = local.time();
        if time < schedule.open {
            MarketStatus::ClosedPre
        } else if time < schedule.close {
            MarketStatus::Open
        } else {
            MarketStatus::ClosedPost
        }
    }

    /// Suggested mode for auto-switching. Live is never suggested.
    pub fn suggested_mode(&self, at: DateTime<Utc>) -> Mode {
        if self.is_open(at) {
            Mode::SimOpen
        } else {
            Mode::SimClosed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        offset
            .with_ymd_and_hms(y, m, d, h, min, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn session_bounds_are_closed_open() {
        let calendar = MarketCalendar::nse();
        // 2025-06-02 is a Monday.
        assert!(!calendar.is_open(ist(2025, 6, 2, 9, 14, 59)));
        assert!(calendar.is_open(ist(2025, 6, 2, 9, 15, 0)));
        assert!(calendar.is_open(ist(2025, 6, 2, 15, 29, 59)));
        assert!(!calendar.is_open(ist(2025, 6, 2, 15, 30, 0)));
    }

    #[test]
    fn weekend_is_closed() {
        let calendar = MarketCalendar::nse();
        // 2025-06-07 is a Saturday.
        let saturday = ist(2025, 6, 7, 10, 0, 0);
        assert_eq!(calendar.status(saturday), MarketStatus::ClosedWeekend);
        assert_eq!(calendar.suggested_mode(saturday), Mode::SimClosed);
    }

    #[test]
    fn pre_and_post_statuses() {
        let calendar = MarketCalendar::nse();
        assert_eq!(
            calendar.status(ist(2025, 6, 2, 8, 0, 0)),
            MarketStatus::ClosedPre
        );
        assert_eq!(
            calendar.status(ist(2025, 6, 2, 16, 0, 0)),
            MarketStatus::ClosedPost
        );
    }

    #[test]
    fn always_open_suggests_sim_open() {
        let calendar = MarketCalendar::AlwaysOpen;
        let sunday = ist(2025, 6, 8, 3, 0, 0);
        assert!(calendar.is_open(sunday));
        assert_eq!(calendar.suggested_mode(sunday), Mode::SimOpen);
    }
}
