use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use lazy_static::lazy_static;

/// Injectable holiday source for the Market-Hours Gate (§4.13): "calendar
/// may be overridden" is modeled as a trait object rather than hardcoded
/// logic, so a non-default exchange calendar can be supplied by the caller.
pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

lazy_static! {
    /// A representative NYSE holiday table. Extended yearly; this is meant
    /// as the practical default, not an exhaustive perpetual calendar.
    static ref NYSE_HOLIDAYS_2026: Vec<NaiveDate> = vec![
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),   // New Year's Day
        NaiveDate::from_ymd_opt(2026, 1, 19).unwrap(),  // MLK Day
        NaiveDate::from_ymd_opt(2026, 2, 16).unwrap(),  // Presidents' Day
        NaiveDate::from_ymd_opt(2026, 4, 3).unwrap(),   // Good Friday
        NaiveDate::from_ymd_opt(2026, 5, 25).unwrap(),  // Memorial Day
        NaiveDate::from_ymd_opt(2026, 6, 19).unwrap(),  // Juneteenth
        NaiveDate::from_ymd_opt(2026, 7, 3).unwrap(),   // Independence Day (observed)
        NaiveDate::from_ymd_opt(2026, 9, 7).unwrap(),   // Labor Day
        NaiveDate::from_ymd_opt(2026, 11, 26).unwrap(), // Thanksgiving
        NaiveDate::from_ymd_opt(2026, 12, 25).unwrap(), // Christmas
    ];
}

/// Default exchange calendar: weekends plus a small fixed NYSE holiday
/// table (§4.13 "Default exchange is US Eastern").
pub struct NyseCalendar;

impl HolidayCalendar for NyseCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        NYSE_HOLIDAYS_2026.contains(&date)
    }
}

/// Result of [`should_run`]: whether the orchestrator should proceed, and
/// why (§4.13).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub should_run: bool,
    pub reason: &'static str,
}

/// `ShouldRun(now)` (C13): false on weekends/holidays, true in the
/// "optimal" post-close window, true in the early-morning "acceptable"
/// window, false during market hours. All times are exchange-local
/// (default US/Eastern).
pub fn should_run(now: DateTime<Utc>, calendar: &dyn HolidayCalendar, tz: Tz) -> GateDecision {
    let local = now.with_timezone(&tz);
    let date = local.date_naive();

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return GateDecision {
            should_run: false,
            reason: "weekend",
        };
    }

    if calendar.is_holiday(date) {
        return GateDecision {
            should_run: false,
            reason: "holiday",
        };
    }

    let time = local.time();
    let optimal_start = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
    let optimal_end = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
    let acceptable_end = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let market_start = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let market_end = NaiveTime::from_hms_opt(16, 0, 0).unwrap();

    if time >= optimal_start && time <= optimal_end {
        return GateDecision {
            should_run: true,
            reason: "optimal-window",
        };
    }

    if time >= market_start && time <= market_end {
        return GateDecision {
            should_run: false,
            reason: "market-hours",
        };
    }

    if time.hour() < acceptable_end.hour() || time == acceptable_end {
        return GateDecision {
            should_run: true,
            reason: "acceptable",
        };
    }

    // Between market close (16:00) and the optimal window (18:00), or
    // between acceptable (09:00) and market open (09:30): neither band the
    // spec names explicitly; treat as acceptable rather than blocking a run.
    GateDecision {
        should_run: true,
        reason: "acceptable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct NoHolidays;
    impl HolidayCalendar for NoHolidays {
        fn is_holiday(&self, _date: NaiveDate) -> bool {
            false
        }
    }

    fn eastern_instant(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono_tz::US::Eastern
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn weekend_blocks_run() {
        // 2026-01-03 is a Saturday.
        let now = eastern_instant(2026, 1, 3, 20, 0);
        let decision = should_run(now, &NoHolidays, chrono_tz::US::Eastern);
        assert_eq!(decision.reason, "weekend");
        assert!(!decision.should_run);
    }

    #[test]
    fn holiday_blocks_run() {
        let now = eastern_instant(2026, 1, 1, 20, 0);
        let decision = should_run(now, &NyseCalendar, chrono_tz::US::Eastern);
        assert_eq!(decision.reason, "holiday");
        assert!(!decision.should_run);
    }

    #[test]
    fn market_hours_block_run() {
        // 2026-01-05 is a Monday.
        let now = eastern_instant(2026, 1, 5, 12, 0);
        let decision = should_run(now, &NoHolidays, chrono_tz::US::Eastern);
        assert_eq!(decision.reason, "market-hours");
        assert!(!decision.should_run);
    }

    #[test]
    fn optimal_window_allows_run() {
        let now = eastern_instant(2026, 1, 5, 19, 0);
        let decision = should_run(now, &NoHolidays, chrono_tz::US::Eastern);
        assert_eq!(decision.reason, "optimal-window");
        assert!(decision.should_run);
    }
}
