use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use std::sync::Mutex;

/// Source of "now" for everything that depends on the wall clock
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock, used by tests and by replay tooling
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Truncate a timestamp to the start of its hour
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Calendar of the power market: maps UTC instants to local market days.
///
/// Days are computed with a fixed UTC offset. Daylight saving changes are not
/// modelled; the offset is configuration.
#[derive(Debug, Clone, Copy)]
pub struct MarketCalendar {
    offset: FixedOffset,
}

impl MarketCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build a calendar from a whole-hour UTC offset, e.g. `1` for CET
    pub fn from_offset_hours(hours: i32) -> Option<Self> {
        FixedOffset::east_opt(hours * 3600).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local market date of an instant
    pub fn date_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.date_of(clock.now())
    }

    pub fn tomorrow(&self, clock: &dyn Clock) -> NaiveDate {
        self.today(clock) + Duration::days(1)
    }

    /// Local wall-clock time at a given local date, as a UTC instant
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        Utc.from_utc_datetime(&(local - self.offset))
    }

    /// Half-open UTC window `[start, end)` covering one market day
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.at(date, NaiveTime::MIN);
        (start, start + Duration::days(1))
    }

    /// Local `HH:MM` rendering of an instant, used in messages
    pub fn local_hour_label(&self, ts: DateTime<Utc>) -> String {
        ts.with_timezone(&self.offset).format("%H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_truncate_to_hour() {
        let ts = utc("2025-12-21T10:45:12.500Z");
        assert_eq!(truncate_to_hour(ts), utc("2025-12-21T10:00:00Z"));
    }

    #[test]
    fn test_market_day_uses_offset() {
        let calendar = MarketCalendar::from_offset_hours(1).unwrap();
        // 23:30 UTC is already the next day in CET
        assert_eq!(
            calendar.date_of(utc("2025-12-21T23:30:00Z")),
            NaiveDate::from_ymd_opt(2025, 12, 22).unwrap()
        );

        let (start, end) = calendar.day_bounds(NaiveDate::from_ymd_opt(2025, 12, 22).unwrap());
        assert_eq!(start, utc("2025-12-21T23:00:00Z"));
        assert_eq!(end, utc("2025-12-22T23:00:00Z"));
    }

    #[test]
    fn test_fixed_clock_advance() {
        let clock = FixedClock::new(utc("2025-12-21T10:00:00Z"));
        clock.advance(Duration::hours(15));
        assert_eq!(clock.now(), utc("2025-12-22T01:00:00Z"));

        let calendar = MarketCalendar::from_offset_hours(1).unwrap();
        assert_eq!(calendar.local_hour_label(clock.now()), "02:00");
        assert_eq!(calendar.today(&clock), NaiveDate::from_ymd_opt(2025, 12, 22).unwrap());
    }
}
