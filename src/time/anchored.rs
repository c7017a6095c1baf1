//! Anchored cyclic intervals: "time of day between 10:00 and 13:00" and friends.
//!
//! An anchored interval is a pair of microsecond offsets into a repeating
//! cycle (its [`Scope`]). Offsets for second through week scopes are linear
//! distances from the cycle start. Month offsets are `(day - 1) * 1d + time`
//! capped at 31 days, and year offsets are `(month - 1) * 31d + month offset`,
//! so the same anchor means the same calendar position in every cycle even
//! though months differ in length. Positions past the end of a short month
//! clamp to the start of the next month.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::PeriodError;
use crate::time::interval::{Closed, Interval, shift};
use crate::time::period::TimePeriod;

pub(crate) const SECOND: i64 = 1_000_000;
pub(crate) const MINUTE: i64 = 60 * SECOND;
pub(crate) const HOUR: i64 = 60 * MINUTE;
pub(crate) const DAY: i64 = 24 * HOUR;
pub(crate) const WEEK: i64 = 7 * DAY;
pub(crate) const MONTH: i64 = 31 * DAY;
pub(crate) const YEAR: i64 = 12 * MONTH;

const DAY_UNITS: [i64; 3] = [HOUR, MINUTE, SECOND];

/// Cycles an occurrence search may walk before giving up.
const MAX_CYCLES: usize = 16;

pub(crate) const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];
pub(crate) const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Length of the repeating cycle of an anchored interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::default())
}

fn micros(d: Duration) -> i64 {
    d.num_microseconds().unwrap_or(i64::MAX)
}

impl Scope {
    pub fn name(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "second" => Some(Self::Second),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    /// Largest valid offset, i.e. the (maximal) cycle length in microseconds.
    pub fn max_offset(self) -> i64 {
        match self {
            Self::Second => SECOND,
            Self::Minute => MINUTE,
            Self::Hour => HOUR,
            Self::Day => DAY,
            Self::Week => WEEK,
            Self::Month => MONTH,
            Self::Year => YEAR,
        }
    }

    /// Span covered by [`AnchoredInterval::at`].
    pub(crate) fn unit(self) -> i64 {
        match self {
            Self::Second => 1_000,
            Self::Minute => SECOND,
            Self::Hour => MINUTE,
            Self::Day => HOUR,
            Self::Week | Self::Month => DAY,
            Self::Year => MONTH,
        }
    }

    /// Start of the cycle containing `t`.
    pub fn cycle_start(self, t: NaiveDateTime) -> NaiveDateTime {
        let nanos = Duration::nanoseconds(i64::from(t.nanosecond() % 1_000_000_000));
        let seconds = Duration::seconds(i64::from(t.second()));
        let minutes = Duration::minutes(i64::from(t.minute()));
        match self {
            Self::Second => shift(t, -nanos),
            Self::Minute => shift(t, -(nanos + seconds)),
            Self::Hour => shift(t, -(nanos + seconds + minutes)),
            Self::Day => midnight(t.date()),
            Self::Week => {
                let back = u64::from(t.weekday().num_days_from_monday());
                t.date()
                    .checked_sub_days(chrono::Days::new(back))
                    .map(midnight)
                    .unwrap_or(NaiveDateTime::MIN)
            }
            Self::Month => t
                .date()
                .with_day(1)
                .map(midnight)
                .unwrap_or(NaiveDateTime::MIN),
            Self::Year => NaiveDate::from_ymd_opt(t.year(), 1, 1)
                .map(midnight)
                .unwrap_or(NaiveDateTime::MIN),
        }
    }

    /// Start of the cycle following the one starting at `cycle`.
    pub fn next_cycle(self, cycle: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Month => cycle
                .date()
                .checked_add_months(Months::new(1))
                .map(midnight)
                .unwrap_or(NaiveDateTime::MAX),
            Self::Year => cycle
                .date()
                .checked_add_months(Months::new(12))
                .map(midnight)
                .unwrap_or(NaiveDateTime::MAX),
            _ => shift(cycle, Duration::microseconds(self.max_offset())),
        }
    }

    /// Start of the cycle preceding the one starting at `cycle`.
    pub fn prev_cycle(self, cycle: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Month => cycle
                .date()
                .checked_sub_months(Months::new(1))
                .map(midnight)
                .unwrap_or(NaiveDateTime::MIN),
            Self::Year => cycle
                .date()
                .checked_sub_months(Months::new(12))
                .map(midnight)
                .unwrap_or(NaiveDateTime::MIN),
            _ => shift(cycle, Duration::microseconds(-self.max_offset())),
        }
    }

    /// Offset of `t` within its own cycle.
    pub fn project(self, t: NaiveDateTime) -> i64 {
        match self {
            Self::Year => {
                let month_start = Self::Month.cycle_start(t);
                i64::from(t.month0()) * MONTH + micros(t - month_start)
            }
            _ => micros(t - self.cycle_start(t)),
        }
    }

    /// Concrete datetime of `offset` within the cycle starting at `cycle`.
    pub fn at_offset(self, cycle: NaiveDateTime, offset: i64) -> NaiveDateTime {
        match self {
            Self::Year => {
                let month = offset / MONTH;
                if month >= 12 {
                    return self.next_cycle(cycle);
                }
                let month_start = cycle
                    .date()
                    .checked_add_months(Months::new(month as u32))
                    .map(midnight)
                    .unwrap_or(NaiveDateTime::MAX);
                Self::Month.at_offset(month_start, offset - month * MONTH)
            }
            Self::Month => shift(cycle, Duration::microseconds(offset)).min(self.next_cycle(cycle)),
            _ => shift(cycle, Duration::microseconds(offset)),
        }
    }

    /// Parse an anchor string into an offset of this scope.
    ///
    /// Accepted forms: `SS[.ffffff]` (second, minute), `MM[:SS]` (hour),
    /// `HH[:MM[:SS]]` (day), `<weekday> [HH:MM]` (week), `<day> [HH:MM]`
    /// (month) and `<month> [<day> [HH:MM]]` (year).
    pub fn parse_anchor(self, anchor: &str) -> Result<i64, PeriodError> {
        let anchor = anchor.trim();
        let invalid = |reason: &str| PeriodError::InvalidAnchor {
            scope: self.name().to_string(),
            value: anchor.to_string(),
            reason: reason.to_string(),
        };
        let offset = match self {
            Self::Second | Self::Minute => parse_clock(anchor, &[SECOND]).map_err(|r| invalid(&r))?,
            Self::Hour => parse_clock(anchor, &[MINUTE, SECOND]).map_err(|r| invalid(&r))?,
            Self::Day => parse_clock(anchor, &DAY_UNITS).map_err(|r| invalid(&r))?,
            Self::Week => {
                let (day, rest) = split_word(anchor);
                let index = name_index(day, &WEEKDAYS, &WEEKDAY_NAMES)
                    .ok_or_else(|| invalid("unknown weekday"))?;
                let time = match rest {
                    Some(rest) => parse_clock(rest, &DAY_UNITS).map_err(|r| invalid(&r))?,
                    None => 0,
                };
                index as i64 * DAY + time
            }
            Self::Month => {
                let (day, rest) = split_word(anchor);
                let digits = day.trim_end_matches(|c: char| c.is_ascii_alphabetic());
                let day: i64 = digits
                    .parse()
                    .map_err(|_| invalid("expected a day of month"))?;
                if !(1..=31).contains(&day) {
                    return Err(invalid("day of month must be within 1-31"));
                }
                let time = match rest {
                    Some(rest) => parse_clock(rest, &DAY_UNITS).map_err(|r| invalid(&r))?,
                    None => 0,
                };
                (day - 1) * DAY + time
            }
            Self::Year => {
                let (month, rest) = split_word(anchor);
                let index = name_index(month, &MONTHS, &MONTH_NAMES)
                    .ok_or_else(|| invalid("unknown month"))?;
                let within = match rest {
                    Some(rest) => Self::Month.parse_anchor(rest)?,
                    None => 0,
                };
                index as i64 * MONTH + within
            }
        };
        if !(0..=self.max_offset()).contains(&offset) {
            return Err(PeriodError::OffsetOutOfRange {
                scope: self.name().to_string(),
                offset,
                max: self.max_offset(),
            });
        }
        Ok(offset)
    }

    /// Inverse of [`Scope::parse_anchor`].
    pub fn format_anchor(self, offset: i64) -> String {
        match self {
            Self::Second | Self::Minute => format_clock(offset, &[SECOND]),
            Self::Hour => format_clock(offset, &[MINUTE, SECOND]),
            Self::Day => format_clock(offset, &DAY_UNITS),
            Self::Week => {
                let index = (offset / DAY).min(6);
                let rest = offset - index * DAY;
                with_rest(WEEKDAYS[index as usize].to_string(), rest, |r| {
                    format_clock(r, &DAY_UNITS)
                })
            }
            Self::Month => {
                let index = (offset / DAY).min(30);
                let rest = offset - index * DAY;
                with_rest((index + 1).to_string(), rest, |r| format_clock(r, &DAY_UNITS))
            }
            Self::Year => {
                let index = (offset / MONTH).min(11);
                let rest = offset - index * MONTH;
                with_rest(MONTHS[index as usize].to_string(), rest, |r| {
                    Self::Month.format_anchor(r)
                })
            }
        }
    }
}

fn with_rest(head: String, rest: i64, fmt: impl Fn(i64) -> String) -> String {
    if rest == 0 {
        head
    } else {
        format!("{head} {}", fmt(rest))
    }
}

fn split_word(s: &str) -> (&str, Option<&str>) {
    match s.split_once(char::is_whitespace) {
        Some((head, rest)) if !rest.trim().is_empty() => (head, Some(rest.trim())),
        Some((head, _)) => (head, None),
        None => (s, None),
    }
}

fn name_index(word: &str, short: &[&str], long: &[&str]) -> Option<usize> {
    let word = word.to_ascii_lowercase();
    short
        .iter()
        .position(|s| s.to_ascii_lowercase() == word)
        .or_else(|| long.iter().position(|l| *l == word))
}

/// Parse `a[:b[:c]]` where each part is weighted by `units`; the seconds
/// part may carry up to six fractional digits.
fn parse_clock(s: &str, units: &[i64]) -> Result<i64, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.is_empty() || parts.len() > units.len() {
        return Err(format!("expected at most {} ':'-separated parts", units.len()));
    }
    let mut total = 0i64;
    for (part, unit) in parts.iter().zip(units) {
        let (whole, fraction) = match part.split_once('.') {
            Some((whole, fraction)) if *unit == SECOND => (whole, Some(fraction)),
            Some(_) => return Err("fractions are only allowed on seconds".to_string()),
            None => (*part, None),
        };
        let value: i64 = whole
            .trim()
            .parse()
            .map_err(|_| format!("'{part}' is not a number"))?;
        if value < 0 {
            return Err("negative anchors are not allowed".to_string());
        }
        total += value * unit;
        if let Some(fraction) = fraction {
            if fraction.is_empty()
                || fraction.len() > 6
                || !fraction.chars().all(|c| c.is_ascii_digit())
            {
                return Err(format!("invalid fraction '{fraction}'"));
            }
            let padded = format!("{fraction:0<6}");
            total += padded.parse::<i64>().map_err(|e| e.to_string())?;
        }
    }
    Ok(total)
}

fn format_clock(offset: i64, units: &[i64]) -> String {
    let mut values = Vec::with_capacity(units.len());
    for (i, unit) in units.iter().enumerate() {
        let value = if i == 0 {
            offset / unit
        } else {
            (offset % units[i - 1]) / unit
        };
        values.push(value);
    }
    let micros = offset % SECOND;
    let shown = units.len().min(2);
    let mut out = values[..shown]
        .iter()
        .map(|v| format!("{v:02}"))
        .collect::<Vec<_>>()
        .join(":");
    for value in &values[shown..] {
        if *value != 0 || micros != 0 {
            out.push_str(&format!(":{value:02}"));
        }
    }
    if micros != 0 {
        out.push_str(&format!(".{micros:06}"));
    }
    out
}

/// A repeating interval within a scope, e.g. 22:00 to 02:00 every day.
///
/// `start < end` is a plain interval, `start > end` wraps across the cycle
/// boundary and `start == end` covers the full cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchoredInterval {
    scope: Scope,
    start: i64,
    end: i64,
}

impl AnchoredInterval {
    pub fn new(scope: Scope, start: i64, end: i64) -> Result<Self, PeriodError> {
        for offset in [start, end] {
            if !(0..=scope.max_offset()).contains(&offset) {
                return Err(PeriodError::OffsetOutOfRange {
                    scope: scope.name().to_string(),
                    offset,
                    max: scope.max_offset(),
                });
            }
        }
        Ok(Self { scope, start, end })
    }

    /// The whole cycle.
    pub fn full(scope: Scope) -> Self {
        Self {
            scope,
            start: 0,
            end: 0,
        }
    }

    pub fn between(scope: Scope, start: &str, end: &str) -> Result<Self, PeriodError> {
        Self::new(scope, scope.parse_anchor(start)?, scope.parse_anchor(end)?)
    }

    /// A full cycle that begins at `anchor` instead of the natural cycle start.
    pub fn starting(scope: Scope, anchor: &str) -> Result<Self, PeriodError> {
        let offset = scope.parse_anchor(anchor)?;
        Self::new(scope, offset, offset)
    }

    pub fn after(scope: Scope, anchor: &str) -> Result<Self, PeriodError> {
        Self::new(scope, scope.parse_anchor(anchor)?, scope.max_offset())
    }

    pub fn before(scope: Scope, anchor: &str) -> Result<Self, PeriodError> {
        Self::new(scope, 0, scope.parse_anchor(anchor)?)
    }

    /// One sub-unit of the scope starting at `anchor` (an hour of a day,
    /// a minute of an hour, a day of a week, ...). The end is the last
    /// microsecond of that unit.
    pub fn at(scope: Scope, anchor: &str) -> Result<Self, PeriodError> {
        let start = scope.parse_anchor(anchor)?;
        let end = (start + scope.unit() - 1).min(scope.max_offset());
        if end <= start {
            return Err(PeriodError::InvalidAnchor {
                scope: scope.name().to_string(),
                value: anchor.to_string(),
                reason: "no room for a whole unit after the anchor".to_string(),
            });
        }
        Self::new(scope, start, end)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn is_full(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        if self.is_full() {
            return true;
        }
        let p = self.scope.project(t);
        if self.start < self.end {
            self.start <= p && p <= self.end
        } else {
            p >= self.start || p <= self.end
        }
    }

    /// The occurrence that begins in the cycle starting at `cycle`.
    fn occurrence(&self, cycle: NaiveDateTime) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let begin = self.scope.at_offset(cycle, self.start);
        let finish = if self.start < self.end {
            self.scope.at_offset(cycle, self.end)
        } else {
            self.scope.at_offset(self.scope.next_cycle(cycle), self.end)
        };
        (begin < finish).then_some((begin, finish))
    }

    pub fn rollforward(&self, t: NaiveDateTime) -> Interval {
        let mut cycle = self.scope.prev_cycle(self.scope.cycle_start(t));
        let mut ends_at_t = false;
        for _ in 0..MAX_CYCLES {
            if let Some((begin, finish)) = self.occurrence(cycle) {
                if ends_at_t {
                    return if begin <= t {
                        Interval::closed_left(t, finish)
                    } else {
                        Interval::point(t)
                    };
                }
                if finish > t {
                    return Interval::closed_left(begin.max(t), finish);
                }
                if finish == t && self.contains(t) {
                    ends_at_t = true;
                }
            }
            let next = self.scope.next_cycle(cycle);
            if next <= cycle {
                break;
            }
            cycle = next;
        }
        if ends_at_t {
            Interval::point(t)
        } else {
            Interval::never()
        }
    }

    pub fn rollback(&self, t: NaiveDateTime) -> Interval {
        let mut cycle = self.scope.next_cycle(self.scope.cycle_start(t));
        let mut begins_at_t = false;
        for _ in 0..MAX_CYCLES {
            if let Some((begin, finish)) = self.occurrence(cycle) {
                if begins_at_t {
                    return if finish >= t {
                        Interval::closed_right(begin, t)
                    } else {
                        Interval::point(t)
                    };
                }
                if begin < t {
                    if finish > t || (finish == t && self.contains(t)) {
                        return Interval::closed_right(begin, t);
                    }
                    // A finish that projects onto the next cycle's start is
                    // not part of the period.
                    return if self.contains(finish) {
                        Interval::closed_right(begin, finish)
                    } else {
                        Interval::new(begin, finish, Closed::Neither)
                    };
                }
                if begin == t {
                    begins_at_t = true;
                }
            }
            let prev = self.scope.prev_cycle(cycle);
            if prev >= cycle {
                break;
            }
            cycle = prev;
        }
        if begins_at_t {
            Interval::point(t)
        } else {
            Interval::never_before()
        }
    }
}

macro_rules! time_of {
    ($(#[$doc:meta])* $name:ident, $scope:expr) => {
        $(#[$doc])*
        pub struct $name;

        impl $name {
            pub fn full() -> TimePeriod {
                TimePeriod::Anchored(AnchoredInterval::full($scope))
            }

            pub fn between(start: &str, end: &str) -> Result<TimePeriod, PeriodError> {
                AnchoredInterval::between($scope, start, end).map(TimePeriod::Anchored)
            }

            pub fn starting(anchor: &str) -> Result<TimePeriod, PeriodError> {
                AnchoredInterval::starting($scope, anchor).map(TimePeriod::Anchored)
            }

            pub fn after(anchor: &str) -> Result<TimePeriod, PeriodError> {
                AnchoredInterval::after($scope, anchor).map(TimePeriod::Anchored)
            }

            pub fn before(anchor: &str) -> Result<TimePeriod, PeriodError> {
                AnchoredInterval::before($scope, anchor).map(TimePeriod::Anchored)
            }

            pub fn at(anchor: &str) -> Result<TimePeriod, PeriodError> {
                AnchoredInterval::at($scope, anchor).map(TimePeriod::Anchored)
            }
        }
    };
}

time_of!(
    /// Anchors within a second (`"0.25"` is a quarter second in).
    TimeOfSecond,
    Scope::Second
);
time_of!(
    /// Anchors within a minute (`"30"` is the 30th second).
    TimeOfMinute,
    Scope::Minute
);
time_of!(
    /// Anchors within an hour (`"15:00"` is quarter past).
    TimeOfHour,
    Scope::Hour
);
time_of!(
    /// Anchors within a day (`"10:00"`).
    TimeOfDay,
    Scope::Day
);
time_of!(
    /// Anchors within a week (`"Mon"`, `"Fri 17:00"`).
    TimeOfWeek,
    Scope::Week
);
time_of!(
    /// Anchors within a month (`"1"`, `"15th 12:00"`).
    TimeOfMonth,
    Scope::Month
);
time_of!(
    /// Anchors within a year (`"Jan"`, `"Dec 24"`).
    TimeOfYear,
    Scope::Year
);
