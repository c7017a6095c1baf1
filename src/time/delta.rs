//! Sliding and fixed windows: `TimeDelta`, `TimeSpanDelta`, `StaticInterval`.

use std::sync::LazyLock;

use chrono::{Duration, NaiveDateTime};
use regex::Regex;

use crate::time::interval::{Closed, Interval, shift};

/// Window of `past` before and `future` after a reference point.
///
/// Without an explicit reference the window floats: it is anchored at
/// whatever point is being evaluated, so `past 2 hours` rolled back from
/// `t` is `[t - 2h, t]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeDelta {
    pub past: Duration,
    pub future: Duration,
    pub reference: Option<NaiveDateTime>,
}

impl TimeDelta {
    pub fn new(past: Duration, future: Duration) -> Self {
        Self {
            past,
            future,
            reference: None,
        }
    }

    pub fn past(past: Duration) -> Self {
        Self::new(past, Duration::zero())
    }

    pub fn future(future: Duration) -> Self {
        Self::new(Duration::zero(), future)
    }

    pub fn with_reference(mut self, reference: NaiveDateTime) -> Self {
        self.reference = Some(reference);
        self
    }

    fn window(&self, t: NaiveDateTime) -> Interval {
        let base = self.reference.unwrap_or(t);
        Interval::new(shift(base, -self.past), shift(base, self.future), Closed::Both)
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.window(t).contains(t)
    }

    pub fn rollforward(&self, t: NaiveDateTime) -> Interval {
        clip_forward(self.window(t), t)
    }

    pub fn rollback(&self, t: NaiveDateTime) -> Interval {
        clip_back(self.window(t), t)
    }
}

/// Span `[reference + near, reference + far]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeSpanDelta {
    pub near: Duration,
    pub far: Duration,
    pub reference: Option<NaiveDateTime>,
}

impl TimeSpanDelta {
    pub fn new(near: Duration, far: Duration) -> Self {
        Self {
            near,
            far,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: NaiveDateTime) -> Self {
        self.reference = Some(reference);
        self
    }

    fn window(&self, t: NaiveDateTime) -> Interval {
        let base = self.reference.unwrap_or(t);
        Interval::new(shift(base, self.near), shift(base, self.far), Closed::Both)
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.window(t).contains(t)
    }

    pub fn rollforward(&self, t: NaiveDateTime) -> Interval {
        clip_forward(self.window(t), t)
    }

    pub fn rollback(&self, t: NaiveDateTime) -> Interval {
        clip_back(self.window(t), t)
    }
}

/// Fixed absolute window, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticInterval(Interval);

impl StaticInterval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self(Interval::new(start, end, Closed::Both))
    }

    pub fn always() -> Self {
        Self(Interval::always())
    }

    pub fn never() -> Self {
        Self(Interval::never())
    }

    pub fn start(&self) -> NaiveDateTime {
        self.0.left
    }

    pub fn end(&self) -> NaiveDateTime {
        self.0.right
    }

    pub fn is_always(&self) -> bool {
        self.0 == Interval::always()
    }

    pub fn is_never(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.0.contains(t)
    }

    pub fn rollforward(&self, t: NaiveDateTime) -> Interval {
        clip_forward(self.0, t)
    }

    pub fn rollback(&self, t: NaiveDateTime) -> Interval {
        clip_back(self.0, t)
    }
}

fn clip_forward(window: Interval, t: NaiveDateTime) -> Interval {
    window
        .intersection(&Interval::new(t, NaiveDateTime::MAX, Closed::Both))
        .unwrap_or_else(Interval::never)
}

fn clip_back(window: Interval, t: NaiveDateTime) -> Interval {
    window
        .intersection(&Interval::new(NaiveDateTime::MIN, t, Closed::Both))
        .unwrap_or_else(Interval::never_before)
}

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+)\s*([a-z]+)\s*(?:,|and\b)?").expect("duration regex is valid")
});

const UNITS: [(&str, i64); 7] = [
    ("week", 7 * 24 * 3600 * 1_000_000),
    ("day", 24 * 3600 * 1_000_000),
    ("hour", 3600 * 1_000_000),
    ("minute", 60 * 1_000_000),
    ("second", 1_000_000),
    ("millisecond", 1_000),
    ("microsecond", 1),
];

fn unit_micros(unit: &str) -> Option<i64> {
    let unit = unit.to_ascii_lowercase();
    let canonical = match unit.as_str() {
        "w" | "week" | "weeks" => "week",
        "d" | "day" | "days" => "day",
        "h" | "hr" | "hrs" | "hour" | "hours" => "hour",
        "m" | "min" | "mins" | "minute" | "minutes" => "minute",
        "s" | "sec" | "secs" | "second" | "seconds" => "second",
        "ms" | "millisecond" | "milliseconds" => "millisecond",
        "us" | "microsecond" | "microseconds" => "microsecond",
        _ => return None,
    };
    UNITS
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, micros)| *micros)
}

/// Parse a duration written as a sum of parts: `10 minutes`,
/// `1 hour 30 minutes`, `2h`, `1d 12h`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut rest = input.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total = 0i64;
    while !rest.is_empty() {
        let caps = DURATION_PART.captures(rest)?;
        let value: i64 = caps[1].parse().ok()?;
        let micros = unit_micros(&caps[2])?;
        total = total.checked_add(value.checked_mul(micros)?)?;
        rest = rest[caps[0].len()..].trim_start();
    }
    Some(Duration::microseconds(total))
}

/// Inverse of [`parse_duration`]: the largest units first, zero parts omitted.
pub fn format_duration(duration: Duration) -> String {
    let mut remaining = duration.num_microseconds().unwrap_or(i64::MAX);
    if remaining == 0 {
        return "0 seconds".to_string();
    }
    let mut parts = Vec::new();
    for (name, micros) in UNITS {
        let count = remaining / micros;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            parts.push(format!("{count} {name}{plural}"));
            remaining -= count * micros;
        }
    }
    parts.join(" ")
}
