//! The time-period algebra.

use std::fmt;

use chrono::{Duration, NaiveDateTime};

use crate::error::PeriodError;
use crate::time::anchored::AnchoredInterval;
use crate::time::cron::CronPeriod;
use crate::time::delta::{StaticInterval, TimeDelta, TimeSpanDelta, format_duration};
use crate::time::interval::{Closed, Interval, epsilon, shift};

/// Upper bound on retries when searching for a common occurrence.
const MAX_ITERATIONS: usize = 10_000;

pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A repeating or fixed span of time.
///
/// Build compound periods with [`TimePeriod::all`] / [`TimePeriod::any`] (or
/// `&` / `|`), which flatten and simplify their children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    Anchored(AnchoredInterval),
    Delta(TimeDelta),
    SpanDelta(TimeSpanDelta),
    Static(StaticInterval),
    All(Vec<TimePeriod>),
    Any(Vec<TimePeriod>),
    Cron(Box<CronPeriod>),
}

impl TimePeriod {
    pub fn always() -> Self {
        Self::Static(StaticInterval::always())
    }

    pub fn never() -> Self {
        Self::Static(StaticInterval::never())
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Self::Static(s) if s.is_always())
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Self::Static(s) if s.is_never())
    }

    pub fn cron(expression: &str) -> Result<Self, PeriodError> {
        CronPeriod::parse(expression).map(|c| Self::Cron(Box::new(c)))
    }

    pub fn past(duration: Duration) -> Self {
        Self::Delta(TimeDelta::past(duration))
    }

    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self::Static(StaticInterval::new(start, end))
    }

    /// Intersection. `always` children drop out, a `never` child wins, an
    /// empty list is `always` and a single child is returned as is.
    pub fn all(periods: impl IntoIterator<Item = TimePeriod>) -> Self {
        let mut flat = Vec::new();
        for period in periods {
            match period {
                Self::All(children) => flat.extend(children),
                p if p.is_always() => {}
                p => flat.push(p),
            }
        }
        if flat.iter().any(TimePeriod::is_never) {
            return Self::never();
        }
        match flat.len() {
            0 => Self::always(),
            1 => flat.remove(0),
            _ => Self::All(flat),
        }
    }

    /// Union, the mirror image of [`TimePeriod::all`].
    pub fn any(periods: impl IntoIterator<Item = TimePeriod>) -> Self {
        let mut flat = Vec::new();
        for period in periods {
            match period {
                Self::Any(children) => flat.extend(children),
                p if p.is_never() => {}
                p => flat.push(p),
            }
        }
        if flat.iter().any(TimePeriod::is_always) {
            return Self::always();
        }
        match flat.len() {
            0 => Self::never(),
            1 => flat.remove(0),
            _ => Self::Any(flat),
        }
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        match self {
            Self::Anchored(p) => p.contains(t),
            Self::Delta(p) => p.contains(t),
            Self::SpanDelta(p) => p.contains(t),
            Self::Static(p) => p.contains(t),
            Self::All(children) => children.iter().all(|c| c.contains(t)),
            Self::Any(children) => children.iter().any(|c| c.contains(t)),
            Self::Cron(c) => c.period().contains(t),
        }
    }

    /// The occurrence containing `t` (starting at `t`) or the next one.
    pub fn rollforward(&self, t: NaiveDateTime) -> Interval {
        match self {
            Self::Anchored(p) => p.rollforward(t),
            Self::Delta(p) => p.rollforward(t),
            Self::SpanDelta(p) => p.rollforward(t),
            Self::Static(p) => p.rollforward(t),
            Self::All(children) => all_rollforward(children, t),
            Self::Any(children) => any_rollforward(children, t),
            Self::Cron(c) => c.period().rollforward(t),
        }
    }

    /// The occurrence containing `t` (ending at `t`) or the previous one.
    pub fn rollback(&self, t: NaiveDateTime) -> Interval {
        match self {
            Self::Anchored(p) => p.rollback(t),
            Self::Delta(p) => p.rollback(t),
            Self::SpanDelta(p) => p.rollback(t),
            Self::Static(p) => p.rollback(t),
            Self::All(children) => all_rollback(children, t),
            Self::Any(children) => any_rollback(children, t),
            Self::Cron(c) => c.period().rollback(t),
        }
    }

    /// The first occurrence that starts strictly after `t`'s current one.
    pub fn next(&self, t: NaiveDateTime) -> Interval {
        let current = self.rollforward(t);
        if current.is_empty() {
            return current;
        }
        self.rollforward(shift(current.right, epsilon()))
    }

    /// The last occurrence that ends strictly before `t`'s current one.
    pub fn prev(&self, t: NaiveDateTime) -> Interval {
        let current = self.rollback(t);
        if current.is_empty() {
            return current;
        }
        self.rollback(shift(current.left, -epsilon()))
    }
}

fn all_rollforward(children: &[TimePeriod], t: NaiveDateTime) -> Interval {
    let mut cursor = t;
    for _ in 0..MAX_ITERATIONS {
        let intervals: Vec<Interval> = children.iter().map(|c| c.rollforward(cursor)).collect();
        if intervals.iter().any(Interval::is_empty) {
            return Interval::never();
        }
        if let Some(common) = intersect_all(&intervals) {
            return common;
        }
        let latest = intervals
            .iter()
            .map(|i| i.left)
            .max()
            .unwrap_or(NaiveDateTime::MAX);
        let next = latest.max(shift(cursor, epsilon()));
        if next == cursor {
            break;
        }
        cursor = next;
    }
    Interval::never()
}

fn all_rollback(children: &[TimePeriod], t: NaiveDateTime) -> Interval {
    let mut cursor = t;
    for _ in 0..MAX_ITERATIONS {
        let intervals: Vec<Interval> = children.iter().map(|c| c.rollback(cursor)).collect();
        if intervals.iter().any(Interval::is_empty) {
            return Interval::never_before();
        }
        if let Some(common) = intersect_all(&intervals) {
            return common;
        }
        let earliest = intervals
            .iter()
            .map(|i| i.right)
            .min()
            .unwrap_or(NaiveDateTime::MIN);
        let next = earliest.min(shift(cursor, -epsilon()));
        if next == cursor {
            break;
        }
        cursor = next;
    }
    Interval::never_before()
}

fn intersect_all(intervals: &[Interval]) -> Option<Interval> {
    let (first, rest) = intervals.split_first()?;
    rest.iter()
        .try_fold(*first, |common, interval| common.intersection(interval))
}

fn any_rollforward(children: &[TimePeriod], t: NaiveDateTime) -> Interval {
    let candidates = children
        .iter()
        .map(|c| c.rollforward(t))
        .filter(|i| !i.is_empty());
    let Some(mut current) = candidates.reduce(|best, i| {
        match i.left.cmp(&best.left) {
            std::cmp::Ordering::Less => i,
            std::cmp::Ordering::Equal if i.right > best.right => i.with_closure(
                best.closed.includes_left() || i.closed.includes_left(),
                i.closed.includes_right(),
            ),
            std::cmp::Ordering::Equal => best.with_closure(
                best.closed.includes_left() || i.closed.includes_left(),
                best.closed.includes_right(),
            ),
            std::cmp::Ordering::Greater => best,
        }
    }) else {
        return Interval::never();
    };

    // Extend over occurrences that continue right where the union ends.
    for _ in 0..MAX_ITERATIONS {
        let edge = current.right;
        let mut extended = false;
        for child in children {
            let next = child.rollforward(edge);
            if next.is_empty() || !current.reaches(&next) {
                continue;
            }
            if next.right > current.right {
                current = Interval::new(
                    current.left,
                    next.right,
                    Closed::from_sides(
                        current.closed.includes_left(),
                        next.closed.includes_right(),
                    ),
                );
                extended = true;
            }
        }
        if !extended || current.right == NaiveDateTime::MAX {
            break;
        }
    }
    current
}

fn any_rollback(children: &[TimePeriod], t: NaiveDateTime) -> Interval {
    let candidates = children
        .iter()
        .map(|c| c.rollback(t))
        .filter(|i| !i.is_empty());
    let Some(mut current) = candidates.reduce(|best, i| {
        match i.right.cmp(&best.right) {
            std::cmp::Ordering::Greater => i,
            std::cmp::Ordering::Equal if i.left < best.left => i.with_closure(
                i.closed.includes_left(),
                best.closed.includes_right() || i.closed.includes_right(),
            ),
            std::cmp::Ordering::Equal => best.with_closure(
                best.closed.includes_left(),
                best.closed.includes_right() || i.closed.includes_right(),
            ),
            std::cmp::Ordering::Less => best,
        }
    }) else {
        return Interval::never_before();
    };

    for _ in 0..MAX_ITERATIONS {
        let edge = current.left;
        let mut extended = false;
        for child in children {
            let prev = child.rollback(edge);
            if prev.is_empty() || !current.reached_by(&prev) {
                continue;
            }
            if prev.left < current.left {
                current = Interval::new(
                    prev.left,
                    current.right,
                    Closed::from_sides(
                        prev.closed.includes_left(),
                        current.closed.includes_right(),
                    ),
                );
                extended = true;
            }
        }
        if !extended || current.left == NaiveDateTime::MIN {
            break;
        }
    }
    current
}

impl std::ops::BitAnd for TimePeriod {
    type Output = TimePeriod;

    fn bitand(self, rhs: TimePeriod) -> TimePeriod {
        TimePeriod::all([self, rhs])
    }
}

impl std::ops::BitOr for TimePeriod {
    type Output = TimePeriod;

    fn bitor(self, rhs: TimePeriod) -> TimePeriod {
        TimePeriod::any([self, rhs])
    }
}

impl From<AnchoredInterval> for TimePeriod {
    fn from(value: AnchoredInterval) -> Self {
        Self::Anchored(value)
    }
}

impl From<TimeDelta> for TimePeriod {
    fn from(value: TimeDelta) -> Self {
        Self::Delta(value)
    }
}

impl From<StaticInterval> for TimePeriod {
    fn from(value: StaticInterval) -> Self {
        Self::Static(value)
    }
}

/// Qualifier words for an anchored interval: empty for the natural full
/// cycle, otherwise `starting`, `before`, `after` or `between ... and ...`.
pub(crate) fn anchored_qualifier(period: &AnchoredInterval) -> String {
    let scope = period.scope();
    let (start, end) = (period.start(), period.end());
    if start == end {
        if start == 0 {
            String::new()
        } else {
            format!("starting {}", scope.format_anchor(start))
        }
    } else if start == 0 {
        format!("before {}", scope.format_anchor(end))
    } else if end == scope.max_offset() {
        format!("after {}", scope.format_anchor(start))
    } else {
        format!(
            "between {} and {}",
            scope.format_anchor(start),
            scope.format_anchor(end)
        )
    }
}

fn join(f: &mut fmt::Formatter<'_>, name: &str, children: &[TimePeriod]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{child}")?;
    }
    write!(f, ")")
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anchored(p) => {
                let qualifier = anchored_qualifier(p);
                if qualifier.is_empty() {
                    write!(f, "time of {}", p.scope().name())
                } else {
                    write!(f, "time of {} {qualifier}", p.scope().name())
                }
            }
            Self::Delta(d) => {
                let mut parts = Vec::new();
                if d.past > Duration::zero() || d.future == Duration::zero() {
                    parts.push(format!("past {}", format_duration(d.past)));
                }
                if d.future > Duration::zero() {
                    parts.push(format!("future {}", format_duration(d.future)));
                }
                write!(f, "{}", parts.join(" "))?;
                if let Some(reference) = d.reference {
                    write!(f, " around {}", reference.format(DATETIME_FORMAT))?;
                }
                Ok(())
            }
            Self::SpanDelta(d) => {
                write!(
                    f,
                    "span {} to {}",
                    format_duration(d.near),
                    format_duration(d.far)
                )?;
                if let Some(reference) = d.reference {
                    write!(f, " from {}", reference.format(DATETIME_FORMAT))?;
                }
                Ok(())
            }
            Self::Static(s) if s.is_always() => write!(f, "always"),
            Self::Static(s) if s.is_never() => write!(f, "never"),
            Self::Static(s) => write!(
                f,
                "from {} to {}",
                s.start().format(DATETIME_FORMAT),
                s.end().format(DATETIME_FORMAT)
            ),
            Self::All(children) => join(f, "all", children),
            Self::Any(children) => join(f, "any", children),
            Self::Cron(c) => write!(f, "{c}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::anchored::{TimeOfDay, TimeOfMonth, TimeOfWeek};
    use chrono::NaiveDate;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample_points() -> Vec<NaiveDateTime> {
        let mut points = Vec::new();
        for d in 1..=3 {
            for h in [0, 1, 2, 7, 8, 9, 10, 12, 13, 14, 21, 22, 23] {
                for m in [0, 30] {
                    points.push(at(d, h, m));
                }
            }
        }
        points
    }

    fn periods() -> Vec<TimePeriod> {
        vec![
            TimeOfDay::between("10:00", "13:00").unwrap(),
            TimeOfDay::between("22:00", "02:00").unwrap(),
            TimeOfDay::full(),
            TimeOfDay::after("21:00").unwrap() & TimeOfWeek::between("Wed", "Thu 24:00").unwrap(),
            TimeOfDay::between("08:00", "09:00").unwrap()
                | TimeOfDay::between("09:00", "10:00").unwrap(),
            TimePeriod::past(Duration::hours(2)),
            TimePeriod::between(at(1, 8, 0), at(2, 12, 0)),
            TimePeriod::cron("*/30 9-17 * * *").unwrap(),
        ]
    }

    #[test]
    fn membership_agrees_with_rolls() {
        for period in periods() {
            for t in sample_points() {
                let inside = period.contains(t);
                let forward = period.rollforward(t);
                assert_eq!(inside, forward.contains(t), "{period} rollforward at {t}");
                assert_eq!(inside, period.rollback(t).contains(t), "{period} rollback at {t}");
            }
        }
    }

    #[test]
    fn rolls_stay_on_their_side() {
        for period in periods() {
            for t in sample_points() {
                let forward = period.rollforward(t);
                if !forward.is_empty() {
                    assert!(forward.left >= t, "{period} at {t}");
                }
                let back = period.rollback(t);
                if !back.is_empty() {
                    assert!(back.right <= t, "{period} at {t}");
                }
                let next = period.next(t);
                if !next.is_empty() {
                    assert!(next.left > t, "{period} next at {t}");
                }
                let prev = period.prev(t);
                if !prev.is_empty() {
                    assert!(prev.right < t, "{period} prev at {t}");
                }
            }
        }
    }

    #[test]
    fn rollforward_is_idempotent() {
        for period in periods() {
            for t in sample_points() {
                assert_eq!(period.rollforward(t), period.rollforward(t));
            }
        }
    }

    #[test]
    fn all_returns_intersection_when_children_overlap() {
        let period = TimeOfDay::between("10:00", "13:00").unwrap()
            & TimeOfDay::between("12:00", "15:00").unwrap();
        let iv = period.rollforward(at(1, 7, 0));
        assert_eq!((iv.left, iv.right), (at(1, 12, 0), at(1, 13, 0)));
    }

    #[test]
    fn all_rolls_past_disjoint_occurrences() {
        // Wednesday evenings only: 2020-01-01 is a Wednesday.
        let period =
            TimeOfDay::after("21:00").unwrap() & TimeOfWeek::between("Wed", "Wed 24:00").unwrap();
        let iv = period.rollforward(at(2, 12, 0));
        assert_eq!(iv.left, at(8, 21, 0));
    }

    #[test]
    fn any_merges_touching_occurrences() {
        let period = TimeOfDay::between("08:00", "09:00").unwrap()
            | TimeOfDay::between("09:00", "10:00").unwrap();
        let iv = period.rollforward(at(1, 7, 0));
        assert_eq!((iv.left, iv.right), (at(1, 8, 0), at(1, 10, 0)));
        assert_eq!(iv.closed, Closed::Left);
    }

    #[test]
    fn simplification_rules() {
        let day = TimeOfDay::between("10:00", "13:00").unwrap();
        assert_eq!(TimePeriod::any([day.clone()]), day);
        assert_eq!(TimePeriod::all([TimePeriod::always(), day.clone()]), day);
        assert_eq!(TimePeriod::all([TimePeriod::never(), day.clone()]), TimePeriod::never());
        assert_eq!(TimePeriod::any([TimePeriod::always(), day.clone()]), TimePeriod::always());
        assert_eq!(TimePeriod::all(Vec::new()), TimePeriod::always());
        assert_eq!(TimePeriod::any(Vec::new()), TimePeriod::never());

        let nested = TimePeriod::any([
            TimePeriod::any([day.clone(), TimeOfMonth::full()]),
            TimeOfWeek::full(),
        ]);
        let TimePeriod::Any(children) = &nested else {
            panic!("expected Any");
        };
        assert_eq!(children.len(), 3);
        assert_eq!(TimePeriod::any([nested.clone()]), nested);
    }

    #[test]
    fn next_skips_current_occurrence() {
        let period = TimeOfDay::between("10:00", "13:00").unwrap();
        let iv = period.next(at(1, 11, 0));
        assert_eq!((iv.left, iv.right), (at(2, 10, 0), at(2, 13, 0)));
        let iv = period.prev(at(1, 11, 0));
        let dec_31 = NaiveDate::from_ymd_opt(2019, 12, 31).unwrap();
        assert_eq!(iv.left, dec_31.and_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn display_uses_grammar_forms() {
        assert_eq!(
            TimeOfDay::between("10:00", "13:00").unwrap().to_string(),
            "time of day between 10:00 and 13:00"
        );
        assert_eq!(TimeOfDay::full().to_string(), "time of day");
        assert_eq!(TimeOfWeek::after("Fri").unwrap().to_string(), "time of week after Fri");
        assert_eq!(TimeOfDay::before("08:00").unwrap().to_string(), "time of day before 08:00");
        assert_eq!(TimePeriod::past(Duration::hours(2)).to_string(), "past 2 hours");
        assert_eq!(TimePeriod::cron("0 * * * *").unwrap().to_string(), "cron 0 * * * *");
    }
}
