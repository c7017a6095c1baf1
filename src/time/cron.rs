//! Cron expressions translated into anchored periods.
//!
//! Each restricted field becomes an `Any` of anchored intervals in the
//! matching scope (minute → time of hour, hour → time of day, day of month
//! → time of month, month → time of year, day of week → time of week) and
//! the fields are intersected. Consecutive values are merged into a single
//! interval ending on the last microsecond of its final value. As in
//! classic cron, day-of-month and day-of-week are OR-ed when
//! both are restricted.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::PeriodError;
use crate::time::anchored::{AnchoredInterval, DAY, HOUR, MINUTE, MONTH, Scope};
use crate::time::period::TimePeriod;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A cron expression and the period it expands to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CronPeriod {
    expression: String,
    expanded: TimePeriod,
}

impl CronPeriod {
    pub fn parse(expression: &str) -> Result<Self, PeriodError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let invalid = |reason: String| PeriodError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(invalid(format!("expected 5 fields, got {}", fields.len())));
        };

        let minutes = parse_field(minute, 0, 59, &[], 0).map_err(&invalid)?;
        let hours = parse_field(hour, 0, 23, &[], 0).map_err(&invalid)?;
        let days = parse_field(dom, 1, 31, &[], 0).map_err(&invalid)?;
        let months = parse_field(month, 1, 12, &MONTH_NAMES, 1).map_err(&invalid)?;
        let weekdays = parse_field(dow, 0, 7, &DOW_NAMES, 0)
            .map_err(&invalid)?
            .map(|set| set.into_iter().map(|d| (d + 6) % 7).collect::<BTreeSet<_>>());

        let mut parts = Vec::new();
        if let Some(values) = minutes {
            parts.push(spans(Scope::Hour, &values, MINUTE, 0)?);
        }
        if let Some(values) = hours {
            parts.push(spans(Scope::Day, &values, HOUR, 0)?);
        }
        let by_dom = days
            .map(|values| spans(Scope::Month, &values, DAY, 1))
            .transpose()?;
        let by_dow = weekdays
            .map(|values| spans(Scope::Week, &values, DAY, 0))
            .transpose()?;
        match (by_dom, by_dow) {
            (Some(a), Some(b)) => parts.push(TimePeriod::any([a, b])),
            (Some(a), None) | (None, Some(a)) => parts.push(a),
            (None, None) => {}
        }
        if let Some(values) = months {
            parts.push(spans(Scope::Year, &values, MONTH, 1)?);
        }

        Ok(Self {
            expression: fields.join(" "),
            expanded: TimePeriod::all(parts),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn period(&self) -> &TimePeriod {
        &self.expanded
    }
}

impl fmt::Display for CronPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cron {}", self.expression)
    }
}

/// `Any` of one interval per run of consecutive values.
fn spans(
    scope: Scope,
    values: &BTreeSet<u32>,
    unit: i64,
    first: u32,
) -> Result<TimePeriod, PeriodError> {
    let mut periods = Vec::new();
    let mut iter = values.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        let from = i64::from(start - first) * unit;
        let to = (i64::from(end - first + 1) * unit - 1).min(scope.max_offset());
        periods.push(TimePeriod::Anchored(AnchoredInterval::new(scope, from, to)?));
    }
    Ok(TimePeriod::any(periods))
}

/// Values selected by a field, `None` when the field is `*`.
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: &[&str],
    name_base: u32,
) -> Result<Option<BTreeSet<u32>>, String> {
    if field == "*" {
        return Ok(None);
    }
    let value = |s: &str| -> Result<u32, String> {
        let lower = s.to_ascii_lowercase();
        if let Some(i) = names.iter().position(|n| *n == lower) {
            return Ok(i as u32 + name_base);
        }
        s.parse::<u32>()
            .map_err(|_| format!("'{s}' is not a valid value"))
    };

    let mut selected = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}'"))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a)?, value(b)?)
        } else {
            let v = value(range)?;
            if step.is_some() { (v, max) } else { (v, v) }
        };
        if lo < min || hi > max || lo > hi {
            return Err(format!("'{part}' is outside {min}-{max}"));
        }
        selected.extend((lo..=hi).step_by(step.unwrap_or(1) as usize));
    }
    Ok(Some(selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::anchored::{TimeOfHour, TimeOfWeek};
    use chrono::{NaiveDate, NaiveDateTime};

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn every_fifteen_minutes_is_four_minute_slots() {
        let cron = CronPeriod::parse("*/15 * * * *").unwrap();
        let expected = TimePeriod::any([
            TimeOfHour::at("00:00").unwrap(),
            TimeOfHour::at("15:00").unwrap(),
            TimeOfHour::at("30:00").unwrap(),
            TimeOfHour::at("45:00").unwrap(),
        ]);
        assert_eq!(cron.period(), &expected);
    }

    #[test]
    fn all_stars_is_always() {
        let cron = CronPeriod::parse("* * * * *").unwrap();
        assert_eq!(cron.period(), &TimePeriod::always());
    }

    #[test]
    fn ranges_merge_and_intersect() {
        let cron = CronPeriod::parse("0 9-17 * * mon-fri").unwrap();
        // Wednesday 2020-01-01
        assert!(cron.period().contains(dt(2020, 1, 1, 9, 0)));
        assert!(!cron.period().contains(dt(2020, 1, 1, 9, 30)));
        assert!(!cron.period().contains(dt(2020, 1, 4, 9, 0)));
        let next = cron.period().rollforward(dt(2020, 1, 3, 18, 0));
        assert_eq!(next.left, dt(2020, 1, 6, 9, 0));
    }

    #[test]
    fn sunday_is_zero_or_seven() {
        let zero = CronPeriod::parse("* * * * 0").unwrap();
        let seven = CronPeriod::parse("* * * * 7").unwrap();
        assert_eq!(zero.period(), seven.period());
        assert_eq!(zero.period(), &TimeOfWeek::at("Sun").unwrap());
    }

    #[test]
    fn day_fields_are_ored() {
        let cron = CronPeriod::parse("* * 1 * mon").unwrap();
        // 2020-01-01 is the 1st (a Wednesday), 2020-01-06 a Monday.
        assert!(cron.period().contains(dt(2020, 1, 1, 12, 0)));
        assert!(cron.period().contains(dt(2020, 1, 6, 12, 0)));
        assert!(!cron.period().contains(dt(2020, 1, 7, 12, 0)));
    }

    #[test]
    fn invalid_expressions() {
        assert!(CronPeriod::parse("* * * *").is_err());
        assert!(CronPeriod::parse("61 * * * *").is_err());
        assert!(CronPeriod::parse("*/0 * * * *").is_err());
        assert!(CronPeriod::parse("* * * foo *").is_err());
    }
}
