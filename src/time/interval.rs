//! Intervals on the session timeline.

use std::fmt;

use chrono::{Duration, NaiveDateTime};

/// Canonical resolution of the timeline.
pub fn epsilon() -> Duration {
    Duration::microseconds(1)
}

/// Shift `t` by `d`, saturating at the ends of the representable range.
pub(crate) fn shift(t: NaiveDateTime, d: Duration) -> NaiveDateTime {
    t.checked_add_signed(d).unwrap_or(if d < Duration::zero() {
        NaiveDateTime::MIN
    } else {
        NaiveDateTime::MAX
    })
}

/// Which edges of an interval belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Closed {
    Left,
    Right,
    Both,
    Neither,
}

impl Closed {
    pub(crate) fn from_sides(left: bool, right: bool) -> Self {
        match (left, right) {
            (true, true) => Self::Both,
            (true, false) => Self::Left,
            (false, true) => Self::Right,
            (false, false) => Self::Neither,
        }
    }

    pub fn includes_left(self) -> bool {
        matches!(self, Self::Left | Self::Both)
    }

    pub fn includes_right(self) -> bool {
        matches!(self, Self::Right | Self::Both)
    }
}

/// A span of time with explicit edge closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub left: NaiveDateTime,
    pub right: NaiveDateTime,
    pub closed: Closed,
}

impl Interval {
    pub fn new(left: NaiveDateTime, right: NaiveDateTime, closed: Closed) -> Self {
        Self {
            left,
            right,
            closed,
        }
    }

    /// `[left, right)`, or a single point when both edges coincide.
    pub fn closed_left(left: NaiveDateTime, right: NaiveDateTime) -> Self {
        let closed = if left == right {
            Closed::Both
        } else {
            Closed::Left
        };
        Self::new(left, right, closed)
    }

    /// `(left, right]`, or a single point when both edges coincide.
    pub fn closed_right(left: NaiveDateTime, right: NaiveDateTime) -> Self {
        let closed = if left == right {
            Closed::Both
        } else {
            Closed::Right
        };
        Self::new(left, right, closed)
    }

    pub fn point(t: NaiveDateTime) -> Self {
        Self::new(t, t, Closed::Both)
    }

    /// The whole timeline.
    pub fn always() -> Self {
        Self::new(NaiveDateTime::MIN, NaiveDateTime::MAX, Closed::Both)
    }

    /// No future occurrence: zero width at the end of time.
    pub fn never() -> Self {
        Self::new(NaiveDateTime::MAX, NaiveDateTime::MAX, Closed::Neither)
    }

    /// No past occurrence: zero width at the start of time.
    pub fn never_before() -> Self {
        Self::new(NaiveDateTime::MIN, NaiveDateTime::MIN, Closed::Neither)
    }

    /// The same span with both edges included. Empty intervals stay empty.
    pub fn closed_both(self) -> Self {
        if self.is_empty() {
            self
        } else {
            Self::new(self.left, self.right, Closed::Both)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left > self.right || (self.left == self.right && self.closed != Closed::Both)
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        let after_left = if self.closed.includes_left() {
            t >= self.left
        } else {
            t > self.left
        };
        let before_right = if self.closed.includes_right() {
            t <= self.right
        } else {
            t < self.right
        };
        after_left && before_right
    }

    /// Common part of two intervals, if they share at least one point.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let (left, left_closed) = match self.left.cmp(&other.left) {
            std::cmp::Ordering::Greater => (self.left, self.closed.includes_left()),
            std::cmp::Ordering::Less => (other.left, other.closed.includes_left()),
            std::cmp::Ordering::Equal => (
                self.left,
                self.closed.includes_left() && other.closed.includes_left(),
            ),
        };
        let (right, right_closed) = match self.right.cmp(&other.right) {
            std::cmp::Ordering::Less => (self.right, self.closed.includes_right()),
            std::cmp::Ordering::Greater => (other.right, other.closed.includes_right()),
            std::cmp::Ordering::Equal => (
                self.right,
                self.closed.includes_right() && other.closed.includes_right(),
            ),
        };
        let interval = Interval::new(left, right, Closed::from_sides(left_closed, right_closed));
        (!interval.is_empty()).then_some(interval)
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.intersection(other).is_some()
    }

    /// Whether `other` starts inside this interval or right at its end.
    pub(crate) fn reaches(&self, other: &Interval) -> bool {
        other.left < self.right
            || (other.left == self.right
                && (self.closed.includes_right() || other.closed.includes_left()))
    }

    /// Whether `other` ends inside this interval or right at its start.
    pub(crate) fn reached_by(&self, other: &Interval) -> bool {
        other.right > self.left
            || (other.right == self.left
                && (self.closed.includes_left() || other.closed.includes_right()))
    }

    pub fn duration(&self) -> Duration {
        self.right.signed_duration_since(self.left)
    }

    pub(crate) fn with_closure(self, left: bool, right: bool) -> Self {
        Self::new(self.left, self.right, Closed::from_sides(left, right))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.closed.includes_left() { '[' } else { '(' };
        let close = if self.closed.includes_right() { ']' } else { ')' };
        write!(f, "{open}{}, {}{close}", self.left, self.right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn closed_left_excludes_right_edge() {
        let iv = Interval::closed_left(at(10, 0), at(13, 0));
        assert!(iv.contains(at(10, 0)));
        assert!(iv.contains(at(12, 59)));
        assert!(!iv.contains(at(13, 0)));
        assert_eq!(iv.closed, Closed::Left);
    }

    #[test]
    fn single_point_is_closed_both() {
        let iv = Interval::closed_left(at(10, 0), at(10, 0));
        assert_eq!(iv.closed, Closed::Both);
        assert!(!iv.is_empty());
        assert!(iv.contains(at(10, 0)));
    }

    #[test]
    fn closing_both_edges_keeps_empty_intervals_empty() {
        let iv = Interval::closed_right(at(10, 0), at(13, 0)).closed_both();
        assert!(iv.contains(at(10, 0)));
        assert!(iv.contains(at(13, 0)));
        assert!(Interval::never().closed_both().is_empty());
        assert!(Interval::never_before().closed_both().is_empty());
    }

    #[test]
    fn never_is_empty() {
        assert!(Interval::never().is_empty());
        assert!(Interval::never_before().is_empty());
        assert!(!Interval::always().is_empty());
    }

    #[test]
    fn touching_half_open_intervals_do_not_overlap() {
        let a = Interval::closed_left(at(8, 0), at(9, 0));
        let b = Interval::closed_left(at(9, 0), at(10, 0));
        assert!(!a.overlaps(&b));
        assert!(a.reaches(&b));
    }

    #[test]
    fn closed_edges_overlap_at_a_point() {
        let a = Interval::new(at(8, 0), at(9, 0), Closed::Both);
        let b = Interval::closed_left(at(9, 0), at(10, 0));
        assert_eq!(a.intersection(&b), Some(Interval::point(at(9, 0))));
    }

    #[test]
    fn intersection_takes_inner_edges() {
        let a = Interval::closed_left(at(8, 0), at(12, 0));
        let b = Interval::closed_left(at(10, 0), at(14, 0));
        let i = a.intersection(&b).unwrap();
        assert_eq!(i.left, at(10, 0));
        assert_eq!(i.right, at(12, 0));
        assert_eq!(i.closed, Closed::Left);
    }

    #[test]
    fn shift_saturates() {
        assert_eq!(shift(NaiveDateTime::MAX, epsilon()), NaiveDateTime::MAX);
        assert_eq!(shift(NaiveDateTime::MIN, -epsilon()), NaiveDateTime::MIN);
    }
}
