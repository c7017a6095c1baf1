//! Time period behaviour checked through the public API.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tickwork::TimePeriod;
use tickwork::time::{Closed, TimeOfDay, TimeOfHour, TimeOfMinute};

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

#[test]
fn anchored_interval_rolls_forward_to_next_occurrence() {
    let period = TimeOfDay::between("10:00", "13:00").unwrap();
    let interval = period.rollforward(at(7, 0));
    assert_eq!(interval.left, at(10, 0));
    assert_eq!(interval.right, at(13, 0));
    assert_eq!(interval.closed, Closed::Left);

    // Inside an occurrence the interval starts at the reference point.
    let inside = period.rollforward(at(11, 30));
    assert_eq!(inside.left, at(11, 30));
    assert_eq!(inside.right, at(13, 0));
}

#[test]
fn wrap_around_interval_membership() {
    let period = TimeOfDay::between("22:00", "02:00").unwrap();
    assert!(period.contains(at(0, 0)));
    assert!(period.contains(at(23, 15)));
    assert!(!period.contains(at(3, 0)));
    assert!(!period.contains(at(21, 59)));
}

#[test]
fn cron_matches_its_anchored_expansion() {
    let cron = TimePeriod::cron("*/15 * * * *").unwrap();
    let anchored = TimePeriod::any(
        ["00:00", "15:00", "30:00", "45:00"]
            .into_iter()
            .map(|anchor| TimeOfHour::at(anchor).unwrap()),
    ) & TimeOfMinute::full();

    let mut t = at(9, 50);
    while t < at(12, 10) {
        assert_eq!(cron.contains(t), anchored.contains(t), "membership differs at {t}");
        t += Duration::seconds(20);
    }

    for t in [at(9, 50), at(10, 7), at(10, 44), at(11, 59)] {
        assert_eq!(
            cron.rollforward(t).left,
            anchored.rollforward(t).left,
            "next occurrence differs from {t}"
        );
    }
    assert_eq!(cron.rollforward(at(10, 7)).left, at(10, 15));
}

#[test]
fn past_delta_follows_the_reference_time() {
    let period = TimePeriod::past(Duration::minutes(30));
    assert!(period.contains(at(12, 0)));
    let interval = period.rollback(at(12, 0));
    assert_eq!(interval.left, at(11, 30));
    assert_eq!(interval.right, at(12, 0));
}

#[test]
fn intersection_and_union_of_daily_windows() {
    let morning = TimeOfDay::between("08:00", "12:00").unwrap();
    let late = TimeOfDay::after("10:00").unwrap();

    let both = morning.clone() & late.clone();
    assert!(both.contains(at(11, 0)));
    assert!(!both.contains(at(9, 0)));

    let either = morning | late;
    assert!(either.contains(at(9, 0)));
    assert!(either.contains(at(20, 0)));
    assert!(!either.contains(at(7, 0)));
}
