//! Printing a parsed condition yields a string that parses back to the
//! same condition.

use tickwork::{CmpOp, Condition, TimeOfDay, parse};

const PHRASES: &[&str] = &[
    "true",
    "false",
    "task 'a' has succeeded",
    "task 'a' has started time of day >= 2",
    "has finished past 2 hours",
    "task 'a' is running > 1",
    "every 10 minutes",
    "every 10 minutes based fail",
    "after task 'a' finished",
    "task 'b' after task \"it's\" failed",
    "daily",
    "daily between 10:00 and 12:00",
    "time of week after Fri 17:00",
    "cron */15 * * * *",
    "task 'a' is executable this week with 2 retries",
    "retry 3",
    "scheduler has more than 3 cycles",
    "scheduler cycles <= 3",
    "scheduler started past 1 hour",
    "param 'mode' exists",
    "param 'mode' is fast",
    "env 'prod'",
    "(task 'a' has started | task 'b' has failed) & ~env 'prod'",
    "~(daily | hourly)",
];

#[test]
fn printed_conditions_parse_back() {
    for phrase in PHRASES {
        let cond = parse(phrase).unwrap_or_else(|e| panic!("{phrase}: {e}"));
        let printed = cond.to_string();
        let reparsed = parse(&printed).unwrap_or_else(|e| panic!("{printed}: {e}"));
        assert_eq!(reparsed, cond, "{phrase} printed as {printed}");
    }
}

#[test]
fn built_conditions_print_as_phrases() {
    let cond = Condition::task_succeeded("fetch").in_period(TimeOfDay::full())
        & !Condition::task_running("report");
    let printed = cond.to_string();
    assert_eq!(
        printed,
        "task 'fetch' has succeeded time of day & ~task 'report' is running"
    );
    assert_eq!(printed.parse::<Condition>().unwrap(), cond);

    let cycles = Condition::scheduler_cycles(CmpOp::Lt, 5);
    assert_eq!(cycles.to_string(), "scheduler has less than 5 cycles");
    assert_eq!(parse(&cycles.to_string()).unwrap(), cycles);
}

#[test]
fn parse_errors_point_at_the_input() {
    let err = parse("task 'a' has started & (").unwrap_err();
    assert!(!err.to_string().is_empty());
    assert!(parse("sometimes").is_err());
    assert!(parse("task 'a has started").is_err());
}
