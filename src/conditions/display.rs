//! Printing conditions in the string grammar accepted by
//! [`parse`](crate::conditions::parse).

use std::fmt;

use chrono::Duration;

use crate::conditions::{CmpOp, Comparison, Condition, HistoryKind};
use crate::time::period::anchored_qualifier;
use crate::time::{Scope, TimePeriod, format_duration};

pub(super) const ADVERBS: [(Scope, &str); 7] = [
    (Scope::Second, "secondly"),
    (Scope::Minute, "minutely"),
    (Scope::Hour, "hourly"),
    (Scope::Day, "daily"),
    (Scope::Week, "weekly"),
    (Scope::Month, "monthly"),
    (Scope::Year, "yearly"),
];

fn adverb(scope: Scope) -> &'static str {
    ADVERBS
        .iter()
        .find(|(s, _)| *s == scope)
        .map_or("daily", |(_, name)| *name)
}

/// Quote a task or parameter name, preferring single quotes.
pub(super) fn quote(name: &str) -> String {
    if name.contains('\'') {
        format!("\"{name}\"")
    } else {
        format!("'{name}'")
    }
}

struct Subject<'a>(&'a Option<String>);

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(name) => write!(f, "task {} ", quote(name)),
            None => Ok(()),
        }
    }
}

struct Suffix<'a>(&'a Option<TimePeriod>, &'a Option<Comparison>);

impl fmt::Display for Suffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(period) = self.0 {
            write!(f, " {period}")?;
        }
        if let Some(compare) = self.1 {
            write!(f, " {compare}")?;
        }
        Ok(())
    }
}

/// `every <duration>` shape: no started (or outcome) in a floating past
/// window.
fn every_window(
    kind: HistoryKind,
    task: &Option<String>,
    period: &Option<TimePeriod>,
    compare: &Option<Comparison>,
) -> Option<(Duration, &'static str)> {
    let suffix = match kind {
        HistoryKind::Started => "",
        HistoryKind::Succeeded => " based success",
        HistoryKind::Failed => " based fail",
        HistoryKind::Finished => " based finish",
        _ => return None,
    };
    let Some(TimePeriod::Delta(delta)) = period else {
        return None;
    };
    let never = Some(Comparison::new(CmpOp::Eq, 0));
    (task.is_none()
        && *compare == never
        && delta.reference.is_none()
        && delta.future == Duration::zero()
        && delta.past > Duration::zero())
    .then_some((delta.past, suffix))
}

fn child(f: &mut fmt::Formatter<'_>, cond: &Condition) -> fmt::Result {
    match cond {
        Condition::All(_) | Condition::Any(_) => write!(f, "({cond})"),
        _ => write!(f, "{cond}"),
    }
}

fn join(f: &mut fmt::Formatter<'_>, children: &[Condition], op: &str) -> fmt::Result {
    for (i, cond) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        child(f, cond)?;
    }
    Ok(())
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All(children) if children.is_empty() => write!(f, "true"),
            Self::Any(children) if children.is_empty() => write!(f, "false"),
            Self::All(children) => join(f, children, "&"),
            Self::Any(children) => join(f, children, "|"),
            Self::Not(inner) => {
                write!(f, "~")?;
                child(f, inner)
            }
            Self::AlwaysTrue => write!(f, "true"),
            Self::AlwaysFalse => write!(f, "false"),
            Self::IsPeriod(period @ TimePeriod::Anchored(_)) => write!(f, "{period}"),
            Self::IsPeriod(period) => write!(f, "time in {period}"),
            Self::TaskHistory {
                kind,
                task,
                period,
                compare,
            } => match every_window(*kind, task, period, compare) {
                Some((past, suffix)) => write!(f, "every {}{suffix}", format_duration(past)),
                None => write!(
                    f,
                    "{}has {}{}",
                    Subject(task),
                    kind.verb(),
                    Suffix(period, compare)
                ),
            },
            Self::TaskRunning {
                task,
                period,
                compare,
            } => write!(f, "{}is running{}", Subject(task), Suffix(period, compare)),
            Self::Depend {
                kind,
                depend_task,
                task,
            } => write!(
                f,
                "{}after task {} {}",
                Subject(task),
                quote(depend_task),
                kind.verb()
            ),
            Self::TaskExecutable {
                task: None,
                period: TimePeriod::Anchored(anchored),
                retries: 0,
            } => {
                let qualifier = anchored_qualifier(anchored);
                write!(f, "{}", adverb(anchored.scope()))?;
                if !qualifier.is_empty() {
                    write!(f, " {qualifier}")?;
                }
                Ok(())
            }
            Self::TaskExecutable {
                task,
                period,
                retries,
            } => {
                write!(f, "{}is executable {period}", Subject(task))?;
                if *retries > 0 {
                    write!(f, " with {retries} retries")?;
                }
                Ok(())
            }
            Self::TaskRunnable {
                task: None,
                period: period @ TimePeriod::Cron(_),
            } => write!(f, "{period}"),
            Self::TaskRunnable { task, period } => {
                write!(f, "{}is runnable {period}", Subject(task))
            }
            Self::Retry { task, n } => write!(f, "{}retry {n}", Subject(task)),
            Self::SchedulerStarted { period } => write!(f, "scheduler started {period}"),
            Self::SchedulerCycles { compare } => match compare.op {
                CmpOp::Gt => write!(f, "scheduler has more than {} cycles", compare.value),
                CmpOp::Lt => write!(f, "scheduler has less than {} cycles", compare.value),
                _ => write!(f, "scheduler cycles {compare}"),
            },
            Self::ParamExists { key, value: None } => write!(f, "param {} exists", quote(key)),
            Self::ParamExists {
                key,
                value: Some(value),
            } => write!(f, "param {} is {value}", quote(key)),
            Self::IsEnv(name) => write!(f, "env {}", quote(name)),
            Self::Func(func) => write!(f, "func {}", quote(&func.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{TimeDelta, TimeOfDay, TimeOfWeek};

    #[test]
    fn prints_leaves() {
        assert_eq!(Condition::task_succeeded("a").to_string(), "task 'a' has succeeded");
        assert_eq!(
            Condition::task_started("a")
                .in_period(TimeOfDay::full())
                .compare(CmpOp::Ge, 2)
                .to_string(),
            "task 'a' has started time of day >= 2"
        );
        assert_eq!(
            Condition::depend_finish("it's").to_string(),
            "after task \"it's\" finished"
        );
        assert_eq!(
            Condition::depend_fail("a").for_task("b").to_string(),
            "task 'b' after task 'a' failed"
        );
        assert_eq!(
            Condition::scheduler_cycles(CmpOp::Gt, 3).to_string(),
            "scheduler has more than 3 cycles"
        );
        assert_eq!(
            Condition::scheduler_cycles(CmpOp::Ge, 3).to_string(),
            "scheduler cycles >= 3"
        );
        assert_eq!(
            Condition::param_equals("mode", "fast").to_string(),
            "param 'mode' is \"fast\""
        );
        assert_eq!(Condition::retry(2).to_string(), "retry 2");
    }

    #[test]
    fn prints_schedule_shorthands() {
        assert_eq!(
            Condition::executable(TimeOfDay::full(), 0).to_string(),
            "daily"
        );
        assert_eq!(
            Condition::executable(TimeOfWeek::between("Tue", "Fri").unwrap(), 0).to_string(),
            "weekly between Tue and Fri"
        );
        assert_eq!(
            Condition::executable(TimeOfDay::after("10:00").unwrap(), 2).to_string(),
            "is executable time of day after 10:00 with 2 retries"
        );
        assert_eq!(
            Condition::runnable(TimePeriod::cron("*/15 * * * *").unwrap()).to_string(),
            "cron */15 * * * *"
        );

        let every = Condition::TaskHistory {
            kind: HistoryKind::Succeeded,
            task: None,
            period: Some(TimeDelta::past(Duration::minutes(10)).into()),
            compare: Some(Comparison::new(CmpOp::Eq, 0)),
        };
        assert_eq!(every.to_string(), "every 10 minutes based success");
    }

    #[test]
    fn parenthesizes_nested_operators() {
        let a = Condition::task_started("a");
        let b = Condition::task_failed("b");
        let c = Condition::is_env("prod");
        let cond = (a.clone() | b.clone()) & !c.clone();
        assert_eq!(
            cond.to_string(),
            "(task 'a' has started | task 'b' has failed) & ~env 'prod'"
        );
        assert_eq!(
            (!(a & b)).to_string(),
            "~(task 'a' has started & task 'b' has failed)"
        );
        assert_eq!(
            Condition::is_period(TimeOfDay::before("12:00").unwrap()).to_string(),
            "time of day before 12:00"
        );
        assert_eq!(
            Condition::is_period(TimePeriod::always()).to_string(),
            "time in always"
        );
    }
}
