//! Conditions: composable predicates over time, task history and scheduler
//! state.
//!
//! Leaves that refer to a task carry its name (`None` meaning the task the
//! condition belongs to) and resolve it through the session when observed.

mod display;
mod eval;
pub mod parse;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::log::Action;
use crate::session::Session;
use crate::task::Task;
use crate::time::TimePeriod;

pub use parse::parse;

/// Which records a history condition counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    Started,
    Succeeded,
    Failed,
    Terminated,
    Inacted,
    /// Success, fail or terminate.
    Finished,
}

impl HistoryKind {
    pub fn actions(self) -> &'static [Action] {
        match self {
            Self::Started => &[Action::Run],
            Self::Succeeded => &[Action::Success],
            Self::Failed => &[Action::Fail],
            Self::Terminated => &[Action::Terminate],
            Self::Inacted => &[Action::Inaction],
            Self::Finished => &[Action::Success, Action::Fail, Action::Terminate],
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::Inacted => "inacted",
            Self::Finished => "finished",
        }
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "started" => Some(Self::Started),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "terminated" => Some(Self::Terminated),
            "inacted" => Some(Self::Inacted),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Which outcome of the other task a dependency waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependKind {
    Success,
    Fail,
    /// Success, fail or terminate.
    Finish,
}

impl DependKind {
    pub fn actions(self) -> &'static [Action] {
        match self {
            Self::Success => &[Action::Success],
            Self::Fail => &[Action::Fail],
            Self::Finish => &[Action::Success, Action::Fail, Action::Terminate],
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::Success => "succeeded",
            Self::Fail => "failed",
            Self::Finish => "finished",
        }
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "succeeded" => Some(Self::Success),
            "failed" => Some(Self::Fail),
            "finished" => Some(Self::Finish),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

/// Comparison of a quantitative condition's count against a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Comparison {
    pub op: CmpOp,
    pub value: u64,
}

impl Comparison {
    pub fn new(op: CmpOp, value: u64) -> Self {
        Self { op, value }
    }

    pub fn holds(&self, count: u64) -> bool {
        match self.op {
            CmpOp::Eq => count == self.value,
            CmpOp::Ne => count != self.value,
            CmpOp::Lt => count < self.value,
            CmpOp::Le => count <= self.value,
            CmpOp::Gt => count > self.value,
            CmpOp::Ge => count >= self.value,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.value)
    }
}

type PredicateFn = Arc<dyn Fn(&ObserveContext<'_>) -> bool + Send + Sync>;

/// A user predicate. Compared and printed by name.
#[derive(Clone)]
pub struct FuncCondition {
    pub name: String,
    func: PredicateFn,
}

impl FuncCondition {
    pub fn call(&self, ctx: &ObserveContext<'_>) -> bool {
        (self.func)(ctx)
    }
}

impl PartialEq for FuncCondition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for FuncCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FuncCondition").field(&self.name).finish()
    }
}

/// A predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    AlwaysTrue,
    AlwaysFalse,
    /// Now lies in the period.
    IsPeriod(TimePeriod),
    /// Records of a kind, within `period` when given (all history
    /// otherwise). Without a comparison: at least one.
    TaskHistory {
        kind: HistoryKind,
        task: Option<String>,
        period: Option<TimePeriod>,
        compare: Option<Comparison>,
    },
    /// Open runs, started within `period` when given.
    TaskRunning {
        task: Option<String>,
        period: Option<TimePeriod>,
        compare: Option<Comparison>,
    },
    /// `depend_task` has the outcome after `task` last started.
    Depend {
        kind: DependKind,
        depend_task: String,
        task: Option<String>,
    },
    /// Now is in `period` and the task has neither succeeded, failed more
    /// than `retries` times nor been terminated in it.
    TaskExecutable {
        task: Option<String>,
        period: TimePeriod,
        retries: u32,
    },
    /// Now is in `period` and the task has not started in it.
    TaskRunnable {
        task: Option<String>,
        period: TimePeriod,
    },
    /// The last terminal record is a failure, preceded by at most `n`
    /// consecutive failures.
    Retry { task: Option<String>, n: u32 },
    SchedulerStarted { period: TimePeriod },
    SchedulerCycles { compare: Comparison },
    ParamExists { key: String, value: Option<Value> },
    IsEnv(String),
    Func(FuncCondition),
}

impl Default for Condition {
    fn default() -> Self {
        Self::AlwaysFalse
    }
}

impl Condition {
    // ── Logical ─────────────────────────────────────────────────────────

    /// Conjunction. Nested conjunctions flatten, `true` children drop out
    /// and a `false` child wins.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut flat = Vec::new();
        for cond in conditions {
            match cond {
                Self::All(children) => flat.extend(children),
                Self::AlwaysTrue => {}
                Self::AlwaysFalse => return Self::AlwaysFalse,
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::AlwaysTrue,
            1 => flat.remove(0),
            _ => Self::All(flat),
        }
    }

    /// Disjunction, the mirror image of [`Condition::all`].
    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut flat = Vec::new();
        for cond in conditions {
            match cond {
                Self::Any(children) => flat.extend(children),
                Self::AlwaysFalse => {}
                Self::AlwaysTrue => return Self::AlwaysTrue,
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::AlwaysFalse,
            1 => flat.remove(0),
            _ => Self::Any(flat),
        }
    }

    pub fn negate(cond: Condition) -> Self {
        match cond {
            Self::Not(inner) => *inner,
            Self::AlwaysTrue => Self::AlwaysFalse,
            Self::AlwaysFalse => Self::AlwaysTrue,
            other => Self::Not(Box::new(other)),
        }
    }

    // ── Leaves ──────────────────────────────────────────────────────────

    pub fn is_period(period: impl Into<TimePeriod>) -> Self {
        Self::IsPeriod(period.into())
    }

    pub fn history(kind: HistoryKind, task: impl Into<String>) -> Self {
        Self::TaskHistory {
            kind,
            task: Some(task.into()),
            period: None,
            compare: None,
        }
    }

    pub fn task_started(task: impl Into<String>) -> Self {
        Self::history(HistoryKind::Started, task)
    }

    pub fn task_succeeded(task: impl Into<String>) -> Self {
        Self::history(HistoryKind::Succeeded, task)
    }

    pub fn task_failed(task: impl Into<String>) -> Self {
        Self::history(HistoryKind::Failed, task)
    }

    pub fn task_terminated(task: impl Into<String>) -> Self {
        Self::history(HistoryKind::Terminated, task)
    }

    pub fn task_inacted(task: impl Into<String>) -> Self {
        Self::history(HistoryKind::Inacted, task)
    }

    pub fn task_finished(task: impl Into<String>) -> Self {
        Self::history(HistoryKind::Finished, task)
    }

    pub fn task_running(task: impl Into<String>) -> Self {
        Self::TaskRunning {
            task: Some(task.into()),
            period: None,
            compare: None,
        }
    }

    pub fn depend(kind: DependKind, depend_task: impl Into<String>) -> Self {
        Self::Depend {
            kind,
            depend_task: depend_task.into(),
            task: None,
        }
    }

    pub fn depend_success(depend_task: impl Into<String>) -> Self {
        Self::depend(DependKind::Success, depend_task)
    }

    pub fn depend_fail(depend_task: impl Into<String>) -> Self {
        Self::depend(DependKind::Fail, depend_task)
    }

    pub fn depend_finish(depend_task: impl Into<String>) -> Self {
        Self::depend(DependKind::Finish, depend_task)
    }

    /// Once per occurrence of `period`, retrying failures `retries` times.
    pub fn executable(period: impl Into<TimePeriod>, retries: u32) -> Self {
        Self::TaskExecutable {
            task: None,
            period: period.into(),
            retries,
        }
    }

    pub fn runnable(period: impl Into<TimePeriod>) -> Self {
        Self::TaskRunnable {
            task: None,
            period: period.into(),
        }
    }

    pub fn retry(n: u32) -> Self {
        Self::Retry { task: None, n }
    }

    pub fn scheduler_started(period: impl Into<TimePeriod>) -> Self {
        Self::SchedulerStarted {
            period: period.into(),
        }
    }

    pub fn scheduler_cycles(op: CmpOp, value: u64) -> Self {
        Self::SchedulerCycles {
            compare: Comparison::new(op, value),
        }
    }

    pub fn param_exists(key: impl Into<String>) -> Self {
        Self::ParamExists {
            key: key.into(),
            value: None,
        }
    }

    pub fn param_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::ParamExists {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn is_env(name: impl Into<String>) -> Self {
        Self::IsEnv(name.into())
    }

    pub fn func(
        name: impl Into<String>,
        f: impl Fn(&ObserveContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Func(FuncCondition {
            name: name.into(),
            func: Arc::new(f),
        })
    }

    // ── Modifiers ───────────────────────────────────────────────────────

    /// Restrict a history, running or dependency leaf to `period`, or point
    /// it at another task. Other conditions are returned unchanged.
    pub fn in_period(mut self, new_period: impl Into<TimePeriod>) -> Self {
        match &mut self {
            Self::TaskHistory { period, .. } | Self::TaskRunning { period, .. } => {
                *period = Some(new_period.into());
            }
            Self::TaskExecutable { period, .. } | Self::TaskRunnable { period, .. } => {
                *period = new_period.into();
            }
            _ => {}
        }
        self
    }

    /// Compare the leaf's count instead of testing for any.
    pub fn compare(mut self, op: CmpOp, value: u64) -> Self {
        match &mut self {
            Self::TaskHistory { compare, .. } | Self::TaskRunning { compare, .. } => {
                *compare = Some(Comparison::new(op, value));
            }
            Self::SchedulerCycles { compare } => *compare = Comparison::new(op, value),
            _ => {}
        }
        self
    }

    /// Evaluate a task leaf against `name` instead of the owning task.
    pub fn for_task(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self {
            Self::TaskHistory { task, .. }
            | Self::TaskRunning { task, .. }
            | Self::Depend { task, .. }
            | Self::TaskExecutable { task, .. }
            | Self::TaskRunnable { task, .. }
            | Self::Retry { task, .. } => *task = Some(name),
            _ => {}
        }
        self
    }
}

impl std::ops::BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Self) -> Self::Output {
        Condition::all([self, rhs])
    }
}

impl std::ops::BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Self) -> Self::Output {
        Condition::any([self, rhs])
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Self::Output {
        Condition::negate(self)
    }
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        if value {
            Self::AlwaysTrue
        } else {
            Self::AlwaysFalse
        }
    }
}

impl From<TimePeriod> for Condition {
    fn from(period: TimePeriod) -> Self {
        Self::IsPeriod(period)
    }
}

/// What a condition is observed against.
#[derive(Clone, Copy)]
pub struct ObserveContext<'a> {
    pub session: &'a Session,
    /// The task the condition belongs to, for self-referencing leaves.
    pub task: Option<&'a Task>,
}

impl<'a> ObserveContext<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            task: None,
        }
    }

    pub fn for_task(session: &'a Session, task: &'a Task) -> Self {
        Self {
            session,
            task: Some(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeOfDay;

    #[test]
    fn all_and_any_simplify() {
        let a = Condition::task_started("a");
        let b = Condition::task_failed("b");

        assert_eq!(Condition::all([Condition::AlwaysTrue, a.clone()]), a);
        assert_eq!(
            Condition::any([Condition::AlwaysTrue, a.clone()]),
            Condition::AlwaysTrue
        );
        assert_eq!(
            Condition::all([a.clone(), Condition::AlwaysFalse, b.clone()]),
            Condition::AlwaysFalse
        );
        assert_eq!(Condition::all(Vec::new()), Condition::AlwaysTrue);
        assert_eq!(Condition::any(Vec::new()), Condition::AlwaysFalse);

        let nested = (a.clone() & b.clone()) & a.clone();
        assert_eq!(nested, Condition::All(vec![a.clone(), b.clone(), a.clone()]));
        let nested = a.clone() | (b.clone() | a.clone());
        assert_eq!(nested, Condition::Any(vec![a.clone(), b.clone(), a.clone()]));
    }

    #[test]
    fn negation_simplifies() {
        let a = Condition::task_started("a");
        assert_eq!(!!a.clone(), a);
        assert_eq!(!Condition::AlwaysTrue, Condition::AlwaysFalse);
    }

    #[test]
    fn modifiers_only_touch_matching_leaves() {
        let cond = Condition::task_started("a")
            .in_period(TimeOfDay::full())
            .compare(CmpOp::Ge, 2);
        assert_eq!(
            cond,
            Condition::TaskHistory {
                kind: HistoryKind::Started,
                task: Some("a".to_string()),
                period: Some(TimeOfDay::full()),
                compare: Some(Comparison::new(CmpOp::Ge, 2)),
            }
        );
        assert_eq!(
            Condition::AlwaysTrue.compare(CmpOp::Eq, 1),
            Condition::AlwaysTrue
        );
        assert_eq!(
            Condition::retry(2).for_task("x"),
            Condition::Retry {
                task: Some("x".to_string()),
                n: 2
            }
        );
    }

    #[test]
    fn comparisons() {
        assert!(Comparison::new(CmpOp::Ge, 3).holds(3));
        assert!(!Comparison::new(CmpOp::Gt, 3).holds(3));
        assert!(Comparison::new(CmpOp::Ne, 3).holds(2));
        assert_eq!(CmpOp::from_symbol("<="), Some(CmpOp::Le));
        assert_eq!(Comparison::new(CmpOp::Lt, 4).to_string(), "< 4");
    }

    #[test]
    fn funcs_compare_by_name() {
        let a = Condition::func("weekday", |_| true);
        let b = Condition::func("weekday", |_| false);
        assert_eq!(a, b);
    }
}
