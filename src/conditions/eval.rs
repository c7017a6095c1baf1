//! Observing conditions.

use std::ops::Deref;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::conditions::{Condition, ObserveContext};
use crate::error::ConditionError;
use crate::log::{Action, LogFilter, LogRecord};
use crate::task::Task;
use crate::time::{Interval, TimePeriod};

/// A task resolved for one observation.
enum TaskRef<'a> {
    Context(&'a Task),
    Session(Arc<Task>),
}

impl Deref for TaskRef<'_> {
    type Target = Task;

    fn deref(&self) -> &Task {
        match self {
            Self::Context(task) => task,
            Self::Session(task) => task,
        }
    }
}

impl<'a> ObserveContext<'a> {
    pub fn now(&self) -> NaiveDateTime {
        self.session.now()
    }

    fn resolve(&self, name: Option<&str>, cond: &Condition) -> Result<TaskRef<'a>, ConditionError> {
        match (name, self.task) {
            (Some(name), Some(task)) if task.name() == name => Ok(TaskRef::Context(task)),
            (Some(name), _) => self
                .session
                .get_task(name)
                .map(TaskRef::Session)
                .ok_or_else(|| ConditionError::UnknownTask {
                    name: name.to_string(),
                }),
            (None, Some(task)) => Ok(TaskRef::Context(task)),
            (None, None) => Err(ConditionError::MissingTask {
                condition: cond.to_string(),
            }),
        }
    }

    fn from_logs(&self) -> bool {
        self.session.config().force_status_from_logs
    }

    fn records(&self, task: &Task, actions: &[Action]) -> Result<Vec<LogRecord>, ConditionError> {
        let filter = LogFilter::new()
            .task(task.name())
            .actions(actions.iter().copied());
        Ok(self.session.repository().query(&filter)?)
    }

    /// Records of `actions` created inside `window` (anywhere without one).
    fn count(
        &self,
        task: &Task,
        actions: &[Action],
        window: Option<&Interval>,
    ) -> Result<u64, ConditionError> {
        let Some(window) = window else {
            let filter = LogFilter::new()
                .task(task.name())
                .actions(actions.iter().copied());
            return Ok(self.session.repository().count(&filter)? as u64);
        };
        if window.is_empty() {
            return Ok(0);
        }
        let filter = LogFilter::new()
            .task(task.name())
            .actions(actions.iter().copied())
            .created_between(window.left, window.right);
        let records = self.session.repository().query(&filter)?;
        Ok(records.iter().filter(|r| window.contains(r.created)).count() as u64)
    }

    /// Whether any record of `actions` lies inside `window`, answered from
    /// the status cache when that is exact.
    fn any_in(
        &self,
        task: &Task,
        actions: &[Action],
        window: Option<&Interval>,
    ) -> Result<bool, ConditionError> {
        if !self.from_logs() {
            let last = task.cache().last_of(actions);
            match window {
                None => return Ok(last.is_some()),
                Some(w) if w.right >= self.now() => {
                    return Ok(last.is_some_and(|t| w.contains(t)));
                }
                Some(_) => {}
            }
        }
        Ok(self.count(task, actions, window)? > 0)
    }

    fn last(
        &self,
        task: &Task,
        actions: &[Action],
    ) -> Result<Option<NaiveDateTime>, ConditionError> {
        if !self.from_logs() {
            return Ok(task.cache().last_of(actions));
        }
        Ok(self
            .records(task, actions)?
            .iter()
            .map(|r| r.created)
            .max())
    }

    /// Open runs, started inside `window` when given.
    fn running(&self, task: &Task, window: Option<&Interval>) -> Result<u64, ConditionError> {
        if !self.from_logs() {
            let starts = task.run_starts();
            return Ok(match window {
                None => starts.len(),
                Some(w) => starts.iter().filter(|t| w.contains(**t)).count(),
            } as u64);
        }
        let records = self.records(task, &Action::ALL)?;
        let mut open: Vec<&LogRecord> = Vec::new();
        for record in &records {
            if record.action == Action::Run {
                open.push(record);
            } else {
                open.retain(|r| r.run_id != record.run_id);
            }
        }
        Ok(open
            .iter()
            .filter(|r| window.is_none_or(|w| w.contains(r.created)))
            .count() as u64)
    }
}

/// The occurrence of `period` up to `now`, including its start: a record
/// created on the first instant of an occurrence belongs to it.
fn counting_window(period: &TimePeriod, now: NaiveDateTime) -> Interval {
    period.rollback(now).closed_both()
}

fn window(period: Option<&TimePeriod>, now: NaiveDateTime) -> Option<Interval> {
    period.map(|p| counting_window(p, now))
}

impl Condition {
    /// Evaluate the condition.
    pub fn observe(&self, ctx: &ObserveContext<'_>) -> Result<bool, ConditionError> {
        match self {
            Self::All(children) => {
                for child in children {
                    if !child.observe(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(children) => {
                for child in children {
                    if child.observe(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(child) => Ok(!child.observe(ctx)?),
            Self::AlwaysTrue => Ok(true),
            Self::AlwaysFalse => Ok(false),
            Self::IsPeriod(period) => Ok(period.contains(ctx.now())),
            Self::TaskHistory {
                kind,
                task,
                period,
                compare,
            } => {
                let task = ctx.resolve(task.as_deref(), self)?;
                let window = window(period.as_ref(), ctx.now());
                match compare {
                    Some(cmp) => Ok(cmp.holds(ctx.count(&task, kind.actions(), window.as_ref())?)),
                    None => ctx.any_in(&task, kind.actions(), window.as_ref()),
                }
            }
            Self::TaskRunning {
                task,
                period,
                compare,
            } => {
                let task = ctx.resolve(task.as_deref(), self)?;
                let window = window(period.as_ref(), ctx.now());
                let count = ctx.running(&task, window.as_ref())?;
                Ok(compare.map_or(count > 0, |cmp| cmp.holds(count)))
            }
            Self::Depend {
                kind,
                depend_task,
                task,
            } => {
                let depend = ctx.resolve(Some(depend_task.as_str()), self)?;
                let task = ctx.resolve(task.as_deref(), self)?;
                let Some(finished) = ctx.last(&depend, kind.actions())? else {
                    return Ok(false);
                };
                Ok(ctx
                    .last(&task, &[Action::Run])?
                    .is_none_or(|started| finished > started))
            }
            Self::TaskExecutable {
                task,
                period,
                retries,
            } => {
                let now = ctx.now();
                if !period.contains(now) {
                    return Ok(false);
                }
                let task = ctx.resolve(task.as_deref(), self)?;
                let window = counting_window(period, now);
                if ctx.any_in(&task, &[Action::Success], Some(&window))?
                    || ctx.any_in(&task, &[Action::Terminate], Some(&window))?
                {
                    return Ok(false);
                }
                let failures = ctx.count(&task, &[Action::Fail], Some(&window))?;
                Ok(failures <= u64::from(*retries))
            }
            Self::TaskRunnable { task, period } => {
                let now = ctx.now();
                if !period.contains(now) {
                    return Ok(false);
                }
                let task = ctx.resolve(task.as_deref(), self)?;
                let window = counting_window(period, now);
                Ok(!ctx.any_in(&task, &[Action::Run], Some(&window))?)
            }
            Self::Retry { task, n } => {
                let task = ctx.resolve(task.as_deref(), self)?;
                let terminal: Vec<Action> = Action::ALL
                    .into_iter()
                    .filter(|a| a.is_terminal())
                    .collect();
                let records = ctx.records(&task, &terminal)?;
                let trailing = records
                    .iter()
                    .rev()
                    .take_while(|r| r.action == Action::Fail)
                    .count() as u64;
                Ok(trailing > 0 && trailing <= u64::from(*n))
            }
            Self::SchedulerStarted { period } => Ok(ctx
                .session
                .started_at()
                .is_some_and(|started| counting_window(period, ctx.now()).contains(started))),
            Self::SchedulerCycles { compare } => Ok(compare.holds(ctx.session.cycles())),
            Self::ParamExists { key, value } => Ok(match ctx.session.parameter(key) {
                None => false,
                Some(actual) => value.as_ref().is_none_or(|expected| *expected == actual),
            }),
            Self::IsEnv(name) => Ok(ctx.session.config().env.as_deref() == Some(name.as_str())),
            Self::Func(func) => Ok(func.call(ctx)),
        }
    }

    /// The count a quantitative leaf compares, `None` for other conditions.
    pub fn observe_count(&self, ctx: &ObserveContext<'_>) -> Result<Option<u64>, ConditionError> {
        match self {
            Self::TaskHistory {
                kind, task, period, ..
            } => {
                let task = ctx.resolve(task.as_deref(), self)?;
                let window = window(period.as_ref(), ctx.now());
                Ok(Some(ctx.count(&task, kind.actions(), window.as_ref())?))
            }
            Self::TaskRunning { task, period, .. } => {
                let task = ctx.resolve(task.as_deref(), self)?;
                let window = window(period.as_ref(), ctx.now());
                Ok(Some(ctx.running(&task, window.as_ref())?))
            }
            Self::SchedulerCycles { .. } => Ok(Some(ctx.session.cycles())),
            _ => Ok(None),
        }
    }
}
