//! The task definition and its builder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::conditions::Condition;
use crate::config::Execution;
use crate::log::Action;
use crate::task::body::{Parameters, TaskFn};
use crate::task::run::TaskRun;
use crate::task::status::{StatusCache, TaskStatus};

/// Mutable per-task state, guarded by one std mutex so record appends,
/// the cache and the run stack change together.
#[derive(Debug, Default)]
pub(crate) struct TaskState {
    pub cache: StatusCache,
    pub runs: Vec<TaskRun>,
}

/// A unit of work plus the conditions that govern it.
///
/// Built with [`Task::new`] and the `with_*` methods, then registered with
/// [`Session::add_task`](crate::session::Session::add_task).
#[derive(Debug)]
pub struct Task {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) start_cond: Condition,
    pub(crate) end_cond: Condition,
    /// Terminate live runs once this turns false.
    pub(crate) run_cond: Option<Condition>,
    /// Falls back to the session default when unset.
    pub(crate) execution: Option<Execution>,
    pub(crate) priority: i32,
    pub(crate) disabled: AtomicBool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) parameters: Parameters,
    pub(crate) multilaunch: bool,
    pub(crate) on_startup: bool,
    pub(crate) on_shutdown: bool,
    /// Exempt from timeouts.
    pub(crate) permanent: bool,
    /// Parameter names the body takes; `None` passes everything.
    pub(crate) accepts: Option<Vec<String>>,
    pub(crate) force_run: AtomicBool,
    pub(crate) force_termination: AtomicBool,
    pub(crate) body: TaskFn,
    pub(crate) state: Mutex<TaskState>,
    /// Serializes launch, draining and termination.
    pub(crate) lock: tokio::sync::Mutex<()>,
}

impl Task {
    pub fn new(name: impl Into<String>, body: TaskFn) -> Self {
        Self {
            name: name.into(),
            description: None,
            start_cond: Condition::AlwaysFalse,
            end_cond: Condition::AlwaysFalse,
            run_cond: None,
            execution: None,
            priority: 0,
            disabled: AtomicBool::new(false),
            timeout: None,
            parameters: Parameters::new(),
            multilaunch: false,
            on_startup: false,
            on_shutdown: false,
            permanent: false,
            accepts: None,
            force_run: AtomicBool::new(false),
            force_termination: AtomicBool::new(false),
            body,
            state: Mutex::new(TaskState::default()),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    // ── Builder ─────────────────────────────────────────────────────────

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_start_cond(mut self, cond: impl Into<Condition>) -> Self {
        self.start_cond = cond.into();
        self
    }

    pub fn with_end_cond(mut self, cond: impl Into<Condition>) -> Self {
        self.end_cond = cond.into();
        self
    }

    pub fn with_run_cond(mut self, cond: impl Into<Condition>) -> Self {
        self.run_cond = Some(cond.into());
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_disabled(self, disabled: bool) -> Self {
        self.disabled.store(disabled, Ordering::SeqCst);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_multilaunch(mut self, multilaunch: bool) -> Self {
        self.multilaunch = multilaunch;
        self
    }

    /// Run once when the scheduler starts instead of in cycles. An unset
    /// start condition becomes `true`.
    pub fn on_startup(mut self) -> Self {
        self.on_startup = true;
        self.default_start_to_true();
        self
    }

    /// Run once when the scheduler shuts down instead of in cycles. An unset
    /// start condition becomes `true`.
    pub fn on_shutdown(mut self) -> Self {
        self.on_shutdown = true;
        self.default_start_to_true();
        self
    }

    fn default_start_to_true(&mut self) {
        if self.start_cond == Condition::AlwaysFalse {
            self.start_cond = Condition::AlwaysTrue;
        }
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn with_accepts(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.accepts = Some(names.into_iter().map(Into::into).collect());
        self
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn start_cond(&self) -> &Condition {
        &self.start_cond
    }

    pub fn end_cond(&self) -> &Condition {
        &self.end_cond
    }

    pub fn run_cond(&self) -> Option<&Condition> {
        self.run_cond.as_ref()
    }

    pub fn execution(&self) -> Option<Execution> {
        self.execution
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn is_multilaunch(&self) -> bool {
        self.multilaunch
    }

    pub fn is_startup(&self) -> bool {
        self.on_startup
    }

    pub fn is_shutdown(&self) -> bool {
        self.on_shutdown
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn body(&self) -> &TaskFn {
        &self.body
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Launch on the next cycle regardless of `start_cond` or `disabled`.
    pub fn force_run(&self) {
        self.force_run.store(true, Ordering::SeqCst);
    }

    pub fn is_force_run(&self) -> bool {
        self.force_run.load(Ordering::SeqCst)
    }

    /// Terminate every live run on the next cycle.
    pub fn force_termination(&self) {
        self.force_termination.store(true, Ordering::SeqCst);
    }

    // ── Status ──────────────────────────────────────────────────────────

    pub(crate) fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> TaskStatus {
        self.state().cache.status
    }

    /// Snapshot of the last lifecycle times.
    pub fn cache(&self) -> StatusCache {
        self.state().cache.clone()
    }

    pub fn last_run(&self) -> Option<NaiveDateTime> {
        self.state().cache.last_run
    }

    pub fn last_success(&self) -> Option<NaiveDateTime> {
        self.state().cache.last_success
    }

    pub fn last_fail(&self) -> Option<NaiveDateTime> {
        self.state().cache.last_fail
    }

    pub fn last_terminate(&self) -> Option<NaiveDateTime> {
        self.state().cache.last_terminate
    }

    pub fn last_inaction(&self) -> Option<NaiveDateTime> {
        self.state().cache.last_inaction
    }

    pub fn last_crash(&self) -> Option<NaiveDateTime> {
        self.state().cache.last_crash
    }

    pub fn last(&self, action: Action) -> Option<NaiveDateTime> {
        self.state().cache.last(action)
    }

    pub fn is_alive(&self) -> bool {
        !self.state().runs.is_empty()
    }

    pub fn n_alive(&self) -> usize {
        self.state().runs.len()
    }

    /// Start times of the live runs.
    pub fn run_starts(&self) -> Vec<NaiveDateTime> {
        self.state().runs.iter().map(|r| r.start).collect()
    }

    pub(crate) fn n_alive_with(&self, execution: Execution) -> usize {
        self.state()
            .runs
            .iter()
            .filter(|r| r.execution == execution)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_and_overrides() {
        let task = Task::new("fetch", TaskFn::sync(|_| Ok(None)));
        assert_eq!(task.start_cond(), &Condition::AlwaysFalse);
        assert_eq!(task.execution(), None);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(!task.is_alive());

        let task = Task::new("fetch", TaskFn::sync(|_| Ok(None)))
            .with_start_cond(Condition::AlwaysTrue)
            .with_execution(Execution::Thread)
            .with_priority(3)
            .with_timeout(Duration::from_secs(5))
            .with_parameter("url", "http://localhost")
            .with_disabled(true)
            .permanent();
        assert_eq!(task.start_cond(), &Condition::AlwaysTrue);
        assert_eq!(task.execution(), Some(Execution::Thread));
        assert_eq!(task.priority(), 3);
        assert!(task.is_disabled());
        assert!(task.is_permanent());
        assert_eq!(task.parameters()["url"], Value::from("http://localhost"));
    }

    #[test]
    fn force_flags() {
        let task = Task::new("t", TaskFn::sync(|_| Ok(None)));
        assert!(!task.is_force_run());
        task.force_run();
        assert!(task.is_force_run());
        task.force_termination();
        assert!(task.force_termination.load(Ordering::SeqCst));
    }
}
