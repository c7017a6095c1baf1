//! Start, finish and termination of task runs, and the logging contract
//! that keeps a task's status consistent with its records.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::NaiveDateTime;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::conditions::{Condition, ObserveContext};
use crate::config::Execution;
use crate::error::{RunError, TaskError};
use crate::log::{Action, LogFilter, LogRecord};
use crate::session::hooks::finish_hooks;
use crate::session::{HookKind, HookOutcome, Session};
use crate::task::body::{Parameters, RunResult, TaskContext, TaskFn};
use crate::task::definition::Task;
use crate::task::process;
use crate::task::run::{RunHandle, TaskRun};
use crate::task::status::{StatusCache, TaskStatus};

const PROCESS_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The terminal record for an outcome, plus the scheduler signal the body
/// raised, if any.
pub(crate) fn terminal_record(
    task: &str,
    run_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    outcome: RunResult,
    cancelled: bool,
) -> (LogRecord, Option<RunError>) {
    let record = |action| {
        LogRecord::new(task, action, end)
            .with_run_id(run_id)
            .with_start(start)
            .with_end(end)
    };
    match outcome {
        Ok(_) if cancelled => (record(Action::Terminate), None),
        Ok(value) => (record(Action::Success).with_return_value(value), None),
        Err(RunError::Inaction) => (record(Action::Inaction), None),
        Err(RunError::Terminated) => (record(Action::Terminate), None),
        Err(RunError::Failed { message }) => (record(Action::Fail).with_exc_info(message), None),
        Err(signal @ (RunError::SchedulerRestart | RunError::SchedulerExit)) => {
            (record(Action::Success), Some(signal))
        }
    }
}

fn panic_error(payload: Box<dyn std::any::Any + Send>) -> RunError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    RunError::failed(format!("panicked: {message}"))
}

/// Body on the current runtime; blocking bodies go to the blocking pool.
async fn run_async(body: TaskFn, ctx: TaskContext) -> RunResult {
    match body {
        TaskFn::Sync(f) => tokio::task::spawn_blocking(move || f(ctx))
            .await
            .unwrap_or_else(|e| match e.try_into_panic() {
                Ok(payload) => Err(panic_error(payload)),
                Err(e) => Err(RunError::failed(e.to_string())),
            }),
        TaskFn::Async(handler) => handler.run(ctx).await,
        TaskFn::Command(spec) => process::run_command(&spec, ctx).await,
    }
}

/// Body on a dedicated thread, with its own runtime when it needs one.
fn run_blocking(body: TaskFn, ctx: TaskContext) -> RunResult {
    match body {
        TaskFn::Sync(f) => f(ctx),
        other => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_async(other, ctx))
        }
    }
}

impl Task {
    // ── Logging ─────────────────────────────────────────────────────────

    /// Append a lifecycle record and update the status cache and run stack.
    ///
    /// `created` is raised to the task's newest record time and a missing
    /// `run_id` is generated. A rejected `run` record closes the run as
    /// failed; a rejected terminal record is retried as `fail`, and if that
    /// is rejected too the run keeps the failure for the scheduler to
    /// report. Either way the cache never stays at `run`.
    pub(crate) fn log_record(
        &self,
        session: &Session,
        mut record: LogRecord,
    ) -> Result<(), TaskError> {
        let span = tracing::info_span!(
            "task",
            logger = %session.config().task_logger_basename,
            task = %self.name,
        );
        let _enter = span.enter();

        let mut state = self.state();
        if let Some(last) = state.cache.last_created
            && record.created < last
        {
            record.created = last;
        }
        let run_id = match &record.run_id {
            Some(id) => id.clone(),
            None => {
                let id = session.new_run_id();
                record.run_id = Some(id.clone());
                id
            }
        };
        if record.message.is_empty() {
            record.message = format!("Task '{}' status: '{}'", self.name, record.action);
        }
        let action = record.action;
        let created = record.created;
        let exc_info = record.exc_info.clone();
        let repository = session.repository();

        let reason = match repository.append(record) {
            Ok(()) => {
                state.cache.observe(action, created);
                tracing::debug!(action = %action, run_id = %run_id, "Logged");
                let post = if action.is_terminal() {
                    take_run(&mut state.runs, &run_id)
                        .map(|run| run.post_hooks)
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                drop(state);
                finish_hooks(
                    post,
                    &HookOutcome {
                        action: Some(action),
                        error: exc_info,
                    },
                );
                return Ok(());
            }
            Err(e) => e.to_string(),
        };

        tracing::error!(action = %action, run_id = %run_id, "Failed to log record: {}", reason);
        let fail_logged = action != Action::Fail
            && repository
                .append(
                    LogRecord::new(&self.name, Action::Fail, created)
                        .with_run_id(&run_id)
                        .with_message(format!("Task '{}' status: 'fail'", self.name))
                        .with_exc_info(format!("could not log '{action}': {reason}")),
                )
                .is_ok();
        state.cache.observe(Action::Fail, created);

        let post = if action == Action::Run || fail_logged {
            match take_run(&mut state.runs, &run_id) {
                Some(run) => {
                    run.terminate.cancel();
                    if let RunHandle::Process {
                        kill: Some(kill), ..
                    } = run.handle
                    {
                        let _ = kill.send(());
                    }
                    run.post_hooks
                }
                None => Vec::new(),
            }
        } else {
            if let Some(run) = state.runs.iter_mut().find(|r| r.run_id == run_id) {
                run.failure = Some(reason.clone());
            }
            Vec::new()
        };
        drop(state);
        finish_hooks(
            post,
            &HookOutcome {
                action: Some(Action::Fail),
                error: Some(reason.clone()),
            },
        );

        Err(TaskError::Logging {
            task: self.name.clone(),
            action,
            reason,
        })
    }

    /// Rebuild the status cache from the repository. A trailing `run` with
    /// no live run behind it means the previous process died: it is closed
    /// with a `crash` record.
    pub(crate) fn refresh_status(&self, session: &Session) -> Result<TaskStatus, TaskError> {
        let repository = session.repository();
        let logging_error = |action, e: crate::error::RepositoryError| TaskError::Logging {
            task: self.name.clone(),
            action,
            reason: e.to_string(),
        };
        let records = repository
            .query(&LogFilter::new().task(&self.name))
            .map_err(|e| logging_error(Action::Run, e))?;
        let mut cache = StatusCache::from_records(&records);

        let mut state = self.state();
        if cache.status == TaskStatus::Run && state.runs.is_empty() {
            let last = records.last();
            let created = cache
                .last_created
                .map_or_else(|| session.now(), |t| t.max(session.now()));
            let run_id = last
                .and_then(|r| r.run_id.clone())
                .unwrap_or_else(|| session.new_run_id());
            let mut crash = LogRecord::new(&self.name, Action::Crash, created)
                .with_run_id(run_id)
                .with_message(format!("Task '{}' status: 'crash'", self.name));
            if let Some(start) = last.and_then(|r| r.start) {
                crash = crash.with_start(start);
            }
            repository
                .append(crash)
                .map_err(|e| logging_error(Action::Crash, e))?;
            cache.observe(Action::Crash, created);
            tracing::warn!(task = %self.name, "Previous run did not finish, marked as crashed");
        }
        state.cache = cache;
        Ok(state.cache.status)
    }

    // ── Start ───────────────────────────────────────────────────────────

    fn merge_params(&self, session: &Session) -> Parameters {
        let mut params = session.parameters();
        params.extend(self.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(accepts) = &self.accepts {
            params.retain(|key, _| accepts.iter().any(|a| a == key));
        }
        params
    }

    fn set_handle(&self, run_id: &str, handle: RunHandle) {
        if let Some(run) = self.state().runs.iter_mut().find(|r| r.run_id == run_id) {
            run.handle = handle;
        }
    }

    pub(crate) fn has_run(&self, run_id: &str) -> bool {
        self.state().runs.iter().any(|r| r.run_id == run_id)
    }

    /// Start a run. Returns once its `run` record is logged; inline runs
    /// return once finished.
    pub(crate) async fn launch(
        self: &Arc<Self>,
        session: &Session,
        execution: Execution,
    ) -> Result<(), TaskError> {
        self.force_run.store(false, Ordering::SeqCst);
        let params = self.merge_params(session);
        let run_id = session.new_run_id();
        let start = session.now();

        let mut run = TaskRun::new(run_id.clone(), start, execution);
        run.post_hooks = session.call_hooks(HookKind::TaskExecute, Some(&self.name), Some(&run_id));
        let token = run.terminate.clone();
        self.state().runs.push(run);

        tracing::info!(task = %self.name, run_id = %run_id, execution = %execution, "Launching");
        let ctx = TaskContext::new(
            self.name.clone(),
            run_id.clone(),
            params,
            session.clone(),
            token.clone(),
        );

        if execution != Execution::Process {
            self.log_record(
                session,
                LogRecord::new(&self.name, Action::Run, start)
                    .with_run_id(&run_id)
                    .with_start(start),
            )?;
        }

        match execution {
            Execution::Inline => {
                self.set_handle(&run_id, RunHandle::Inline);
                let outcome = AssertUnwindSafe(run_async(self.body.clone(), ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|p| Err(panic_error(p)));
                self.finish(session, &run_id, start, outcome, token.is_cancelled());
            }
            Execution::Cooperative => {
                let task = self.clone();
                let session = session.clone();
                let body = self.body.clone();
                let id = run_id.clone();
                let handle = tokio::spawn(async move {
                    let outcome = tokio::select! {
                        biased;
                        () = token.cancelled() => Err(RunError::Terminated),
                        result = AssertUnwindSafe(run_async(body, ctx)).catch_unwind() => {
                            result.unwrap_or_else(|p| Err(panic_error(p)))
                        }
                    };
                    task.finish(&session, &id, start, outcome, false);
                });
                self.set_handle(&run_id, RunHandle::Cooperative(handle));
            }
            Execution::Thread => {
                let task = self.clone();
                let thread_session = session.clone();
                let body = self.body.clone();
                let id = run_id.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("tickwork-{}", self.name))
                    .spawn(move || {
                        let outcome =
                            std::panic::catch_unwind(AssertUnwindSafe(|| run_blocking(body, ctx)))
                                .unwrap_or_else(|p| Err(panic_error(p)));
                        task.finish(&thread_session, &id, start, outcome, token.is_cancelled());
                    });
                match spawned {
                    Ok(handle) => self.set_handle(&run_id, RunHandle::Thread(handle)),
                    Err(e) => self.finish(
                        session,
                        &run_id,
                        start,
                        Err(RunError::failed(format!("could not spawn thread: {e}"))),
                        false,
                    ),
                }
            }
            Execution::Process => {
                let TaskFn::Command(spec) = &self.body else {
                    let reason = format!("a {} body cannot run as a process", self.body.kind());
                    self.log_setup_failure(session, &run_id, start, &reason);
                    return Err(TaskError::Setup {
                        task: self.name.clone(),
                        reason,
                    });
                };
                let (kill, kill_rx) = oneshot::channel();
                let join = tokio::spawn(process::supervise(
                    spec.clone(),
                    ctx,
                    start,
                    session.queue_sender(),
                    kill_rx,
                ));
                self.set_handle(
                    &run_id,
                    RunHandle::Process {
                        kill: Some(kill),
                        join: Some(join),
                    },
                );
                self.await_process_start(session, &run_id, start).await?;
            }
        }
        Ok(())
    }

    /// Route queued records until this run's `run` record arrives.
    async fn await_process_start(
        &self,
        session: &Session,
        run_id: &str,
        start: NaiveDateTime,
    ) -> Result<(), TaskError> {
        let timeout = session.config().process_start_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = session.queue_receiver().lock().await;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(record)) => {
                    let started = record.task_name == self.name
                        && record.action == Action::Run
                        && record.run_id.as_deref() == Some(run_id);
                    if started {
                        return self.log_record(session, record);
                    }
                    session.route_record(record)?;
                }
                Ok(None) | Err(_) => break,
            }
        }
        drop(rx);

        if let Some(run) = take_run(&mut self.state().runs, run_id)
            && let RunHandle::Process {
                kill: Some(kill), ..
            } = run.handle
        {
            let _ = kill.send(());
        }
        let reason = format!("no run record within {timeout:?}");
        self.log_setup_failure(session, run_id, start, &reason);
        Err(TaskError::StartTimeout {
            task: self.name.clone(),
            timeout,
        })
    }

    /// The `run` + `fail` pair for a run that never got going.
    fn log_setup_failure(
        &self,
        session: &Session,
        run_id: &str,
        start: NaiveDateTime,
        reason: &str,
    ) {
        let run = LogRecord::new(&self.name, Action::Run, start)
            .with_run_id(run_id)
            .with_start(start);
        if self.log_record(session, run).is_err() {
            return;
        }
        let end = session.now();
        let fail = LogRecord::new(&self.name, Action::Fail, end)
            .with_run_id(run_id)
            .with_start(start)
            .with_end(end)
            .with_exc_info(reason);
        if let Err(e) = self.log_record(session, fail) {
            tracing::warn!(task = %self.name, "Setup failure not logged: {}", e);
        }
    }

    // ── Finish ──────────────────────────────────────────────────────────

    /// Log the terminal record of a run and act on scheduler signals.
    pub(crate) fn finish(
        &self,
        session: &Session,
        run_id: &str,
        start: NaiveDateTime,
        outcome: RunResult,
        cancelled: bool,
    ) {
        let end = session.now();
        let (record, signal) = terminal_record(&self.name, run_id, start, end, outcome, cancelled);
        let action = record.action;
        match self.log_record(session, record) {
            Ok(()) => tracing::info!(
                task = %self.name,
                run_id = %run_id,
                action = %action,
                "Run finished"
            ),
            Err(e) => tracing::error!(
                task = %self.name,
                run_id = %run_id,
                "Run finished but not logged: {}",
                e
            ),
        }
        match signal {
            Some(RunError::SchedulerRestart) => session.restart(),
            Some(RunError::SchedulerExit) => session.shut_down(false),
            _ => {}
        }
    }

    // ── Termination ─────────────────────────────────────────────────────

    /// Stop one run. Cooperative and thread runs log their own `terminate`
    /// once they notice; process runs are killed and logged here.
    pub(crate) async fn terminate_run(
        &self,
        session: &Session,
        run_id: &str,
        reason: &str,
    ) -> Result<(), TaskError> {
        let (execution, start, kill, join) = {
            let mut state = self.state();
            let Some(run) = state.runs.iter_mut().find(|r| r.run_id == run_id) else {
                return Ok(());
            };
            run.terminate.cancel();
            match &mut run.handle {
                RunHandle::Process { kill, join } => {
                    (run.execution, run.start, kill.take(), join.take())
                }
                _ => (run.execution, run.start, None, None),
            }
        };
        tracing::info!(task = %self.name, run_id = %run_id, reason, "Terminating run");

        match execution {
            Execution::Inline => {
                tracing::warn!(task = %self.name, "Inline runs cannot be interrupted");
            }
            Execution::Cooperative | Execution::Thread => {}
            Execution::Process => {
                if let Some(kill) = kill {
                    let _ = kill.send(());
                }
                if let Some(join) = join
                    && tokio::time::timeout(PROCESS_JOIN_TIMEOUT, join).await.is_err()
                {
                    tracing::warn!(
                        task = %self.name,
                        run_id = %run_id,
                        "Supervisor did not exit in time"
                    );
                }
                // The child may have finished on its own first.
                session.drain_log_queue().await?;
                if self.has_run(run_id) {
                    let end = session.now();
                    self.log_record(
                        session,
                        LogRecord::new(&self.name, Action::Terminate, end)
                            .with_run_id(run_id)
                            .with_start(start)
                            .with_end(end)
                            .with_exc_info(reason),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Terminate every live run.
    pub(crate) async fn terminate_all(
        &self,
        session: &Session,
        reason: &str,
    ) -> Result<(), TaskError> {
        let run_ids: Vec<String> = self.state().runs.iter().map(|r| r.run_id.clone()).collect();
        for run_id in run_ids {
            self.terminate_run(session, &run_id, reason).await?;
        }
        Ok(())
    }

    /// Observe `cond`, answering `on_error` for a failed check when
    /// `silenced` or `silence_cond_check` is set.
    fn observe_cond(
        &self,
        session: &Session,
        cond: &Condition,
        on_error: bool,
        silenced: bool,
    ) -> Result<bool, TaskError> {
        let ctx = ObserveContext::for_task(session, self);
        match cond.observe(&ctx) {
            Ok(value) => Ok(value),
            Err(e) if silenced || session.config().silence_cond_check => {
                tracing::warn!(task = %self.name, "Condition check failed: {}", e);
                Ok(on_error)
            }
            Err(source) => Err(TaskError::Condition {
                task: self.name.clone(),
                source,
            }),
        }
    }

    /// Whether the start condition holds; errors follow `silence_cond_check`.
    pub(crate) fn check_start(&self, session: &Session) -> Result<bool, TaskError> {
        self.observe_cond(session, &self.start_cond, false, false)
    }

    /// Terminate runs hit by a forced termination, the end condition, a
    /// false run condition or their timeout. With `silenced`, failing end
    /// and run conditions count as "keep running" whatever
    /// `silence_cond_check` says.
    pub(crate) async fn check_termination(
        &self,
        session: &Session,
        silenced: bool,
    ) -> Result<(), TaskError> {
        let runs: Vec<(String, NaiveDateTime)> = self
            .state()
            .runs
            .iter()
            .map(|r| (r.run_id.clone(), r.start))
            .collect();
        let forced = self.force_termination.swap(false, Ordering::SeqCst);
        if runs.is_empty() {
            return Ok(());
        }

        let ended = !forced && self.observe_cond(session, &self.end_cond, false, silenced)?;
        let stopped = match &self.run_cond {
            Some(cond) if !forced && !ended => {
                !self.observe_cond(session, cond, true, silenced)?
            }
            _ => false,
        };
        let timeout = if self.permanent {
            None
        } else {
            self.timeout.or(session.config().default_timeout)
        };
        let now = session.now();

        for (run_id, start) in runs {
            let timed_out = timeout.is_some_and(|limit| {
                (now - start).to_std().is_ok_and(|elapsed| elapsed > limit)
            });
            let reason = if forced {
                "forced termination"
            } else if ended {
                "end condition"
            } else if stopped {
                "run condition no longer holds"
            } else if timed_out {
                "timeout"
            } else {
                continue;
            };
            self.terminate_run(session, &run_id, reason).await?;
        }
        Ok(())
    }

    /// Drop runs whose executor is gone without a terminal record. A run
    /// whose terminal record was rejected is reported unless logging errors
    /// are silenced. Process runs are closed through the queue or by
    /// [`terminate_run`](Self::terminate_run) only.
    pub(crate) fn prune_dead(&self, session: &Session) -> Result<(), TaskError> {
        let silenced = session.config().silence_task_logging;
        let mut state = self.state();
        let mut failure = None;
        state.runs.retain(|run| {
            if run.execution == Execution::Process || !run.is_dead() {
                return true;
            }
            match &run.failure {
                Some(reason) if !silenced => {
                    failure.get_or_insert_with(|| reason.clone());
                    true
                }
                Some(reason) => {
                    tracing::warn!(
                        task = %self.name,
                        run_id = %run.run_id,
                        "Dropping run: {}",
                        reason
                    );
                    false
                }
                None => {
                    tracing::warn!(
                        task = %self.name,
                        run_id = %run.run_id,
                        "Dropping run that ended without a record"
                    );
                    false
                }
            }
        });
        match failure {
            Some(reason) => Err(TaskError::Logging {
                task: self.name.clone(),
                action: Action::Fail,
                reason,
            }),
            None => Ok(()),
        }
    }
}

fn take_run(runs: &mut Vec<TaskRun>, run_id: &str) -> Option<TaskRun> {
    let index = runs.iter().position(|r| r.run_id == run_id)?;
    Some(runs.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::log::{LogRepository, MemoryRepository};
    use crate::time::MockClock;
    use chrono::NaiveDate;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
    }

    /// Rejects every record whose action is in `reject`.
    struct PickyRepository {
        inner: MemoryRepository,
        reject: Vec<Action>,
    }

    impl LogRepository for PickyRepository {
        fn append(&self, record: LogRecord) -> Result<(), RepositoryError> {
            if self.reject.contains(&record.action) {
                return Err(RepositoryError::Rejected(format!("no {}", record.action)));
            }
            self.inner.append(record)
        }

        fn query(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, RepositoryError> {
            self.inner.query(filter)
        }
    }

    fn actions(session: &Session, task: &str) -> Vec<Action> {
        session
            .repository()
            .query(&LogFilter::new().task(task))
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect()
    }

    #[test]
    fn terminal_records_follow_outcomes() {
        let (r, s) = terminal_record("t", "1", t0(), t0(), Ok(Some(Value::from(1))), false);
        assert_eq!(
            (r.action, r.return_value, s.is_none()),
            (Action::Success, Some(Value::from(1)), true)
        );
        let (r, _) = terminal_record("t", "1", t0(), t0(), Ok(None), true);
        assert_eq!(r.action, Action::Terminate);
        let (r, _) = terminal_record("t", "1", t0(), t0(), Err(RunError::Inaction), false);
        assert_eq!(r.action, Action::Inaction);
        let (r, _) = terminal_record("t", "1", t0(), t0(), Err(RunError::failed("bad")), false);
        assert_eq!((r.action, r.exc_info.as_deref()), (Action::Fail, Some("bad")));
        let (r, s) = terminal_record("t", "1", t0(), t0(), Err(RunError::SchedulerExit), false);
        assert_eq!(r.action, Action::Success);
        assert!(matches!(s, Some(RunError::SchedulerExit)));
    }

    #[test]
    fn created_is_monotonic_and_run_ids_are_filled() {
        let clock = MockClock::new(t0());
        let session = Session::default().with_clock(clock.clock());
        let task = session
            .add_task(Task::new("a", TaskFn::sync(|_| Ok(None))))
            .unwrap();

        let later = t0() + chrono::Duration::hours(1);
        task.log_record(&session, LogRecord::new("a", Action::Run, later)).unwrap();
        task.log_record(&session, LogRecord::new("a", Action::Success, t0())).unwrap();

        let records = session.repository().query(&LogFilter::new()).unwrap();
        assert_eq!(records[1].created, later);
        assert!(records.iter().all(|r| r.run_id.is_some()));
        assert_eq!(task.status(), TaskStatus::Success);
        assert_eq!(task.last_success(), Some(later));
    }

    #[tokio::test]
    async fn rejected_run_record_marks_fail() {
        let repository = Arc::new(PickyRepository {
            inner: MemoryRepository::new(),
            reject: vec![Action::Run],
        });
        let session = Session::default().with_repository(repository);
        let task = session
            .add_task(Task::new("a", TaskFn::sync(|_| Ok(None))))
            .unwrap();

        let err = task.launch(&session, Execution::Inline).await.unwrap_err();
        assert!(matches!(err, TaskError::Logging { action: Action::Run, .. }));
        assert_eq!(task.status(), TaskStatus::Fail);
        assert!(!task.is_alive());
        assert_eq!(actions(&session, "a"), vec![Action::Fail]);
    }

    #[tokio::test]
    async fn rejected_success_becomes_fail() {
        let repository = Arc::new(PickyRepository {
            inner: MemoryRepository::new(),
            reject: vec![Action::Success],
        });
        let session = Session::default().with_repository(repository);
        let task = session
            .add_task(Task::new("a", TaskFn::sync(|_| Ok(None))))
            .unwrap();

        task.launch(&session, Execution::Inline).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Fail);
        assert!(!task.is_alive());
        assert_eq!(actions(&session, "a"), vec![Action::Run, Action::Fail]);
    }

    #[tokio::test]
    async fn process_needs_a_command_body() {
        let session = Session::default();
        let task = session
            .add_task(Task::new("a", TaskFn::sync(|_| Ok(None))))
            .unwrap();
        let err = task.launch(&session, Execution::Process).await.unwrap_err();
        assert!(matches!(err, TaskError::Setup { .. }));
        assert_eq!(actions(&session, "a"), vec![Action::Run, Action::Fail]);
        assert!(!task.is_alive());
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let session = Session::default();
        let task = session
            .add_task(Task::new("a", TaskFn::sync(|_| panic!("kaboom"))))
            .unwrap();
        task.launch(&session, Execution::Inline).await.unwrap();
        let last = session
            .repository()
            .last(&LogFilter::new().task("a"))
            .unwrap()
            .unwrap();
        assert_eq!(last.action, Action::Fail);
        assert!(last.exc_info.unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn cooperative_run_is_terminated() {
        let session = Session::default();
        let task = session
            .add_task(Task::new(
                "sleeper",
                TaskFn::from_async(|_ctx| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(None)
                }),
            ))
            .unwrap();
        task.launch(&session, Execution::Cooperative).await.unwrap();
        assert!(task.is_alive());
        assert_eq!(task.status(), TaskStatus::Run);

        task.force_termination();
        task.check_termination(&session, false).await.unwrap();
        for _ in 0..100 {
            if !task.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!task.is_alive());
        assert_eq!(actions(&session, "sleeper"), vec![Action::Run, Action::Terminate]);
    }

    #[tokio::test]
    async fn thread_run_polls_the_terminate_signal() {
        let session = Session::default();
        let task = session
            .add_task(
                Task::new(
                    "poller",
                    TaskFn::sync(|ctx| {
                        while !ctx.is_terminated() {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        Err(RunError::Terminated)
                    }),
                )
                .with_timeout(Duration::from_millis(1)),
            )
            .unwrap();
        let clock = MockClock::new(t0());
        let session = session.with_clock(clock.clock());

        task.launch(&session, Execution::Thread).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        task.check_termination(&session, false).await.unwrap();
        for _ in 0..200 {
            if !task.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(actions(&session, "poller"), vec![Action::Run, Action::Terminate]);
    }

    #[tokio::test]
    async fn execute_hooks_see_the_outcome() {
        let session = Session::default();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let (s, c) = (seen.clone(), calls.clone());
        session.add_hook(HookKind::TaskExecute, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            let s = s.clone();
            Some(Box::new(move |outcome: &HookOutcome| {
                s.lock().unwrap().push(outcome.action);
            }))
        });
        let task = session
            .add_task(Task::new("a", TaskFn::sync(|_| Err(RunError::Inaction))))
            .unwrap();
        task.launch(&session, Execution::Inline).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some(Action::Inaction)]);
    }

    #[test]
    fn dangling_run_becomes_crash() {
        let repository = Arc::new(MemoryRepository::with_records(vec![
            LogRecord::new("a", Action::Run, t0()).with_run_id("r1"),
            LogRecord::new("a", Action::Success, t0()).with_run_id("r1"),
            LogRecord::new("a", Action::Run, t0()).with_run_id("r2"),
        ]));
        let session = Session::default()
            .with_repository(repository.clone())
            .with_time_func(t0);
        let task = session
            .add_task(Task::new("a", TaskFn::sync(|_| Ok(None))))
            .unwrap();

        assert_eq!(task.refresh_status(&session).unwrap(), TaskStatus::Crash);
        let last = repository.last(&LogFilter::new()).unwrap().unwrap();
        assert_eq!(last.action, Action::Crash);
        assert_eq!(last.run_id.as_deref(), Some("r2"));
        assert_eq!(task.last_success(), Some(t0()));

        // Idempotent once the crash is recorded.
        assert_eq!(task.refresh_status(&session).unwrap(), TaskStatus::Crash);
        assert_eq!(repository.len(), 4);
    }

    #[test]
    fn parameters_merge_and_filter() {
        let session = Session::default();
        session.set_parameter("shared", 1);
        session.set_parameter("ignored", 2);
        let task = Task::new("a", TaskFn::sync(|_| Ok(None)))
            .with_parameter("shared", 10)
            .with_parameter("own", 3)
            .with_accepts(["shared", "own"]);
        let params = task.merge_params(&session);
        assert_eq!(params.len(), 2);
        assert_eq!(params["shared"], Value::from(10));
        assert_eq!(params["own"], Value::from(3));
    }
}
