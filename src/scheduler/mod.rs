//! The scheduler loop.
//!
//! Each cycle walks the tasks by priority, launches those whose start
//! condition holds and terminates runs that hit their end condition or
//! timeout. The loop ends when the session's shut condition holds or a
//! shutdown or restart is requested.

mod restart;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::conditions::ObserveContext;
use crate::config::{Execution, RestartPolicy};
use crate::error::{Error, SchedulerError, SessionError, TaskError};
use crate::session::hooks::finish_hooks;
use crate::session::{HookKind, HookOutcome, Session};
use crate::task::Task;

/// Poll interval while waiting for runs to finish.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long terminated cooperative and thread runs get to log their exit.
const TERMINATE_WAIT: Duration = Duration::from_secs(5);

/// Which end of a scheduler run a batch of tasks belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Shutdown,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Shutdown,
    Restart,
}

pub struct Scheduler {
    session: Session,
}

impl Scheduler {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Run until shutdown, restarting per the session's restart policy.
    pub async fn serve(&self) -> Result<(), Error> {
        let config = self.session.config();
        loop {
            let state = self.session.scheduler_state();
            if state.running.swap(true, Ordering::SeqCst) {
                return Err(SessionError::AlreadyRunning.into());
            }
            let span = tracing::info_span!(
                "scheduler",
                logger = %config.scheduler_logger_basename
            );
            let stop = self.run_once().instrument(span).await;
            state.running.store(false, Ordering::SeqCst);

            match stop? {
                Stop::Shutdown => return Ok(()),
                Stop::Restart if config.restarting == RestartPolicy::Recall => {
                    tracing::info!("Restarting scheduler in-process");
                }
                Stop::Restart => {
                    restart::restart(config.restarting)?;
                    return Ok(());
                }
            }
        }
    }

    async fn run_once(&self) -> Result<Stop, Error> {
        let signals = self.listen_for_signals();
        let result = match self.startup().await {
            Ok(()) => self.run_loop().await,
            Err(e) => Err(e),
        };
        let error = result.as_ref().err().map(ToString::to_string);
        let shutdown = self.shutdown(error).await;
        if let Some(handle) = signals {
            handle.abort();
        }
        let stop = result?;
        shutdown?;
        Ok(stop)
    }

    fn listen_for_signals(&self) -> Option<JoinHandle<()>> {
        if !self.session.config().handle_signals {
            return None;
        }
        let session = self.session.clone();
        Some(tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    session.shut_down(false);
                }
                Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
            }
        }))
    }

    // ── Startup ─────────────────────────────────────────────────────────

    async fn startup(&self) -> Result<(), Error> {
        let session = &self.session;
        let state = session.scheduler_state();
        state.cycles.store(0, Ordering::SeqCst);
        for flag in [&state.shutdown, &state.force_exit, &state.restart, &state.paused] {
            flag.store(false, Ordering::SeqCst);
        }
        *state
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(session.now());
        tracing::info!(tasks = session.tasks().len(), "Scheduler starting");

        let post = session.call_hooks(HookKind::SchedulerStartup, None, None);
        let result = self.startup_tasks().await;
        finish_hooks(
            post,
            &HookOutcome {
                action: None,
                error: result.as_ref().err().map(ToString::to_string),
            },
        );
        result
    }

    async fn startup_tasks(&self) -> Result<(), Error> {
        for task in self.session.tasks() {
            let _guard = task.lock.lock().await;
            let refreshed = task.refresh_status(&self.session).map(|_| ());
            self.tolerate(&task, refreshed)?;
        }
        let tasks: Vec<Arc<Task>> = self
            .session
            .tasks_by_priority()
            .into_iter()
            .filter(|t| t.is_startup())
            .collect();
        self.run_batch(&tasks, Phase::Startup).await
    }

    // ── Loop ────────────────────────────────────────────────────────────

    async fn run_loop(&self) -> Result<Stop, Error> {
        let state = self.session.scheduler_state();
        loop {
            if self.shut_cond_holds()? {
                tracing::info!("Shut condition met");
                return Ok(Stop::Shutdown);
            }
            self.sleep().await;
            if state.shutdown.load(Ordering::SeqCst) {
                return Ok(Stop::Shutdown);
            }
            if state.restart.load(Ordering::SeqCst) {
                return Ok(Stop::Restart);
            }
            self.run_cycle().await?;
        }
    }

    fn shut_cond_holds(&self) -> Result<bool, SchedulerError> {
        self.session
            .shut_cond()
            .observe(&ObserveContext::new(&self.session))
            .map_err(SchedulerError::ShutCondition)
    }

    /// Sleep for `cycle_sleep`, or less when a control flag changes.
    async fn sleep(&self) {
        let state = self.session.scheduler_state();
        tokio::select! {
            _ = tokio::time::sleep(self.session.config().cycle_sleep) => {}
            _ = state.wake.notified() => {}
        }
    }

    async fn run_cycle(&self) -> Result<(), Error> {
        let session = &self.session;
        let post = session.call_hooks(HookKind::SchedulerCycle, None, None);
        let result = self.cycle_tasks().await;
        let cycle = session.scheduler_state().cycles.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(cycle, "Cycle complete");
        finish_hooks(
            post,
            &HookOutcome {
                action: None,
                error: result.as_ref().err().map(ToString::to_string),
            },
        );
        result
    }

    async fn cycle_tasks(&self) -> Result<(), Error> {
        let session = &self.session;
        for task in session.tasks_by_priority() {
            let _guard = task.lock.lock().await;
            session.drain_log_queue().await?;
            task.prune_dead(session)?;
            if task.is_startup() || task.is_shutdown() {
                continue;
            }
            if self.is_runnable(&task)? {
                self.launch(&task).await?;
            }
            let checked = task.check_termination(session, false).await;
            self.tolerate(&task, checked)?;
        }
        Ok(())
    }

    fn execution_of(&self, task: &Task) -> Execution {
        task.execution()
            .unwrap_or(self.session.config().execution)
    }

    fn is_runnable(&self, task: &Task) -> Result<bool, TaskError> {
        let session = &self.session;
        if session.is_paused() {
            return Ok(false);
        }
        let forced = task.is_force_run();
        if task.is_disabled() && !forced {
            return Ok(false);
        }
        if task.is_alive() && !task.is_multilaunch() {
            return Ok(false);
        }
        if self.execution_of(task) == Execution::Process
            && session.n_process_runs() >= session.config().max_process_count
        {
            tracing::debug!(task = %task.name(), "No free process slot");
            return Ok(false);
        }
        if forced {
            return Ok(true);
        }
        task.check_start(session)
    }

    async fn launch(&self, task: &Arc<Task>) -> Result<(), TaskError> {
        let launched = task.launch(&self.session, self.execution_of(task)).await;
        self.tolerate(task, launched)
    }

    /// Downgrade setup and logging errors to warnings per the silence
    /// flags.
    fn tolerate(&self, task: &Task, result: Result<(), TaskError>) -> Result<(), TaskError> {
        let config = self.session.config();
        match result {
            Err(e @ (TaskError::Setup { .. } | TaskError::StartTimeout { .. }))
                if config.silence_task_prerun =>
            {
                tracing::warn!(task = %task.name(), "Task setup failed: {}", e);
                Ok(())
            }
            Err(e @ TaskError::Logging { .. }) if config.silence_task_logging => {
                tracing::warn!(task = %task.name(), "Task logging failed: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    /// Launch the runnable tasks of `tasks` and wait for their runs.
    async fn run_batch(&self, tasks: &[Arc<Task>], phase: Phase) -> Result<(), Error> {
        for task in tasks {
            let _guard = task.lock.lock().await;
            self.session.drain_log_queue().await?;
            task.prune_dead(&self.session)?;
            if self.is_runnable(task)? {
                self.launch(task).await?;
            }
        }
        loop {
            let alive = self.enforce(tasks, phase).await?;
            if !alive {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Drain, prune and check termination for `tasks`. Returns whether
    /// any of them is still alive. Condition errors are silenced while
    /// shutting down.
    async fn enforce(&self, tasks: &[Arc<Task>], phase: Phase) -> Result<bool, Error> {
        let session = &self.session;
        session.drain_log_queue().await?;
        let mut alive = false;
        for task in tasks {
            let _guard = task.lock.lock().await;
            task.prune_dead(session)?;
            let checked = task
                .check_termination(session, phase == Phase::Shutdown)
                .await;
            self.tolerate(task, checked)?;
            alive |= task.is_alive();
        }
        Ok(alive)
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    async fn shutdown(&self, error: Option<String>) -> Result<(), Error> {
        let session = &self.session;
        let state = session.scheduler_state();
        tracing::info!(cycles = session.cycles(), "Scheduler shutting down");

        let shutdown_tasks: Vec<Arc<Task>> = session
            .tasks_by_priority()
            .into_iter()
            .filter(|t| t.is_shutdown())
            .collect();
        let mut result = self.run_batch(&shutdown_tasks, Phase::Shutdown).await;
        session.pause();

        let instant =
            session.config().instant_shutdown || state.force_exit.load(Ordering::SeqCst);
        let settled = if instant {
            self.terminate_all("scheduler shutdown").await
        } else {
            self.wait_for_runs().await
        };
        result = result.and(settled);
        result = result.and(session.drain_log_queue().await.map(|_| ()).map_err(Error::from));

        let post = session.call_hooks(HookKind::SchedulerShutdown, None, None);
        finish_hooks(
            post,
            &HookOutcome {
                action: None,
                error: error.or_else(|| result.as_ref().err().map(ToString::to_string)),
            },
        );
        for flag in [&state.shutdown, &state.force_exit, &state.paused] {
            flag.store(false, Ordering::SeqCst);
        }
        tracing::info!("Scheduler stopped");
        result
    }

    /// Let live runs finish, enforcing their end conditions and timeouts,
    /// until none is left or the grace period runs out.
    async fn wait_for_runs(&self) -> Result<(), Error> {
        let state = self.session.scheduler_state();
        let deadline = tokio::time::Instant::now() + self.session.config().shutdown_grace;
        loop {
            let tasks = self.session.tasks();
            match self.enforce(&tasks, Phase::Shutdown).await {
                Ok(false) => return Ok(()),
                Ok(true) => {}
                Err(e) => {
                    tracing::error!("Waiting for live runs failed, terminating them: {}", e);
                    self.terminate_all("shutdown error").await?;
                    return Err(e);
                }
            }
            if state.force_exit.load(Ordering::SeqCst) {
                return self.terminate_all("forced shutdown").await;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("Shutdown grace period elapsed, terminating live runs");
                return self.terminate_all("shutdown grace period elapsed").await;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn terminate_all(&self, reason: &str) -> Result<(), Error> {
        let session = &self.session;
        let tasks = session.tasks();
        for task in &tasks {
            let _guard = task.lock.lock().await;
            let terminated = task.terminate_all(session, reason).await;
            self.tolerate(task, terminated)?;
        }

        // Cooperative and thread runs log `terminate` themselves.
        let deadline = tokio::time::Instant::now() + TERMINATE_WAIT;
        loop {
            session.drain_log_queue().await?;
            let mut alive = false;
            for task in &tasks {
                let _guard = task.lock.lock().await;
                task.prune_dead(session)?;
                alive |= task.is_alive();
            }
            if !alive {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("Some runs ignored the terminate signal");
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{CmpOp, Condition};
    use crate::config::SessionConfig;
    use crate::error::RunError;
    use crate::log::{Action, LogFilter, LogRecord};
    use crate::task::TaskFn;
    use std::sync::atomic::AtomicUsize;

    fn session(config: SessionConfig) -> Session {
        Session::new(SessionConfig {
            execution: Execution::Inline,
            cycle_sleep: Duration::from_millis(1),
            ..config
        })
    }

    fn records(session: &Session) -> Vec<LogRecord> {
        session.repository().query(&LogFilter::new()).unwrap()
    }

    fn count(session: &Session, task: &str, action: Action) -> usize {
        session
            .repository()
            .count(&LogFilter::new().task(task).action(action))
            .unwrap()
    }

    fn sleeper(duration: Duration) -> TaskFn {
        TaskFn::from_async(move |_| async move {
            tokio::time::sleep(duration).await;
            Ok(None)
        })
    }

    /// Highest value `measure` reports after any cycle.
    fn track_max(
        session: &Session,
        measure: impl Fn(&Session) -> usize + Send + Sync + 'static,
    ) -> Arc<AtomicUsize> {
        let max = Arc::new(AtomicUsize::new(0));
        let seen = max.clone();
        let measure = Arc::new(measure);
        session.add_hook(HookKind::SchedulerCycle, move |event| {
            let session = event.session.clone();
            let seen = seen.clone();
            let measure = measure.clone();
            Some(Box::new(move |_: &HookOutcome| {
                seen.fetch_max(measure(&session), Ordering::SeqCst);
            }))
        });
        max
    }

    fn ok() -> TaskFn {
        TaskFn::sync(|_| Ok(None))
    }

    #[tokio::test]
    async fn startup_and_shutdown_tasks_bracket_the_cycles() {
        let session = session(SessionConfig::default())
            .with_shut_cond(Condition::scheduler_cycles(CmpOp::Ge, 1));
        session.add_task(Task::new("bye", ok()).on_shutdown()).unwrap();
        session
            .add_task(Task::new("main", ok()).with_start_cond(true))
            .unwrap();
        session.add_task(Task::new("boot", ok()).on_startup()).unwrap();

        session.serve().await.unwrap();

        let runs: Vec<String> = records(&session)
            .into_iter()
            .filter(|r| r.action == Action::Run)
            .map(|r| r.task_name)
            .collect();
        assert_eq!(runs, ["boot", "main", "bye"]);
        assert_eq!(session.cycles(), 1);
        assert!(!session.is_running());
        assert!(session.started_at().is_some());
    }

    #[tokio::test]
    async fn disabled_tasks_run_only_when_forced() {
        let session = session(SessionConfig::default())
            .with_shut_cond(Condition::scheduler_cycles(CmpOp::Ge, 3));
        let off = session
            .add_task(Task::new("off", ok()).with_start_cond(true).with_disabled(true))
            .unwrap();
        off.force_run();

        session.serve().await.unwrap();

        assert_eq!(count(&session, "off", Action::Run), 1);
        assert!(!off.is_force_run());
    }

    #[tokio::test]
    async fn pausing_stops_launches() {
        let session = session(SessionConfig::default())
            .with_shut_cond(Condition::scheduler_cycles(CmpOp::Ge, 3));
        session
            .add_task(Task::new("t", ok()).with_start_cond(true))
            .unwrap();
        session.add_hook(HookKind::SchedulerCycle, |event| {
            let session = event.session.clone();
            Some(Box::new(move |_: &HookOutcome| session.pause()))
        });

        session.serve().await.unwrap();

        assert_eq!(count(&session, "t", Action::Run), 1);
        assert_eq!(session.cycles(), 3);
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_live_runs() {
        let session = session(SessionConfig::default())
            .with_shut_cond(Condition::task_started("slow"));
        session
            .add_task(
                Task::new(
                    "slow",
                    TaskFn::from_async(|_| async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(None)
                    }),
                )
                .with_start_cond(true)
                .with_execution(Execution::Cooperative),
            )
            .unwrap();

        session.serve().await.unwrap();

        assert_eq!(count(&session, "slow", Action::Success), 1);
        assert_eq!(count(&session, "slow", Action::Terminate), 0);
    }

    #[tokio::test]
    async fn instant_shutdown_terminates_live_runs() {
        let session = session(SessionConfig {
            instant_shutdown: true,
            ..SessionConfig::default()
        })
        .with_shut_cond(Condition::task_started("slow"));
        session
            .add_task(
                Task::new(
                    "slow",
                    TaskFn::from_async(|_| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(None)
                    }),
                )
                .with_start_cond(true)
                .with_execution(Execution::Cooperative),
            )
            .unwrap();

        session.serve().await.unwrap();

        assert_eq!(count(&session, "slow", Action::Terminate), 1);
        assert_eq!(count(&session, "slow", Action::Success), 0);
    }

    #[tokio::test]
    async fn restart_recalls_the_loop() {
        let session = session(SessionConfig::default())
            .with_shut_cond(Condition::task_started("again").compare(CmpOp::Ge, 2));
        session
            .add_task(
                Task::new("again", TaskFn::sync(|_| Err(RunError::SchedulerRestart)))
                    .with_start_cond(true),
            )
            .unwrap();

        session.serve().await.unwrap();

        assert_eq!(count(&session, "again", Action::Run), 2);
        assert_eq!(count(&session, "again", Action::Success), 2);
        assert_eq!(session.cycles(), 1);
    }

    #[tokio::test]
    async fn shut_condition_errors_crash_the_scheduler() {
        let session = session(SessionConfig::default())
            .with_shut_cond(Condition::task_started("missing"));
        let err = session.serve().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Scheduler(SchedulerError::ShutCondition(_))
        ));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn shutdown_request_ends_the_loop() {
        let session = session(SessionConfig::default());
        session
            .add_task(
                Task::new(
                    "stop",
                    TaskFn::sync(|ctx| {
                        ctx.session.shut_down(false);
                        Ok(None)
                    }),
                )
                .with_start_cond(true),
            )
            .unwrap();

        session.serve().await.unwrap();

        assert_eq!(count(&session, "stop", Action::Success), 1);
    }

    #[tokio::test]
    async fn failing_end_condition_still_settles_runs_at_shutdown() {
        let session = session(SessionConfig {
            shutdown_grace: Duration::from_millis(200),
            ..SessionConfig::default()
        });
        let slow = session
            .add_task(
                Task::new("slow", sleeper(Duration::from_secs(30)))
                    .with_start_cond(true)
                    .with_end_cond(Condition::task_started("missing"))
                    .with_execution(Execution::Cooperative),
            )
            .unwrap();

        let err = session.serve().await.unwrap_err();

        assert!(matches!(err, Error::Task(TaskError::Condition { .. })));
        assert!(!slow.is_alive());
        let actions: Vec<Action> = records(&session).into_iter().map(|r| r.action).collect();
        assert_eq!(actions, [Action::Run, Action::Terminate]);
    }

    #[tokio::test]
    async fn failing_end_condition_waits_for_runs_at_shutdown() {
        let session = session(SessionConfig::default());
        session
            .add_task(
                Task::new("quick", sleeper(Duration::from_millis(50)))
                    .with_start_cond(true)
                    .with_end_cond(Condition::task_started("missing"))
                    .with_execution(Execution::Cooperative),
            )
            .unwrap();

        assert!(session.serve().await.is_err());

        assert_eq!(count(&session, "quick", Action::Success), 1);
        assert_eq!(count(&session, "quick", Action::Terminate), 0);
    }

    #[tokio::test]
    async fn single_launch_tasks_keep_one_live_run() {
        for (multilaunch, runs) in [(false, 1), (true, 5)] {
            let session = session(SessionConfig {
                instant_shutdown: true,
                ..SessionConfig::default()
            })
            .with_shut_cond(Condition::scheduler_cycles(CmpOp::Ge, 5));
            session
                .add_task(
                    Task::new("long", sleeper(Duration::from_secs(30)))
                        .with_start_cond(true)
                        .with_multilaunch(multilaunch)
                        .with_execution(Execution::Cooperative),
                )
                .unwrap();
            let most_alive = track_max(&session, |s| {
                s.get_task("long").map_or(0, |t| t.n_alive())
            });

            session.serve().await.unwrap();

            assert_eq!(count(&session, "long", Action::Run), runs, "multilaunch={multilaunch}");
            assert_eq!(count(&session, "long", Action::Terminate), runs);
            assert_eq!(most_alive.load(Ordering::SeqCst), runs);
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn process_runs_respect_the_process_cap() {
        use crate::task::CommandSpec;

        let session = session(SessionConfig {
            max_process_count: 1,
            instant_shutdown: true,
            ..SessionConfig::default()
        })
        .with_shut_cond(Condition::scheduler_cycles(CmpOp::Ge, 5));
        for name in ["first", "second"] {
            session
                .add_task(
                    Task::new(name, TaskFn::command(CommandSpec::new("sleep").arg("30")))
                        .with_start_cond(true)
                        .with_execution(Execution::Process),
                )
                .unwrap();
        }
        let most_processes = track_max(&session, Session::n_process_runs);

        session.serve().await.unwrap();

        assert_eq!(most_processes.load(Ordering::SeqCst), 1);
        assert_eq!(count(&session, "first", Action::Run), 1);
        assert_eq!(count(&session, "second", Action::Run), 0);
        assert_eq!(count(&session, "first", Action::Terminate), 1);
    }
}
