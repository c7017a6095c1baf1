//! The session: tasks, parameters, hooks, configuration, the clock, the log
//! repository and the scheduler state, shared by everything that runs.

pub mod hooks;

pub use hooks::{Hook, HookEvent, HookKind, HookOutcome, Hooks, PostHook};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use crate::conditions::{Condition, ObserveContext};
use crate::config::{Execution, SessionConfig};
use crate::error::{Error, SchedulerError, SessionError, TaskError};
use crate::log::{LogRecord, LogRepository, MemoryRepository};
use crate::scheduler::Scheduler;
use crate::task::{Parameters, Task};
use crate::time::Clock;

type RunIdFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Flags and counters of the scheduler loop, readable by conditions.
#[derive(Debug, Default)]
pub(crate) struct SchedulerState {
    pub cycles: AtomicU64,
    pub running: AtomicBool,
    /// Graceful shutdown requested.
    pub shutdown: AtomicBool,
    /// Terminate everything at shutdown.
    pub force_exit: AtomicBool,
    pub restart: AtomicBool,
    /// No new launches while set.
    pub paused: AtomicBool,
    pub started_at: Mutex<Option<NaiveDateTime>>,
    /// Cuts the cycle sleep short when a flag changes.
    pub wake: Notify,
}

struct SessionInner {
    config: SessionConfig,
    tasks: RwLock<Vec<Arc<Task>>>,
    parameters: RwLock<Parameters>,
    hooks: RwLock<Hooks>,
    clock: RwLock<Clock>,
    repository: RwLock<Arc<dyn LogRepository>>,
    shut_cond: RwLock<Condition>,
    run_id_fn: RwLock<RunIdFn>,
    /// Records posted by process runs, drained by the scheduler.
    queue_tx: mpsc::UnboundedSender<LogRecord>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LogRecord>>,
    scheduler: SchedulerState,
}

/// Handle to a session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("tasks", &self.task_names())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let clock = match config.utc_offset_secs {
            Some(offset) => Clock::with_utc_offset(offset),
            None => Clock::system(),
        };
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(SessionInner {
                config,
                tasks: RwLock::new(Vec::new()),
                parameters: RwLock::new(Parameters::new()),
                hooks: RwLock::new(Hooks::default()),
                clock: RwLock::new(clock),
                repository: RwLock::new(Arc::new(MemoryRepository::new())),
                shut_cond: RwLock::new(Condition::AlwaysFalse),
                run_id_fn: RwLock::new(Arc::new(|| uuid::Uuid::new_v4().to_string())),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                scheduler: SchedulerState::default(),
            }),
        }
    }

    // ── Builder ─────────────────────────────────────────────────────────

    pub fn with_clock(self, clock: Clock) -> Self {
        *write(&self.inner.clock) = clock;
        self
    }

    /// Read time from `f` instead of the system clock.
    pub fn with_time_func(self, f: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.with_clock(Clock::custom(f))
    }

    pub fn with_repository(self, repository: Arc<dyn LogRepository>) -> Self {
        *write(&self.inner.repository) = repository;
        self
    }

    pub fn with_shut_cond(self, cond: impl Into<Condition>) -> Self {
        self.set_shut_cond(cond);
        self
    }

    pub fn with_run_id_fn(self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        *write(&self.inner.run_id_fn) = Arc::new(f);
        self
    }

    pub fn with_parameters(self, parameters: Parameters) -> Self {
        *write(&self.inner.parameters) = parameters;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current session time. Everything that timestamps goes through here.
    pub fn now(&self) -> NaiveDateTime {
        read(&self.inner.clock).now()
    }

    pub fn get_time(&self) -> NaiveDateTime {
        self.now()
    }

    pub fn repository(&self) -> Arc<dyn LogRepository> {
        read(&self.inner.repository).clone()
    }

    pub fn shut_cond(&self) -> Condition {
        read(&self.inner.shut_cond).clone()
    }

    pub fn set_shut_cond(&self, cond: impl Into<Condition>) {
        *write(&self.inner.shut_cond) = cond.into();
    }

    pub fn new_run_id(&self) -> String {
        let f = read(&self.inner.run_id_fn).clone();
        f()
    }

    // ── Parameters ──────────────────────────────────────────────────────

    pub fn parameters(&self) -> Parameters {
        read(&self.inner.parameters).clone()
    }

    pub fn parameter(&self, key: &str) -> Option<Value> {
        read(&self.inner.parameters).get(key).cloned()
    }

    pub fn set_parameter(&self, key: impl Into<String>, value: impl Into<Value>) {
        write(&self.inner.parameters).insert(key.into(), value.into());
    }

    pub fn remove_parameter(&self, key: &str) -> Option<Value> {
        write(&self.inner.parameters).remove(key)
    }

    // ── Hooks ───────────────────────────────────────────────────────────

    pub fn add_hook(
        &self,
        kind: HookKind,
        hook: impl Fn(&HookEvent<'_>) -> Option<PostHook> + Send + Sync + 'static,
    ) {
        write(&self.inner.hooks).add(kind, Arc::new(hook));
    }

    pub fn hooks(&self) -> Hooks {
        read(&self.inner.hooks).clone()
    }

    /// Call the pre halves of `kind` hooks without holding the hook lock.
    pub(crate) fn call_hooks(
        &self,
        kind: HookKind,
        task: Option<&str>,
        run_id: Option<&str>,
    ) -> Vec<PostHook> {
        let hooks = self.hooks();
        hooks.call(&HookEvent {
            kind,
            session: self,
            task,
            run_id,
        })
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    /// Register a task; names are unique.
    pub fn add_task(&self, task: Task) -> Result<Arc<Task>, SessionError> {
        let task = Arc::new(task);
        {
            let mut tasks = write(&self.inner.tasks);
            if tasks.iter().any(|t| t.name == task.name) {
                return Err(SessionError::DuplicateTask {
                    name: task.name.clone(),
                });
            }
            tasks.push(task.clone());
        }
        tracing::debug!(task = %task.name, "Task added");
        let post = self.call_hooks(HookKind::TaskInit, Some(&task.name), None);
        hooks::finish_hooks(post, &HookOutcome::default());
        Ok(task)
    }

    pub fn remove_task(&self, name: &str) -> Result<Arc<Task>, SessionError> {
        let mut tasks = write(&self.inner.tasks);
        let index = tasks
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| SessionError::UnknownTask {
                name: name.to_string(),
            })?;
        Ok(tasks.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        read(&self.inner.tasks).iter().any(|t| t.name == name)
    }

    pub fn get_task(&self, name: &str) -> Option<Arc<Task>> {
        read(&self.inner.tasks)
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    pub fn task(&self, name: &str) -> Result<Arc<Task>, SessionError> {
        self.get_task(name).ok_or_else(|| SessionError::UnknownTask {
            name: name.to_string(),
        })
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        read(&self.inner.tasks).clone()
    }

    pub fn task_names(&self) -> Vec<String> {
        read(&self.inner.tasks)
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    /// Highest priority first; ties keep insertion order.
    pub fn tasks_by_priority(&self) -> Vec<Arc<Task>> {
        let mut tasks = self.tasks();
        tasks.sort_by_key(|t| std::cmp::Reverse(t.priority));
        tasks
    }

    /// Live process runs across all tasks.
    pub(crate) fn n_process_runs(&self) -> usize {
        read(&self.inner.tasks)
            .iter()
            .map(|t| t.n_alive_with(Execution::Process))
            .sum()
    }

    // ── Log queue ───────────────────────────────────────────────────────

    pub(crate) fn queue_sender(&self) -> mpsc::UnboundedSender<LogRecord> {
        self.inner.queue_tx.clone()
    }

    pub(crate) fn queue_receiver(
        &self,
    ) -> &tokio::sync::Mutex<mpsc::UnboundedReceiver<LogRecord>> {
        &self.inner.queue_rx
    }

    /// Append every queued record through its task. Returns how many were
    /// handled.
    pub async fn drain_log_queue(&self) -> Result<usize, TaskError> {
        let mut rx = self.inner.queue_rx.lock().await;
        let mut handled = 0;
        while let Ok(record) = rx.try_recv() {
            self.route_record(record)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Log a queued record through the task it names. Logging errors are
    /// raised only when `silence_task_logging` is off.
    pub(crate) fn route_record(&self, record: LogRecord) -> Result<(), TaskError> {
        let Some(task) = self.get_task(&record.task_name) else {
            tracing::warn!(
                task = %record.task_name,
                action = %record.action,
                "Dropping queued record for unknown task"
            );
            return Ok(());
        };
        match task.log_record(self, record) {
            Ok(()) => Ok(()),
            Err(e) if self.config().silence_task_logging => {
                tracing::warn!(task = %task.name, "Queued record not logged: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ── Scheduler control ───────────────────────────────────────────────

    pub(crate) fn scheduler_state(&self) -> &SchedulerState {
        &self.inner.scheduler
    }

    /// Run the scheduler until it shuts down.
    pub async fn serve(&self) -> Result<(), Error> {
        Scheduler::new(self.clone()).serve().await
    }

    /// Blocking variant of [`serve`](Self::serve) on a fresh runtime.
    pub fn start(&self) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Crashed(format!("runtime: {e}")))?;
        runtime.block_on(self.serve())
    }

    /// Ask the scheduler to stop; `force` terminates live runs instead of
    /// waiting for them.
    pub fn shut_down(&self, force: bool) {
        let state = self.scheduler_state();
        state.shutdown.store(true, Ordering::SeqCst);
        if force {
            state.force_exit.store(true, Ordering::SeqCst);
        }
        state.wake.notify_one();
    }

    /// Shut down and start again per the restart policy.
    pub fn restart(&self) {
        let state = self.scheduler_state();
        state.restart.store(true, Ordering::SeqCst);
        state.wake.notify_one();
    }

    /// Stop launching new runs; live runs continue.
    pub fn pause(&self) {
        self.scheduler_state().paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.scheduler_state().paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler_state().paused.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.scheduler_state().running.load(Ordering::SeqCst)
    }

    /// Completed cycles of the current (or last) scheduler run.
    pub fn cycles(&self) -> u64 {
        self.scheduler_state().cycles.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        *self
            .scheduler_state()
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    // ── Manual runs ─────────────────────────────────────────────────────

    /// Launch the named tasks now and wait until their runs finish.
    ///
    /// `execution` overrides the tasks' own; with `obey_cond` a task whose
    /// `start_cond` is false is skipped.
    pub async fn run(
        &self,
        names: &[&str],
        execution: Option<Execution>,
        obey_cond: bool,
    ) -> Result<(), Error> {
        let tasks = names
            .iter()
            .map(|name| self.task(name))
            .collect::<Result<Vec<_>, _>>()?;

        for task in &tasks {
            let _guard = task.lock.lock().await;
            self.drain_log_queue().await?;
            if obey_cond {
                let ctx = ObserveContext::for_task(self, task);
                if !task.start_cond.observe(&ctx)? {
                    tracing::debug!(task = %task.name, "Start condition false, skipping");
                    continue;
                }
            }
            let execution = execution
                .or(task.execution)
                .unwrap_or(self.config().execution);
            task.launch(self, execution).await?;
        }

        loop {
            self.drain_log_queue().await?;
            for task in &tasks {
                task.prune_dead(self)?;
            }
            if tasks.iter().all(|t| !t.is_alive()) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
