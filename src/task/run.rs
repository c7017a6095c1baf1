//! Live executions of a task.

use chrono::NaiveDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Execution;
use crate::session::PostHook;

/// How to reach a run once it has been dispatched.
pub(crate) enum RunHandle {
    /// Pushed but not yet dispatched.
    Pending,
    /// Awaited by the scheduler; done by the time anyone looks.
    Inline,
    Cooperative(JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
    Process {
        /// Tells the supervisor to kill the child.
        kill: Option<oneshot::Sender<()>>,
        join: Option<JoinHandle<()>>,
    },
}

impl RunHandle {
    pub(crate) fn is_finished(&self) -> bool {
        match self {
            Self::Pending => false,
            Self::Inline => true,
            Self::Cooperative(handle) => handle.is_finished(),
            Self::Thread(handle) => handle.is_finished(),
            Self::Process { join, .. } => join.as_ref().is_none_or(|j| j.is_finished()),
        }
    }
}

/// One entry of a task's run stack.
pub(crate) struct TaskRun {
    pub run_id: String,
    pub start: NaiveDateTime,
    pub execution: Execution,
    pub terminate: CancellationToken,
    pub handle: RunHandle,
    /// Set when the terminal record could not be logged at all.
    pub failure: Option<String>,
    /// Second halves of `task_execute` hooks, called with the outcome.
    pub post_hooks: Vec<PostHook>,
}

impl TaskRun {
    pub(crate) fn new(run_id: String, start: NaiveDateTime, execution: Execution) -> Self {
        Self {
            run_id,
            start,
            execution,
            terminate: CancellationToken::new(),
            handle: RunHandle::Pending,
            failure: None,
            post_hooks: Vec::new(),
        }
    }

    /// Whether the run's executor is gone.
    pub(crate) fn is_dead(&self) -> bool {
        self.handle.is_finished()
    }
}

impl std::fmt::Debug for TaskRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRun")
            .field("run_id", &self.run_id)
            .field("start", &self.start)
            .field("execution", &self.execution)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}
