//! Task bodies and the context they run with.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::session::Session;

/// Named parameters passed to task bodies.
pub type Parameters = BTreeMap<String, Value>;

/// What a task body returns: an optional value stored on the `success`
/// record, or one of the [`RunError`] outcomes.
pub type RunResult = Result<Option<Value>, RunError>;

/// Everything a running body can see.
#[derive(Clone)]
pub struct TaskContext {
    pub task_name: String,
    pub run_id: String,
    /// Session parameters overlaid with the task's own, filtered to the
    /// names the task accepts.
    pub params: Parameters,
    pub session: Session,
    terminate: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        task_name: String,
        run_id: String,
        params: Parameters,
        session: Session,
        terminate: CancellationToken,
    ) -> Self {
        Self {
            task_name,
            run_id,
            params,
            session,
            terminate,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Deserialize a parameter; a missing or mistyped value fails the run.
    pub fn param_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, RunError> {
        let value = self
            .params
            .get(key)
            .ok_or_else(|| RunError::failed(format!("missing parameter '{key}'")))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Whether the scheduler asked this run to stop.
    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// `Err(RunError::Terminated)` once termination was requested, for
    /// bodies polling between steps.
    pub fn check_terminated(&self) -> Result<(), RunError> {
        if self.is_terminated() {
            Err(RunError::Terminated)
        } else {
            Ok(())
        }
    }

    /// Resolves when termination is requested.
    pub async fn terminated(&self) {
        self.terminate.cancelled().await
    }

    pub fn terminate_token(&self) -> CancellationToken {
        self.terminate.clone()
    }
}

/// Asynchronous task body.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> RunResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = RunResult> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> RunResult {
        (self.0)(ctx).await
    }
}

/// A program to run for process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// The work a task performs.
#[derive(Clone)]
pub enum TaskFn {
    /// Blocking function; runs on a blocking thread unless the execution
    /// is `thread`.
    Sync(Arc<dyn Fn(TaskContext) -> RunResult + Send + Sync>),
    Async(Arc<dyn TaskHandler>),
    /// External program. The only body usable with process execution.
    Command(CommandSpec),
}

impl TaskFn {
    pub fn sync(f: impl Fn(TaskContext) -> RunResult + Send + Sync + 'static) -> Self {
        Self::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunResult> + Send + 'static,
    {
        Self::Async(Arc::new(FnHandler(f)))
    }

    pub fn handler(handler: impl TaskHandler + 'static) -> Self {
        Self::Async(Arc::new(handler))
    }

    pub fn command(spec: CommandSpec) -> Self {
        Self::Command(spec)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sync(_) => "sync",
            Self::Async(_) => "async",
            Self::Command(_) => "command",
        }
    }
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(spec) => f.debug_tuple("Command").field(spec).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(params: Parameters) -> TaskContext {
        TaskContext::new(
            "t".to_string(),
            "r".to_string(),
            params,
            Session::default(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn typed_parameters() {
        let mut params = Parameters::new();
        params.insert("limit".to_string(), Value::from(5));
        let ctx = context(params);
        assert_eq!(ctx.param_as::<u32>("limit").unwrap(), 5);
        assert!(matches!(ctx.param_as::<u32>("missing"), Err(RunError::Failed { .. })));
        assert!(matches!(ctx.param_as::<String>("limit"), Err(RunError::Failed { .. })));
    }

    #[test]
    fn termination_is_observable() {
        let ctx = context(Parameters::new());
        assert!(ctx.check_terminated().is_ok());
        ctx.terminate_token().cancel();
        assert!(ctx.is_terminated());
        assert!(matches!(ctx.check_terminated(), Err(RunError::Terminated)));
    }

    #[test]
    fn command_builder() {
        let spec = CommandSpec::new("sh").arg("-c").arg("exit 0").env("A", "1");
        assert_eq!(spec.args, vec!["-c", "exit 0"]);
        assert_eq!(spec.env, vec![("A".to_string(), "1".to_string())]);
        assert_eq!(format!("{:?}", TaskFn::command(spec)).starts_with("Command"), true);
    }
}
