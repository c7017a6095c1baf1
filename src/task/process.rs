//! Child-process bodies.
//!
//! A [`CommandSpec`] runs with `TICKWORK_TASK`, `TICKWORK_RUN_ID` and
//! `TICKWORK_PARAMS` (JSON) in its environment. Its exit code decides the
//! outcome: 0 is success with the last non-empty stdout line as return
//! value, [`EXIT_INACTION`], [`EXIT_RESTART`] and [`EXIT_SHUTDOWN`] are
//! the sentinels, anything else fails with the tail of stderr.

use std::future::Future;
use std::process::{ExitStatus, Stdio};

use chrono::NaiveDateTime;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RunError;
use crate::log::{Action, LogRecord};
use crate::task::body::{CommandSpec, RunResult, TaskContext};
use crate::task::lifecycle::terminal_record;

pub const EXIT_INACTION: i32 = 3;
pub const EXIT_RESTART: i32 = 4;
pub const EXIT_SHUTDOWN: i32 = 5;

const STDERR_TAIL_LINES: usize = 20;

/// Run a command to completion for the in-process executions. Termination
/// kills the child.
pub(crate) async fn run_command(spec: &CommandSpec, ctx: TaskContext) -> RunResult {
    let child = command(spec, &ctx).spawn()?;
    let stop = ctx.terminate_token();
    match drive(child, async move { stop.cancelled().await }).await {
        Some(outcome) => outcome,
        None => Err(RunError::Terminated),
    }
}

/// Owns a process run: posts its `run` record, waits for the child and
/// posts the terminal record. A kill request ends the supervisor without a
/// terminal record; the scheduler logs `terminate` itself.
pub(crate) async fn supervise(
    spec: CommandSpec,
    ctx: TaskContext,
    start: NaiveDateTime,
    queue: mpsc::UnboundedSender<LogRecord>,
    kill: oneshot::Receiver<()>,
) {
    let run = LogRecord::new(&ctx.task_name, Action::Run, start)
        .with_run_id(&ctx.run_id)
        .with_start(start);
    if queue.send(run).is_err() {
        return;
    }

    let outcome = match command(&spec, &ctx).spawn() {
        Ok(child) => {
            let stop = async move {
                // A dropped sender only detaches the supervisor.
                if kill.await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            match drive(child, stop).await {
                Some(outcome) => outcome,
                None => {
                    tracing::debug!(task = %ctx.task_name, run_id = %ctx.run_id, "Child killed");
                    return;
                }
            }
        }
        Err(e) => Err(RunError::failed(format!(
            "failed to spawn '{}': {e}",
            spec.program
        ))),
    };

    let end = ctx.session.now();
    let (record, signal) = terminal_record(&ctx.task_name, &ctx.run_id, start, end, outcome, false);
    if queue.send(record).is_err() {
        return;
    }
    match signal {
        Some(RunError::SchedulerRestart) => ctx.session.restart(),
        Some(RunError::SchedulerExit) => ctx.session.shut_down(false),
        _ => {}
    }
}

fn command(spec: &CommandSpec, ctx: &TaskContext) -> Command {
    let params = serde_json::to_string(&ctx.params).unwrap_or_else(|_| "{}".to_string());
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env("TICKWORK_TASK", &ctx.task_name)
        .env("TICKWORK_RUN_ID", &ctx.run_id)
        .env("TICKWORK_PARAMS", params)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    cmd
}

/// Wait for the child, or kill it once `stop` resolves (`None`).
async fn drive(mut child: Child, stop: impl Future<Output = ()>) -> Option<RunResult> {
    let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_output(pipe)));
    let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_output(pipe)));
    tokio::pin!(stop);

    let status = tokio::select! {
        status = child.wait() => status,
        () = &mut stop => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill child process: {}", e);
            }
            return None;
        }
    };

    let stdout = join_output(stdout).await;
    let stderr = join_output(stderr).await;
    Some(match status {
        Ok(status) => exit_outcome(status, &stdout, &stderr),
        Err(e) => Err(e.into()),
    })
}

async fn read_output(mut pipe: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        tracing::debug!("Child output read failed: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn join_output(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

pub(crate) fn exit_outcome(status: ExitStatus, stdout: &str, stderr: &str) -> RunResult {
    match status.code() {
        Some(0) => Ok(stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
            })),
        Some(EXIT_INACTION) => Err(RunError::Inaction),
        Some(EXIT_RESTART) => Err(RunError::SchedulerRestart),
        Some(EXIT_SHUTDOWN) => Err(RunError::SchedulerExit),
        Some(code) => Err(RunError::failed(with_tail(
            format!("exited with code {code}"),
            stderr,
        ))),
        None => Err(RunError::failed(with_tail(
            "terminated by signal".to_string(),
            stderr,
        ))),
    }
}

fn with_tail(head: String, stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    if tail.trim().is_empty() {
        head
    } else {
        format!("{head}\n{tail}")
    }
}
