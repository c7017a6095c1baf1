use std::sync::Arc;
use std::time::Duration;

use tickwork::{
    CmpOp, CommandSpec, Condition, Execution, JsonLinesRepository, RunError, Session,
    SessionConfig, Task, TaskFn,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing, optionally into a daily rolling file
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _guard = match std::env::var("TICKWORK_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tickwork.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    };

    let config = SessionConfig {
        handle_signals: true,
        ..SessionConfig::from_env()?
    };

    eprintln!("⏱  tickwork v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Execution: {}", config.execution);
    eprintln!("   Cycle sleep: {:?}", config.cycle_sleep);

    let mut session = Session::new(config);

    // ── Log repository ──────────────────────────────────────────────────
    if let Ok(path) = std::env::var("TICKWORK_LOG_FILE") {
        let repo = JsonLinesRepository::open(&path).unwrap_or_else(|e| {
            eprintln!("Error: Failed to open task log at {}: {}", path, e);
            std::process::exit(1);
        });
        eprintln!("   Task log: {}", path);
        session = session.with_repository(Arc::new(repo));
    } else {
        eprintln!("   Task log: in memory");
    }

    // ── Demo tasks ──────────────────────────────────────────────────────
    session.add_task(
        Task::new(
            "greet",
            TaskFn::sync(|ctx| {
                tracing::info!(run_id = %ctx.run_id, "Hello from tickwork");
                Ok(None)
            }),
        )
        .on_startup(),
    )?;

    session.add_task(
        Task::new(
            "heartbeat",
            TaskFn::from_async(|ctx| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                if ctx.is_terminated() {
                    return Err(RunError::Terminated);
                }
                Ok(Some(serde_json::json!({ "beat": ctx.run_id })))
            }),
        )
        .with_start_cond("every 10 seconds".parse::<Condition>()?)
        .with_execution(Execution::Cooperative),
    )?;

    session.add_task(
        Task::new(
            "report",
            TaskFn::sync(|ctx| match ctx.session.get_task("heartbeat") {
                Some(task) => {
                    tracing::info!(status = %task.status(), "Heartbeat status");
                    Ok(None)
                }
                None => Err(RunError::failed("heartbeat task missing")),
            }),
        )
        .with_start_cond("after task 'heartbeat' succeeded".parse::<Condition>()?),
    )?;

    if cfg!(unix) {
        session.add_task(
            Task::new(
                "uptime",
                TaskFn::command(CommandSpec::new("uptime")),
            )
            .with_start_cond("every 1 minute".parse::<Condition>()?)
            .with_execution(Execution::Process),
        )?;
    }

    session.add_task(
        Task::new(
            "farewell",
            TaskFn::sync(|ctx| {
                tracing::info!(cycles = ctx.session.cycles(), "Goodbye");
                Ok(None)
            }),
        )
        .on_shutdown(),
    )?;

    if let Ok(limit) = std::env::var("TICKWORK_MAX_CYCLES") {
        let limit: u64 = limit.parse()?;
        session.set_shut_cond(Condition::scheduler_cycles(CmpOp::Ge, limit));
    }

    eprintln!("   Tasks: {}", session.task_names().join(", "));
    eprintln!("   Press Ctrl+C to stop.\n");

    session.serve().await?;
    Ok(())
}
