//! Error types for tickwork.

use std::time::Duration;

use crate::log::Action;

/// Top-level error type for the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Time period error: {0}")]
    Period(#[from] PeriodError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Log repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Condition error: {0}")]
    Condition(#[from] ConditionError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors building time periods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("Invalid {scope} anchor '{value}': {reason}")]
    InvalidAnchor {
        scope: String,
        value: String,
        reason: String,
    },

    #[error("Offset {offset}us out of range for {scope} (max {max}us)")]
    OffsetOutOfRange { scope: String, offset: i64, max: i64 },

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}

/// Errors from the condition string parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("Unexpected end of condition string")]
    UnexpectedEnd,

    #[error("Unbalanced quotes in '{0}'")]
    UnbalancedQuotes(String),

    #[error("Unknown condition '{0}'")]
    UnknownCondition(String),

    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("Invalid datetime '{0}'")]
    InvalidDatetime(String),

    #[error("Invalid period in '{input}': {source}")]
    Period {
        input: String,
        #[source]
        source: PeriodError,
    },
}

/// Log repository errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while observing a condition.
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("Task '{name}' not found")]
    UnknownTask { name: String },

    #[error("Condition '{condition}' needs a task but none is in context")]
    MissingTask { condition: String },

    #[error("Condition '{condition}' failed: {reason}")]
    CheckFailed { condition: String, reason: String },

    #[error("Repository query failed: {0}")]
    Repository(#[from] RepositoryError),
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Failure between dispatch and the first `run` record.
    #[error("Task '{task}' setup failed: {reason}")]
    Setup { task: String, reason: String },

    /// The log repository rejected a lifecycle record.
    #[error("Task '{task}' could not log '{action}': {reason}")]
    Logging {
        task: String,
        action: Action,
        reason: String,
    },

    #[error("Task '{task}' is already running and does not allow multilaunch")]
    AlreadyRunning { task: String },

    #[error("Task '{task}' did not report its start within {timeout:?}")]
    StartTimeout { task: String, timeout: Duration },

    #[error("Task '{task}' condition check failed: {source}")]
    Condition {
        task: String,
        #[source]
        source: ConditionError,
    },
}

/// Session-level errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Task '{name}' already exists")]
    DuplicateTask { name: String },

    #[error("Task '{name}' not found")]
    UnknownTask { name: String },

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

/// Scheduler lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Shut condition failed: {0}")]
    ShutCondition(#[source] ConditionError),

    #[error("Failed to relaunch process: {0}")]
    Relaunch(#[source] std::io::Error),

    #[error("Scheduler crashed: {0}")]
    Crashed(String),
}

/// Outcome signals a task body can return instead of a value.
///
/// `Inaction` and `Terminated` are logged as `inaction` / `terminate`;
/// the scheduler signals are logged as `success` and then act on the
/// scheduler. Everything else is a failure.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Task reported inaction")]
    Inaction,

    #[error("Task was terminated")]
    Terminated,

    #[error("{message}")]
    Failed { message: String },

    #[error("Task requested a scheduler restart")]
    SchedulerRestart,

    #[error("Task requested a scheduler exit")]
    SchedulerExit,
}

impl RunError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        Self::failed(format!("{e:#}"))
    }
}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        Self::failed(e.to_string())
    }
}

impl From<serde_json::Error> for RunError {
    fn from(e: serde_json::Error) -> Self {
        Self::failed(e.to_string())
    }
}

/// Result type alias for tickwork.
pub type Result<T> = std::result::Result<T, Error>;
