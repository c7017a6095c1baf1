//! Task lifecycle records.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle transition recorded for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Run,
    Success,
    Fail,
    Terminate,
    Inaction,
    Crash,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Run,
        Action::Success,
        Action::Fail,
        Action::Terminate,
        Action::Inaction,
        Action::Crash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Terminate => "terminate",
            Self::Inaction => "inaction",
            Self::Crash => "crash",
        }
    }

    /// Whether the action closes a run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Run)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

/// One immutable entry in the log repository.
///
/// This is also the wire format of the log queue fed by process runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub task_name: String,
    pub action: Action,
    /// Session time at which the record was created.
    pub created: NaiveDateTime,
    /// Joins a `run` record with its terminal record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<std::time::Duration>,
    #[serde(default)]
    pub message: String,
    /// Error description for `fail` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exc_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
}

impl LogRecord {
    pub fn new(task_name: impl Into<String>, action: Action, created: NaiveDateTime) -> Self {
        Self {
            task_name: task_name.into(),
            action,
            created,
            run_id: None,
            start: None,
            end: None,
            runtime: None,
            message: String::new(),
            exc_info: None,
            return_value: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_start(mut self, start: NaiveDateTime) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the end time and derive the runtime from the start, if known.
    pub fn with_end(mut self, end: NaiveDateTime) -> Self {
        self.end = Some(end);
        if let Some(start) = self.start {
            self.runtime = (end - start).to_std().ok();
        }
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_exc_info(mut self, exc_info: impl Into<String>) -> Self {
        self.exc_info = Some(exc_info.into());
        self
    }

    pub fn with_return_value(mut self, value: Option<Value>) -> Self {
        self.return_value = value;
        self
    }
}
