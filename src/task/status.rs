//! Task status and the cache of last lifecycle times.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::log::{Action, LogRecord};

/// Latest known state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Nothing logged yet.
    #[default]
    Pending,
    Run,
    Success,
    Fail,
    Terminate,
    Inaction,
    Crash,
}

impl From<Action> for TaskStatus {
    fn from(action: Action) -> Self {
        match action {
            Action::Run => Self::Run,
            Action::Success => Self::Success,
            Action::Fail => Self::Fail,
            Action::Terminate => Self::Terminate,
            Action::Inaction => Self::Inaction,
            Action::Crash => Self::Crash,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Run => "run",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Terminate => "terminate",
            Self::Inaction => "inaction",
            Self::Crash => "crash",
        };
        f.write_str(s)
    }
}

/// Last time each action was logged for a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCache {
    pub status: TaskStatus,
    pub last_run: Option<NaiveDateTime>,
    pub last_success: Option<NaiveDateTime>,
    pub last_fail: Option<NaiveDateTime>,
    pub last_terminate: Option<NaiveDateTime>,
    pub last_inaction: Option<NaiveDateTime>,
    pub last_crash: Option<NaiveDateTime>,
    /// Newest `created` seen, used to keep record times monotonic.
    pub last_created: Option<NaiveDateTime>,
}

impl StatusCache {
    /// Rebuild from a task's records in append order.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a LogRecord>) -> Self {
        let mut cache = Self::default();
        for record in records {
            cache.observe(record.action, record.created);
        }
        cache
    }

    pub fn observe(&mut self, action: Action, created: NaiveDateTime) {
        self.status = action.into();
        *self.slot(action) = Some(created);
        self.last_created = Some(self.last_created.map_or(created, |t| t.max(created)));
    }

    pub fn last(&self, action: Action) -> Option<NaiveDateTime> {
        match action {
            Action::Run => self.last_run,
            Action::Success => self.last_success,
            Action::Fail => self.last_fail,
            Action::Terminate => self.last_terminate,
            Action::Inaction => self.last_inaction,
            Action::Crash => self.last_crash,
        }
    }

    /// Latest time any of `actions` was logged.
    pub fn last_of(&self, actions: &[Action]) -> Option<NaiveDateTime> {
        actions.iter().filter_map(|a| self.last(*a)).max()
    }

    fn slot(&mut self, action: Action) -> &mut Option<NaiveDateTime> {
        match action {
            Action::Run => &mut self.last_run,
            Action::Success => &mut self.last_success,
            Action::Fail => &mut self.last_fail,
            Action::Terminate => &mut self.last_terminate,
            Action::Inaction => &mut self.last_inaction,
            Action::Crash => &mut self.last_crash,
        }
    }
}
