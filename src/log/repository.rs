//! The log repository interface and the in-memory implementation.

use std::sync::RwLock;

use chrono::NaiveDateTime;

use crate::error::RepositoryError;
use crate::log::record::{Action, LogRecord};

/// Predicate on a single record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Match<T> {
    Eq(T),
    In(Vec<T>),
    /// Inclusive on both ends.
    Between(T, T),
    Ge(T),
    Le(T),
}

impl<T: PartialOrd> Match<T> {
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Self::Eq(v) => value == v,
            Self::In(values) => values.iter().any(|v| v == value),
            Self::Between(lo, hi) => lo <= value && value <= hi,
            Self::Ge(v) => value >= v,
            Self::Le(v) => value <= v,
        }
    }
}

/// Conjunction of field predicates; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub task_name: Option<Match<String>>,
    pub action: Option<Match<Action>>,
    pub created: Option<Match<NaiveDateTime>>,
    pub run_id: Option<Match<String>>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, name: impl Into<String>) -> Self {
        self.task_name = Some(Match::Eq(name.into()));
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(Match::Eq(action));
        self
    }

    pub fn actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.action = Some(Match::In(actions.into_iter().collect()));
        self
    }

    pub fn created(mut self, predicate: Match<NaiveDateTime>) -> Self {
        self.created = Some(predicate);
        self
    }

    pub fn created_between(self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.created(Match::Between(start, end))
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(Match::Eq(run_id.into()));
        self
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        self.task_name
            .as_ref()
            .is_none_or(|m| m.matches(&record.task_name))
            && self.action.as_ref().is_none_or(|m| m.matches(&record.action))
            && self
                .created
                .as_ref()
                .is_none_or(|m| m.matches(&record.created))
            && self.run_id.as_ref().is_none_or(|m| {
                record
                    .run_id
                    .as_ref()
                    .is_some_and(|run_id| m.matches(run_id))
            })
    }
}

/// Append-only store of task lifecycle records.
///
/// Shared between the scheduler and running tasks, so implementations must
/// be safe for concurrent appends and reads. `query` returns records in
/// append order.
pub trait LogRepository: Send + Sync {
    fn append(&self, record: LogRecord) -> Result<(), RepositoryError>;

    fn query(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, RepositoryError>;

    fn count(&self, filter: &LogFilter) -> Result<usize, RepositoryError> {
        Ok(self.query(filter)?.len())
    }

    fn first(&self, filter: &LogFilter) -> Result<Option<LogRecord>, RepositoryError> {
        Ok(self.query(filter)?.into_iter().next())
    }

    fn last(&self, filter: &LogFilter) -> Result<Option<LogRecord>, RepositoryError> {
        Ok(self.query(filter)?.pop())
    }
}

impl dyn LogRepository + '_ {
    pub fn filter_by(&self, filter: LogFilter) -> LogQuery<'_> {
        LogQuery { repo: self, filter }
    }
}

/// A filter bound to a repository.
pub struct LogQuery<'a> {
    repo: &'a dyn LogRepository,
    filter: LogFilter,
}

impl LogQuery<'_> {
    pub fn all(&self) -> Result<Vec<LogRecord>, RepositoryError> {
        self.repo.query(&self.filter)
    }

    pub fn first(&self) -> Result<Option<LogRecord>, RepositoryError> {
        self.repo.first(&self.filter)
    }

    pub fn last(&self) -> Result<Option<LogRecord>, RepositoryError> {
        self.repo.last(&self.filter)
    }

    pub fn count(&self) -> Result<usize, RepositoryError> {
        self.repo.count(&self.filter)
    }
}

/// Records kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<Vec<LogRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository, e.g. with history from a previous run.
    pub fn with_records(records: Vec<LogRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogRepository for MemoryRepository {
    fn append(&self, record: LogRecord) -> Result<(), RepositoryError> {
        if record.task_name.is_empty() {
            return Err(RepositoryError::Rejected(
                "record has no task name".to_string(),
            ));
        }
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    fn query(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, RepositoryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn count(&self, filter: &LogFilter) -> Result<usize, RepositoryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().filter(|r| filter.matches(r)).count())
    }

    fn last(&self, filter: &LogFilter) -> Result<Option<LogRecord>, RepositoryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().rev().find(|r| filter.matches(r)).cloned())
    }
}
