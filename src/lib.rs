//! tickwork: an in-process task scheduler driven by conditions.

pub mod conditions;
pub mod config;
pub mod error;
pub mod log;
pub mod scheduler;
pub mod session;
pub mod task;
pub mod time;

pub use conditions::{CmpOp, Condition, DependKind, HistoryKind, ObserveContext, parse};
pub use config::{Execution, RestartPolicy, SessionConfig};
pub use error::{Error, RunError};
pub use log::{Action, JsonLinesRepository, LogFilter, LogRecord, LogRepository, MemoryRepository};
pub use session::{HookKind, HookOutcome, Session};
pub use task::{CommandSpec, Task, TaskContext, TaskFn, TaskStatus};
pub use time::{
    MockClock, TimeDelta, TimeOfDay, TimeOfHour, TimeOfMinute, TimeOfMonth, TimeOfWeek,
    TimeOfYear, TimePeriod,
};
