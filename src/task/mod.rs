//! Tasks: definitions, bodies, live runs and their lifecycle.

pub mod body;
pub mod definition;
mod lifecycle;
pub mod process;
pub(crate) mod run;
pub mod status;

pub use body::{CommandSpec, Parameters, RunResult, TaskContext, TaskFn, TaskHandler};
pub use definition::Task;
pub use process::{EXIT_INACTION, EXIT_RESTART, EXIT_SHUTDOWN};
pub use status::{StatusCache, TaskStatus};
