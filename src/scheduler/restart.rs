//! Out-of-process restarts.

use std::process::{Command, Stdio};

use crate::config::RestartPolicy;
use crate::error::SchedulerError;

/// The current program with its original arguments.
fn command() -> Result<Command, SchedulerError> {
    let exe = std::env::current_exe().map_err(SchedulerError::Relaunch)?;
    let mut cmd = Command::new(exe);
    cmd.args(std::env::args_os().skip(1));
    Ok(cmd)
}

fn spawn(mut cmd: Command) -> Result<(), SchedulerError> {
    let child = cmd.spawn().map_err(SchedulerError::Relaunch)?;
    tracing::info!(pid = child.id(), "Relaunched scheduler process");
    Ok(())
}

/// Restart per `policy`. `Recall` is handled by the serve loop and is a
/// no-op here.
pub(crate) fn restart(policy: RestartPolicy) -> Result<(), SchedulerError> {
    match policy {
        RestartPolicy::Recall => Ok(()),
        RestartPolicy::Relaunch => spawn(command()?),
        RestartPolicy::Fresh => {
            let mut cmd = command()?;
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            spawn(cmd)
        }
        RestartPolicy::Replace => replace(command()?),
    }
}

#[cfg(unix)]
fn replace(mut cmd: Command) -> Result<(), SchedulerError> {
    use std::os::unix::process::CommandExt;
    tracing::info!("Replacing scheduler process");
    // exec only returns on failure.
    Err(SchedulerError::Relaunch(cmd.exec()))
}

#[cfg(not(unix))]
fn replace(cmd: Command) -> Result<(), SchedulerError> {
    spawn(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_targets_current_executable() {
        let cmd = command().unwrap();
        assert_eq!(
            std::path::Path::new(cmd.get_program()),
            std::env::current_exe().unwrap()
        );
    }

    #[test]
    fn recall_is_a_noop() {
        assert!(restart(RestartPolicy::Recall).is_ok());
    }
}
