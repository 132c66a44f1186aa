use std::process::Command;

use crate::error::Result;
use crate::run::state::ResumeState;

/// Replace the current process with a successor that resumes `state`.
///
/// On Unix this `exec`s the current executable and only returns on failure. Elsewhere the
/// successor is spawned and waited for, and its exit code is returned.
pub fn restart_process(state: &ResumeState) -> Result<i32> {
    let exe = std::env::current_exe()?;
    let args = state.successor_args(std::env::args().skip(1));
    tracing::info!(
        run.cursor = state.cursor,
        queue.path = %state.queue_path.display(),
        "restarting indexer"
    );
    log::debug!("successor arguments: {args:?}");

    let mut command = Command::new(exe);
    command.args(&args);
    replace(command)
}

#[cfg(unix)]
fn replace(mut command: Command) -> Result<i32> {
    use std::os::unix::process::CommandExt;

    Err(command.exec().into())
}

#[cfg(not(unix))]
fn replace(mut command: Command) -> Result<i32> {
    let status = command.status()?;
    Ok(status.code().unwrap_or(1))
}
