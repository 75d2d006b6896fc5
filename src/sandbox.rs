mod docker_runner;
mod local_runner;
mod runner;

// Re-export the trait and common types
use docker_runner::DockerRunner;
use local_runner::LocalRunner;
pub use runner::SandboxRunner;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tokio::process::Child;

use crate::config::{SandboxConfig, SandboxMode};

/// Captured outcome of one code execution
///
/// A nonzero `returncode` means the executed code itself failed or was
/// killed; a failure of the sandbox machinery is an `Err` from
/// [`SandboxRunner::run`] instead, never a fabricated `RunResult`.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

/// Creates a sandbox runner based on the configured isolation strategy
///
/// The docker strategy fails fast here when the engine cannot be invoked,
/// so a misconfigured deployment never starts accepting runs.
pub fn create_sandbox_runner(config: &SandboxConfig) -> Result<Box<dyn SandboxRunner>> {
    match config.mode {
        SandboxMode::Local => {
            log::info!("Creating LocalRunner (no isolation mode)");
            let runner = LocalRunner::build(config)?;
            Ok(Box::new(runner))
        }
        SandboxMode::Docker => {
            log::info!("Creating DockerRunner with image {}", config.image);
            let runner = DockerRunner::build(config)?;
            Ok(Box::new(runner))
        }
    }
}

/// Maps a process exit status to the stored returncode
///
/// Death by signal N is reported as -N, so a run killed at the deadline
/// shows up as -9.
#[cfg(unix)]
pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Kills a timed-out child and everything it spawned, then reaps it
///
/// Retries the kill once before escalating; teardown must succeed on every
/// exit path or the host leaks processes.
pub(crate) async fn terminate(child: &mut Child) -> Result<std::process::ExitStatus> {
    for attempt in 1..=2 {
        match send_kill(child) {
            Ok(()) => return Ok(child.wait().await?),
            Err(e) if attempt == 1 => {
                log::warn!("Kill attempt {attempt} failed: {e}, retrying");
            }
            Err(e) => return Err(anyhow!("failed to terminate timed-out process: {e}")),
        }
    }
    unreachable!("kill loop always returns")
}

/// Signals the child's whole process group so grandchildren (shells,
/// interpreters forking workers) do not outlive the deadline.
#[cfg(unix)]
fn send_kill(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    let ret = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Group already gone
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn send_kill(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
