use std::time::Duration;

use anyhow::Result;

use crate::config::SandboxConfig;

use super::RunResult;

/// Trait for different sandbox execution implementations
///
/// This trait abstracts the one operation the orchestration layer needs:
/// running a code string to completion or deadline and handing back its
/// captured output. Callers never depend on whether the code ran in a bare
/// host process or inside a disposable container.
pub trait SandboxRunner: Send + Sync {
    /// Creates a new sandbox runner instance from the configuration
    ///
    /// Fails when the isolation machinery itself is unusable (missing
    /// interpreter, unreachable container engine).
    fn build(config: &SandboxConfig) -> Result<Self>
    where
        Self: Sized;

    /// Runs a code string and returns its captured stdout/stderr/exit status
    ///
    /// Always returns within `timeout` plus a small teardown grace period.
    /// A run that exceeds the deadline is killed and still yields an
    /// `Ok(RunResult)` with whatever output was written and a negative
    /// returncode. `Err` means the sandbox could not execute the code at
    /// all and no run took place.
    fn run(&self, code: &str, timeout: Duration) -> Result<RunResult>;
}
