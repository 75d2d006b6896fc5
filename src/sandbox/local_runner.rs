use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::Local;
use tokio::time::timeout;

use crate::config::SandboxConfig;

use super::{RunResult, SandboxRunner, exit_code, terminate};

/// A runner that executes code as a plain host process
///
/// LocalRunner writes the submitted code to a scratch file and hands it to
/// the configured interpreter. It only enforces the wall-clock deadline; no
/// memory, network, or filesystem restriction applies. Intended for
/// trusted/dev environments.
pub struct LocalRunner {
    /// Interpreter argv prefix, e.g. ["python3"]
    command: Vec<String>,
    /// Name the code file is written under
    file_name: String,
    /// Parent directory for per-run scratch directories
    work_dir: PathBuf,
    /// Distinguishes concurrent runs within the same timestamp
    seq: AtomicU64,
}

impl SandboxRunner for LocalRunner {
    fn build(config: &SandboxConfig) -> Result<Self> {
        if config.command.is_empty() {
            bail!("sandbox command must not be empty");
        }

        let interpreter_found = std::process::Command::new("which")
            .arg(&config.command[0])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !interpreter_found {
            bail!("interpreter {:?} not found on PATH", config.command[0]);
        }

        let work_dir = std::env::temp_dir().join("runlab-local");
        fs::create_dir_all(&work_dir)?;

        log::info!("LocalRunner initialized successfully");
        log::warn!("LocalRunner provides NO security isolation - use only in trusted environments");

        Ok(Self {
            command: config.command.clone(),
            file_name: config.file_name.clone(),
            work_dir,
            seq: AtomicU64::new(0),
        })
    }

    fn run(&self, code: &str, timeout: Duration) -> Result<RunResult> {
        let run_dir = self.create_run_dir()?;

        let result = tokio::runtime::Handle::current()
            .block_on(self.run_process(code, timeout, &run_dir));

        if let Err(e) = fs::remove_dir_all(&run_dir) {
            log::warn!("Failed to remove run directory {}: {e}", run_dir.display());
        }

        result
    }
}

impl LocalRunner {
    /// Creates a fresh scratch directory for one run
    fn create_run_dir(&self) -> Result<PathBuf> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let run_dir = self.work_dir.join(format!(
            "{}-{}-{seq}",
            Local::now().format("%y%m%d-%H%M%S"),
            std::process::id(),
        ));
        fs::create_dir_all(&run_dir)?;
        Ok(run_dir)
    }

    async fn run_process(
        &self,
        code: &str,
        deadline: Duration,
        run_dir: &Path,
    ) -> Result<RunResult> {
        let code_path = run_dir.join(&self.file_name);
        fs::write(&code_path, code)?;

        let stdout_path = run_dir.join("stdout.txt");
        let stderr_path = run_dir.join("stderr.txt");

        let mut cmd = tokio::process::Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(&code_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(fs::File::create(&stdout_path)?))
            .stderr(Stdio::from(fs::File::create(&stderr_path)?))
            .current_dir(run_dir);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("failed to spawn interpreter {:?}: {e}", self.command[0]))?;

        let status = match timeout(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                log::warn!(
                    "Run exceeded {}s deadline, killing process group",
                    deadline.as_secs()
                );
                terminate(&mut child).await?
            }
        };

        // Output files hold whatever the process managed to write,
        // including partial output of a killed run
        let stdout = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();

        Ok(RunResult {
            stdout,
            stderr,
            returncode: exit_code(status),
        })
    }
}
