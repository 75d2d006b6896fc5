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

/// Working directory inside the container; the code file is the only mount
const GUEST_DIR: &str = "/sandbox";

/// A runner that executes code inside a disposable container
///
/// Each run gets a freshly created container with no network access, a
/// memory ceiling, a CPU-share ceiling, and a read-only mount of the code
/// file. The container is torn down unconditionally after the run; nothing
/// persists across invocations.
pub struct DockerRunner {
    image: String,
    memory: String,
    cpus: String,
    /// Interpreter argv prefix invoked inside the container
    command: Vec<String>,
    /// Name the code file is written and mounted under
    file_name: String,
    /// Parent directory for per-run scratch directories on the host
    work_dir: PathBuf,
    /// Distinguishes concurrent runs and names their containers
    seq: AtomicU64,
}

impl SandboxRunner for DockerRunner {
    fn build(config: &SandboxConfig) -> Result<Self> {
        if config.command.is_empty() {
            bail!("sandbox command must not be empty");
        }

        // An unreachable engine is a fatal configuration error, not a run
        // failure; probe it once at construction time.
        let engine_ok = std::process::Command::new("docker")
            .arg("version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !engine_ok {
            bail!("docker engine is not reachable; cannot start the docker sandbox");
        }

        let work_dir = std::env::temp_dir().join("runlab-docker");
        fs::create_dir_all(&work_dir)?;

        log::info!("DockerRunner initialized successfully");

        Ok(Self {
            image: config.image.clone(),
            memory: config.memory.clone(),
            cpus: config.cpus.clone(),
            command: config.command.clone(),
            file_name: config.file_name.clone(),
            work_dir,
            seq: AtomicU64::new(0),
        })
    }

    fn run(&self, code: &str, timeout: Duration) -> Result<RunResult> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let container_name = format!("runlab-{}-{seq}", std::process::id());
        let run_dir = self.create_run_dir(seq)?;

        let result = tokio::runtime::Handle::current().block_on(self.run_in_container(
            code,
            timeout,
            &run_dir,
            &container_name,
        ));

        if let Err(e) = fs::remove_dir_all(&run_dir) {
            log::warn!("Failed to remove run directory {}: {e}", run_dir.display());
        }

        result
    }
}

impl DockerRunner {
    /// Creates a fresh scratch directory for one run
    fn create_run_dir(&self, seq: u64) -> Result<PathBuf> {
        let run_dir = self.work_dir.join(format!(
            "{}-{}-{seq}",
            Local::now().format("%y%m%d-%H%M%S"),
            std::process::id(),
        ));
        fs::create_dir_all(&run_dir)?;
        Ok(run_dir)
    }

    async fn run_in_container(
        &self,
        code: &str,
        deadline: Duration,
        run_dir: &Path,
        container_name: &str,
    ) -> Result<RunResult> {
        let code_path = run_dir.join(&self.file_name);
        fs::write(&code_path, code)?;

        let stdout_path = run_dir.join("stdout.txt");
        let stderr_path = run_dir.join("stderr.txt");

        let guest_path = format!("{GUEST_DIR}/{}", self.file_name);

        let mut cmd = tokio::process::Command::new("docker");
        cmd.args([
            "run",
            "--rm",
            "--name",
            container_name,
            "--network",
            "none",
            "--memory",
            &self.memory,
            "--cpus",
            &self.cpus,
            "-v",
            &format!("{}:{guest_path}:ro", code_path.display()),
            "-w",
            GUEST_DIR,
        ])
        .arg(&self.image)
        .args(&self.command)
        .arg(&guest_path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(fs::File::create(&stdout_path)?))
        .stderr(Stdio::from(fs::File::create(&stderr_path)?))
        .current_dir(run_dir);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("failed to invoke the docker client: {e}"))?;

        let status = match timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                // The --rm flag only cleans up after a normal client exit
                remove_container(container_name).await;
                return Err(anyhow!("failed to wait on the docker client: {e}"));
            }
            Err(_) => {
                log::warn!(
                    "Container {container_name} exceeded {}s deadline, removing it",
                    deadline.as_secs()
                );
                remove_container(container_name).await;
                terminate(&mut child).await?
            }
        };

        let stdout = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();

        Ok(RunResult {
            stdout,
            stderr,
            returncode: exit_code(status),
        })
    }
}

/// Force-removes a container, retrying once
///
/// A nonzero exit from `docker rm -f` means the container is already gone
/// (normal after `--rm`), so only a client invocation failure is retried.
async fn remove_container(name: &str) {
    for attempt in 1..=2 {
        match tokio::process::Command::new("docker")
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(_) => return,
            Err(e) if attempt == 1 => {
                log::warn!("docker rm -f {name} failed (attempt {attempt}): {e}, retrying");
            }
            Err(e) => {
                log::error!("Failed to tear down container {name}: {e}");
            }
        }
    }
}
