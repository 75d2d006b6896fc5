use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "runlab", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

/// Which isolation strategy runs submitted code
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    Local,
    Docker,
}

/// Fixed for the lifetime of one runner instance; every field has a default
/// so a config file may omit the whole section.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    /// Container image used by the docker strategy
    pub image: String,
    /// Memory ceiling handed to the container runtime, e.g. "512m"
    pub memory: String,
    /// CPU-share ceiling handed to the container runtime, e.g. "0.5"
    pub cpus: String,
    /// Interpreter argv prefix applied to the written code file
    pub command: Vec<String>,
    /// Name the code file is written under
    pub file_name: String,
    /// Wall-clock limit per run, in seconds
    pub timeout_seconds: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Local,
            image: "python:3.11-slim".to_string(),
            memory: "512m".to_string(),
            cpus: "0.5".to_string(),
            command: vec!["python3".to_string()],
            file_name: "main.py".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
