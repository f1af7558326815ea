//! Isolated execution of candidate test code. The child process enforces its
//! own address-space limit via a setrlimit preamble, the parent enforces the
//! wall-clock deadline and kills runaway children. Infrastructure failures
//! downgrade to warnings so a broken sandbox never blocks legitimate code.

use crate::domain::error::Result;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

const SUSPICIOUS_OUTPUT: &[&str] = &[
    "file://", "http://", "https://", "ftp://", "/etc/", "/var/", "/usr/", "/home/", "socket",
    "network", "connection",
];

const RESTRICTED_ACCESS: &[&str] = &["permission denied", "access denied", "forbidden"];

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub python_bin: String,
    pub timeout: Duration,
    pub max_memory_bytes: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: Duration::from_secs(5),
            max_memory_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Result of one sandboxed run. `blocked` entries force a safety block;
/// `warnings` are advisory only.
#[derive(Debug, Clone, Default)]
pub struct SandboxOutcome {
    pub blocked: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, source: &str) -> SandboxOutcome {
        let mut outcome = SandboxOutcome::default();
        let script = self.wrap_with_limits(source);

        let path = match self.write_temp_script(&script).await {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, "Sandbox setup failed");
                outcome
                    .warnings
                    .push(format!("Sandbox setup failed: {}", err));
                return outcome;
            }
        };

        self.run_script(&path, &mut outcome).await;

        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(error = %err, path = %path.display(), "Failed to remove sandbox script");
        }
        outcome
    }

    async fn run_script(&self, path: &PathBuf, outcome: &mut SandboxOutcome) {
        let mut command = Command::new(&self.config.python_bin);
        command
            .arg(path)
            .env("PYTHONPATH", "")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(error = %err, "Failed to spawn sandbox process");
                outcome
                    .warnings
                    .push(format!("Execution exception: {}", err));
                return;
            }
        };

        // kill_on_drop reaps the child when the timed-out future is dropped.
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(error = %err, "Sandbox process failed");
                outcome
                    .warnings
                    .push(format!("Execution exception: {}", err));
                return;
            }
            Err(_) => {
                outcome
                    .blocked
                    .push("Sandbox execution timeout - code took too long".to_string());
                return;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let stderr_lower = stderr.to_lowercase();
            if RESTRICTED_ACCESS.iter().any(|p| stderr_lower.contains(p)) {
                outcome
                    .blocked
                    .push("Sandbox execution detected restricted access attempt".to_string());
            }
            if stderr_lower.contains("memoryerror") {
                outcome
                    .blocked
                    .push("Sandbox execution memory limit exceeded".to_string());
            }
            let preview: String = stderr.chars().take(200).collect();
            outcome.warnings.push(format!("Execution error: {}", preview));
            return;
        }

        for pattern in SUSPICIOUS_OUTPUT {
            if stdout.contains(pattern) {
                outcome
                    .warnings
                    .push(format!("Suspicious output detected: {}", pattern));
            }
        }
    }

    async fn write_temp_script(&self, script: &str) -> Result<PathBuf> {
        let path = std::env::temp_dir().join(format!("sandbox-{}.py", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(script.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }

    fn wrap_with_limits(&self, source: &str) -> String {
        format!(
            "import resource\n\n\
             max_memory = {}\n\
             resource.setrlimit(resource.RLIMIT_AS, (max_memory, max_memory))\n\n{}",
            self.config.max_memory_bytes, source
        )
    }
}
