//! Playwright subprocess wrapper for page reconnaissance. The Node.js script
//! prints progress lines and a final JSON payload after a `---RESULT---`
//! marker; this side retries transient failures and falls back to an error
//! structure so reconnaissance can never fail a job.

use crate::domain::error::{AppError, Result};
use crate::domain::recon::PageStructure;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;

/// Reconnaissance contract: always returns a structure, carrying an `error`
/// field when every attempt failed.
#[async_trait]
pub trait ReconProvider {
    async fn analyze(&self, target: &str, timeout: Duration) -> PageStructure;
}

pub type SharedReconProvider = std::sync::Arc<dyn ReconProvider + Send + Sync>;

pub struct PlaywrightRecon {
    script_path: PathBuf,
}

impl PlaywrightRecon {
    pub fn new(script_path: PathBuf) -> Self {
        Self { script_path }
    }

    /// Check that Node.js is available before wiring this provider.
    pub fn check_nodejs() -> Result<String> {
        let output = std::process::Command::new("node")
            .arg("--version")
            .output()
            .map_err(|e| AppError::Internal(format!("Node.js not found: {}", e)))?;

        if !output.status.success() {
            return Err(AppError::Internal(
                "Failed to get Node.js version".to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_once(&self, target: &str, timeout: Duration) -> Result<PageStructure> {
        if !self.script_path.exists() {
            return Err(AppError::Internal(format!(
                "Recon script not found at: {}",
                self.script_path.display()
            )));
        }

        let mut command = Command::new("node");
        command
            .arg(&self.script_path)
            .arg(target)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| AppError::Internal(format!("Failed to run recon script: {}", e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| AppError::Internal("Recon script timed out".to_string()))?
            .map_err(|e| AppError::Internal(format!("Recon script failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.is_empty() { &stdout } else { &stderr };
            return Err(AppError::Internal(format!(
                "Recon script exited with error: {}",
                message
            )));
        }

        parse_result(&stdout)
    }
}

fn parse_result(stdout: &str) -> Result<PageStructure> {
    let result_json = stdout
        .split("---RESULT---")
        .nth(1)
        .map(|s| s.trim())
        .ok_or_else(|| AppError::ParseError("No result JSON in recon output".to_string()))?;

    serde_json::from_str(result_json)
        .map_err(|e| AppError::ParseError(format!("Failed to parse page structure: {}", e)))
}

#[async_trait]
impl ReconProvider for PlaywrightRecon {
    async fn analyze(&self, target: &str, timeout: Duration) -> PageStructure {
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.run_once(target, timeout).await {
                Ok(structure) => return structure,
                Err(err) => {
                    warn!(attempt, error = %err, "Reconnaissance attempt failed");
                    last_error = err.to_string();
                }
            }
        }
        PageStructure::error_structure(target, last_error)
    }
}
