//! Runs the packer as a child process: job JSON on stdin, summary JSON on stdout.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::PackerError;
use crate::job::{PackingJob, PackingSummary};

/// Default time limit for one packing run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to invoke the packer.
#[derive(Debug, Clone)]
pub struct PackerProcess {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl PackerProcess {
    /// Create a runner for `program args...` with the given time limit.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// The configured time limit.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one job to completion.
    ///
    /// The child is killed if it outlives the timeout.
    ///
    /// # Errors
    ///
    /// - `PackerError::Spawn` if the program cannot be started.
    /// - `PackerError::Timeout` if it does not finish in time.
    /// - `PackerError::Failed` on a non-zero exit.
    /// - `PackerError::MalformedOutput` if stdout is not a summary.
    /// - `PackerError::Reported` if the summary carries an error.
    #[instrument(skip(self, job), fields(program = %self.program, boxes = job.box_count()))]
    pub async fn run(&self, job: &PackingJob) -> Result<PackingSummary, PackerError> {
        let input = serde_json::to_vec(job).map_err(|e| PackerError::InvalidJob(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PackerError::Spawn)?;

        debug!("Packing process started");

        let stdin = child.stdin.take();
        let io = async move {
            if let Some(mut stdin) = stdin {
                // A packer that exits without reading stdin is reported by its exit status.
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "Packing process closed stdin early");
                }
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, io)
            .await
            .map_err(|_| {
                warn!(timeout = ?self.timeout, "Packing process timed out");
                PackerError::Timeout(self.timeout)
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, "Packing process failed");
            return Err(PackerError::Failed { exit_code, stderr });
        }

        let raw_output = String::from_utf8_lossy(&output.stdout).to_string();
        let mut summary: PackingSummary =
            serde_json::from_str(&raw_output).map_err(|e| PackerError::MalformedOutput {
                error: e.to_string(),
                raw_output: raw_output.clone(),
            })?;

        if let Some(message) = summary.error.take() {
            return Err(PackerError::Reported {
                message,
                raw_output,
            });
        }

        summary.total_boxes = summary.counted_boxes();
        info!(
            total_boxes = summary.total_boxes,
            space_utilization = summary.space_utilization,
            "Packing completed"
        );
        Ok(summary)
    }
}
