//! Error types for the packing process runner.

use std::time::Duration;

/// Errors that can occur while validating a job or running the packer.
#[derive(Debug, thiserror::Error)]
pub enum PackerError {
    /// The job description is incomplete or inconsistent.
    #[error("{0}")]
    InvalidJob(String),

    /// The packer could not be started.
    #[error("failed to start packing process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting on the packer failed.
    #[error("packing process I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The packer did not finish in time and was killed.
    #[error("packing process timed out after {0:?}")]
    Timeout(Duration),

    /// The packer exited with a non-zero code.
    #[error("packing process failed with exit code {exit_code}: {stderr}")]
    Failed {
        /// The exit code, or -1 when killed by a signal.
        exit_code: i32,
        /// The stderr output of the process.
        stderr: String,
    },

    /// The packer's stdout was not a packing summary.
    #[error("invalid output from packing process: {error}")]
    MalformedOutput {
        /// Parse error.
        error: String,
        /// Everything the process wrote to stdout.
        raw_output: String,
    },

    /// The packer ran but reported an error in its output.
    #[error("packing process reported an error: {message}")]
    Reported {
        /// The reported message.
        message: String,
        /// Everything the process wrote to stdout.
        raw_output: String,
    },
}
