//! External packing process runner for packbill.
//!
//! The packing algorithm lives outside this service. This crate validates a job,
//! pipes it to the packer as JSON on stdin, and parses the summary from stdout
//! under a time limit. Exit code and stderr are the only failure signal besides
//! the output itself.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use packbill_packer::{PackerProcess, PackingJob};
//!
//! # async fn example(job: PackingJob) -> Result<(), Box<dyn std::error::Error>> {
//! job.validate()?;
//!
//! let packer = PackerProcess::new("python3", vec!["packer.py".into()], Duration::from_secs(30));
//! let summary = packer.run(&job).await?;
//! println!("placed {} boxes", summary.total_boxes);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod job;
mod process;

pub use error::PackerError;
pub use job::{BoxSpec, BoxSummary, Container, PackingJob, PackingSummary};
pub use process::{PackerProcess, DEFAULT_TIMEOUT};
