//! Background conversion jobs with pollable status.

mod queue;

pub use queue::{JobError, JobQueue, JobRecord, JobStatus};
