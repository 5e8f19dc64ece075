//! Periodic deletion of expired uploads, outputs and scratch leftovers.

mod config;
mod sweeper;

pub use config::RetentionConfig;
pub use sweeper::{RetentionSweeper, SweepReport};
