//! Conversion orchestrator.
//!
//! Drives each request through the conversion state machine:
//! - **Received**: category and formats validated, nothing touched on disk
//! - **CacheCheck**: content fingerprint looked up in the cache
//! - **AwaitingSlot**: waiting for a concurrency gate permit
//! - **Executing**: strategy run under the hard timeout
//! - **CacheWrite**: output placed in storage and recorded in the cache

mod config;
mod runner;
mod types;

pub use config::{CacheConfig, ConversionConfig};
pub use runner::ConversionOrchestrator;
pub use types::{ConversionOutcome, ConversionRequest, OrchestratorStatus};
