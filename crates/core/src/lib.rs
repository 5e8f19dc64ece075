pub mod cache;
pub mod config;
pub mod convert;
pub mod fingerprint;
pub mod format;
pub mod gate;
pub mod jobs;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod retention;
pub mod storage;
pub mod testing;

pub use cache::{CacheEntry, ConversionCache};
pub use config::{
    load_config, load_config_from_str, validate_config, CacheConfig, Config, ConfigError,
    ConversionConfig, RetentionConfig, StorageConfig, ToolsConfig,
};
pub use convert::{
    Backend, BackendChain, BackendError, BackendFailure, BackendJob, ConvertError,
    ConverterStrategy, ExecContext, ExecutionPath, FormatDirection, Tool, ToolAvailability,
};
pub use fingerprint::ContentFingerprinter;
pub use format::{Category, ConverterDescriptor, FormatRegistry, FormatSet};
pub use gate::{ConcurrencyGate, GatePermit, GateStatus};
pub use jobs::{JobError, JobQueue, JobStatus};
pub use orchestrator::{
    ConversionOrchestrator, ConversionOutcome, ConversionRequest, OrchestratorStatus,
};
pub use pool::WorkerPool;
pub use retention::{RetentionSweeper, SweepReport};
pub use storage::{StorageError, StorageLayout, StoredFile};
