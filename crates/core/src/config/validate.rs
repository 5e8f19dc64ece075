use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - At least one conversion may run at a time
/// - Conversion and tool timeouts are not 0
/// - The fingerprint prefix is not empty
/// - Storage roots are distinct
/// - The sweeper interval is not 0 when enabled
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.conversion.max_concurrent_conversions == 0 {
        return fail("conversion.max_concurrent_conversions cannot be 0");
    }
    if config.conversion.timeout_secs == 0 {
        return fail("conversion.timeout_secs cannot be 0");
    }
    if config.conversion.worker_threads == Some(0) {
        return fail("conversion.worker_threads cannot be 0");
    }
    if config.conversion.fingerprint_prefix_bytes == 0 {
        return fail("conversion.fingerprint_prefix_bytes cannot be 0");
    }
    if config.tools.process_timeout_secs == 0 {
        return fail("tools.process_timeout_secs cannot be 0");
    }

    let storage = &config.storage;
    if storage.uploads_dir == storage.outputs_dir
        || storage.uploads_dir == storage.scratch_dir
        || storage.outputs_dir == storage.scratch_dir
    {
        return fail("storage.uploads_dir, outputs_dir and scratch_dir must differ");
    }

    if config.retention.enabled && config.retention.interval_secs == 0 {
        return fail("retention.interval_secs cannot be 0");
    }

    Ok(())
}
