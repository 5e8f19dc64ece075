//! Conversion orchestrator implementation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::ConversionCache;
use crate::config::Config;
use crate::convert::{ConvertError, ConverterStrategy, ExecContext, ToolsConfig};
use crate::fingerprint::ContentFingerprinter;
use crate::format::{format_of, Category, FormatRegistry, FormatSet};
use crate::gate::ConcurrencyGate;
use crate::metrics;
use crate::pool::WorkerPool;
use crate::retention::{RetentionConfig, RetentionSweeper, SweepReport};
use crate::storage::StorageLayout;

use super::config::{CacheConfig, ConversionConfig};
use super::types::{ConversionOutcome, ConversionRequest, OrchestratorStatus};

/// Validated pieces of a request.
struct Admitted<'a> {
    category: Category,
    strategy: &'a ConverterStrategy,
    from: String,
    to: String,
}

/// Entry point for conversions: validation, caching, admission control,
/// execution and placement.
pub struct ConversionOrchestrator {
    config: ConversionConfig,
    registry: FormatRegistry,
    strategies: HashMap<Category, ConverterStrategy>,
    fingerprinter: ContentFingerprinter,
    cache: ConversionCache,
    gate: ConcurrencyGate,
    storage: Arc<StorageLayout>,
    exec: ExecContext,
}

impl ConversionOrchestrator {
    /// Create a new orchestrator with one strategy per category.
    pub fn new(
        config: ConversionConfig,
        cache: CacheConfig,
        tools: &ToolsConfig,
        storage: Arc<StorageLayout>,
    ) -> Self {
        let pool = match config.worker_threads {
            Some(threads) => WorkerPool::new(threads),
            None => WorkerPool::with_available_parallelism(),
        };
        let exec = ExecContext::new(pool, storage.scratch_root());
        let strategies = Category::ALL
            .into_iter()
            .map(|category| (category, ConverterStrategy::for_category(category, tools)))
            .collect();

        Self {
            fingerprinter: ContentFingerprinter::new(config.fingerprint_prefix_bytes),
            gate: ConcurrencyGate::new(config.max_concurrent_conversions),
            cache: ConversionCache::new(cache.max_entries),
            registry: FormatRegistry::new(),
            strategies,
            storage,
            exec,
            config,
        }
    }

    /// Builds the orchestrator and its storage layout from configuration.
    pub fn from_config(config: &Config) -> Self {
        let fingerprinter = ContentFingerprinter::new(config.conversion.fingerprint_prefix_bytes);
        let storage = Arc::new(
            StorageLayout::new(config.storage.clone()).with_fingerprinter(fingerprinter),
        );
        Self::new(
            config.conversion.clone(),
            config.cache.clone(),
            &config.tools,
            storage,
        )
    }

    /// Replaces the strategy serving `strategy.category()`.
    pub fn with_strategy(mut self, strategy: ConverterStrategy) -> Self {
        self.strategies.insert(strategy.category(), strategy);
        self
    }

    pub fn storage(&self) -> &Arc<StorageLayout> {
        &self.storage
    }

    pub fn cache(&self) -> &ConversionCache {
        &self.cache
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn strategy(&self, category: Category) -> Option<&ConverterStrategy> {
        self.strategies.get(&category)
    }

    /// Input and output formats of every category.
    pub fn supported_formats(&self) -> BTreeMap<Category, FormatSet> {
        self.registry.supported_formats_map()
    }

    /// Public URL for a stored output.
    pub fn url_for(&self, path: &Path) -> String {
        self.storage.url_for(path)
    }

    /// Converts one request.
    ///
    /// Validation failures are returned before anything touches the
    /// filesystem. A cached output that still exists is returned without
    /// executing anything.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionOutcome, ConvertError> {
        let started = Instant::now();
        let result = self.run(request, started).await;

        let category = request
            .category
            .parse::<Category>()
            .map(|c| c.as_str())
            .unwrap_or("unknown");
        let label = match &result {
            Ok(outcome) if outcome.cache_hit => "cache_hit",
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::CONVERSIONS_TOTAL
            .with_label_values(&[category, label])
            .inc();

        if let Err(e) = &result {
            if e.is_validation() {
                debug!(error = %e, "Rejected conversion request");
            } else {
                warn!(
                    category = %category,
                    source = %request.source_path.display(),
                    error = %e,
                    "Conversion failed"
                );
            }
        }
        result
    }

    fn admit(&self, request: &ConversionRequest) -> Result<Admitted<'_>, ConvertError> {
        let category: Category = request.category.parse()?;
        let strategy = self
            .strategies
            .get(&category)
            .ok_or_else(|| ConvertError::UnknownCategory(request.category.clone()))?;

        let input = request
            .source_format
            .clone()
            .or_else(|| format_of(&request.source_path))
            .unwrap_or_default();
        let (from, to) = strategy.validate_formats(&input, &request.target_format)?;

        Ok(Admitted {
            category,
            strategy,
            from,
            to,
        })
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        started: Instant,
    ) -> Result<ConversionOutcome, ConvertError> {
        // Received
        let Admitted {
            category,
            strategy,
            from,
            to,
        } = self.admit(request)?;
        let source = request.source_path.as_path();

        // CacheCheck
        let fingerprint = self
            .fingerprinter
            .fingerprint_file(source, &to, category)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ConvertError::SourceNotFound {
                    path: source.to_path_buf(),
                },
                _ => ConvertError::Io(e),
            })?;

        if let Some(path) = self.cache.get(&fingerprint).await {
            debug!(fingerprint = %fingerprint, path = %path.display(), "Cache hit");
            return Ok(ConversionOutcome::cached(
                path,
                fingerprint,
                elapsed_ms(started),
            ));
        }

        // AwaitingSlot
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ConvertError::ShuttingDown)?;

        // Executing
        let staging = self.exec.scratch_dir("request-").await?;
        let output_name = request.output_name();
        let execution = strategy.run(
            source,
            &from,
            &to,
            Some(&output_name),
            staging.path(),
            &self.exec,
        );
        let produced = match tokio::time::timeout(self.config.timeout(), execution).await {
            Ok(Ok(produced)) => produced,
            Ok(Err(e)) => {
                let kept = staging.keep();
                debug!(staging = %kept.display(), "Keeping staging directory of failed conversion");
                return Err(e);
            }
            Err(_) => {
                let kept = staging.keep();
                warn!(
                    timeout_secs = self.config.timeout_secs,
                    staging = %kept.display(),
                    "Conversion exceeded its deadline"
                );
                return Err(ConvertError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
        };

        // CacheWrite
        let placed = self
            .storage
            .place_output(
                &produced,
                category,
                request.user_id.as_deref(),
                &fingerprint,
                &output_name,
                &to,
            )
            .await;
        let stored = match placed {
            Ok(stored) => stored,
            Err(e) => {
                let kept = staging.keep();
                warn!(
                    staging = %kept.display(),
                    error = %e,
                    "Keeping converted output that could not be stored"
                );
                return Err(e.into());
            }
        };
        self.cache.put(&fingerprint, &stored.physical_path).await;

        let duration = started.elapsed();
        metrics::CONVERSION_DURATION
            .with_label_values(&[category.as_str()])
            .observe(duration.as_secs_f64());
        info!(
            category = %category,
            from = %from,
            to = %to,
            output = %stored.physical_path.display(),
            duration_ms = duration.as_millis() as u64,
            "Conversion complete"
        );

        Ok(ConversionOutcome::converted(
            stored.physical_path,
            fingerprint,
            duration.as_millis() as u64,
        ))
    }

    /// Deletes stored files older than `max_age` from every storage root.
    pub async fn purge_older_than(&self, max_age: Duration) -> SweepReport {
        RetentionSweeper::new(RetentionConfig::default(), self.storage.roots())
            .purge_older_than(max_age)
            .await
    }

    /// Removes the files of a delivered request and forgets any cache
    /// entries pointing at them.
    pub async fn cleanup_request(&self, paths: &[PathBuf]) -> Result<usize, ConvertError> {
        let forgotten = self.cache.forget_paths(paths).await;
        let removed = self.storage.remove_files(paths).await?;
        debug!(removed, forgotten, "Cleaned up request files");
        Ok(removed)
    }

    /// Current admission and cache state.
    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            gate: self.gate.status(),
            cache_entries: self.cache.len().await,
            cache_capacity: self.cache.capacity(),
            worker_threads: self.exec.pool.size(),
            shutting_down: self.gate.is_closed(),
        }
    }

    /// Stops admitting conversions. Requests already executing finish;
    /// waiting ones fail with [`ConvertError::ShuttingDown`].
    pub fn shutdown(&self) {
        info!("Conversion orchestrator shutting down");
        self.gate.close();
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
