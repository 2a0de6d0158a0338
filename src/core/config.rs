//! Batch configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! threads = 4
//! region_threshold = 2000
//! strategy_dimension = "longest"
//! output_prefix = "processado_"
//! pattern = "scan_*"
//!
//! [[pipeline]]
//! name = "grayscale"
//!
//! [[pipeline]]
//! name = "adaptive_gaussian"
//! params = [11, 2]
//! ```

use crate::batch::io::ListOptions;
use crate::batch::orchestrator::{BatchOptions, DEFAULT_DRAIN_TIMEOUT, DEFAULT_OUTPUT_PREFIX};
use crate::core::error::{ConfigError, PipelineError};
use crate::execution::pool::PoolConfig;
use crate::execution::strategy::{Dimension, StrategyMode, StrategyPolicy, DEFAULT_REGION_THRESHOLD};
use crate::pipeline::{Pipeline, StageConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for one orchestrator and the pool it runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads (0 = logical core count)
    pub threads: usize,
    pub region_threshold: u64,
    pub strategy_dimension: Dimension,
    pub strategy: StrategyMode,
    /// Bands per region-parallel image (0 = pool capacity)
    pub bands: usize,
    pub drain_timeout_secs: u64,
    pub output_prefix: String,
    pub recursive: bool,
    /// Glob matched against file names during enumeration
    pub pattern: Option<String>,
    pub pipeline: Vec<StageConfig>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            region_threshold: DEFAULT_REGION_THRESHOLD,
            strategy_dimension: Dimension::Width,
            strategy: StrategyMode::Auto,
            bands: 0,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT.as_secs(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            recursive: false,
            pattern: None,
            pipeline: vec![StageConfig::new("otsu", Vec::new())],
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_region_threshold(mut self, threshold: u64) -> Self {
        self.region_threshold = threshold;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyMode) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Vec<StageConfig>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn policy(&self) -> StrategyPolicy {
        StrategyPolicy::new()
            .with_mode(self.strategy)
            .with_dimension(self.strategy_dimension)
            .with_threshold(self.region_threshold)
            .with_bands(self.bands)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new().with_threads(self.threads)
    }

    /// Build the configured stage chain.
    ///
    /// An empty `pipeline` list is rejected like an empty chain string.
    pub fn pipeline(&self) -> Result<Pipeline, ConfigError> {
        if self.pipeline.is_empty() {
            return Err(PipelineError::invalid("pipeline", "no stages given").into());
        }
        Ok(Pipeline::from_configs(&self.pipeline)?)
    }

    pub fn batch_options(&self) -> Result<BatchOptions, ConfigError> {
        let mut listing = ListOptions::new().with_recursive(self.recursive);
        if let Some(pattern) = &self.pattern {
            listing = listing.with_pattern(pattern)?;
        }
        Ok(BatchOptions::new()
            .with_output_prefix(self.output_prefix.clone())
            .with_drain_timeout(Duration::from_secs(self.drain_timeout_secs))
            .with_listing(listing))
    }
}
