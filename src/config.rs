//! Engine configuration
//!
//! Built in code with the `with_*` methods or loaded from TOML:
//!
//! ```toml
//! render_cache_max_entries = 5000
//! render_cache_max_bytes = 16777216
//! worker_pool_size = 8
//! strict_variable_mode = true
//! load_timeout_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to start worker thread: {0}")]
    WorkerSpawn(std::io::Error),
}

/// Configuration options for a template registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of rendered outputs kept
    pub render_cache_max_entries: usize,

    /// Byte budget for rendered outputs
    pub render_cache_max_bytes: usize,

    /// Maximum number of compiled templates kept
    pub compiled_cache_max_entries: usize,

    /// Byte budget for compiled templates (estimated)
    pub compiled_cache_max_bytes: usize,

    /// Threads used by batch rendering
    pub worker_pool_size: usize,

    /// Pending batch jobs before submitters block
    pub batch_queue_capacity: usize,

    /// Threads running content loaders when a load timeout is set
    pub loader_pool_size: usize,

    /// Fail renders that reference unbound variables
    pub strict_variable_mode: bool,

    /// Bound on a single content load, 0 disables it
    pub load_timeout_ms: u64,

    /// Bound on a single compilation, 0 disables it
    pub compile_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_cache_max_entries: 10_000,
            render_cache_max_bytes: 64 * 1024 * 1024,
            compiled_cache_max_entries: 1_000,
            compiled_cache_max_bytes: 32 * 1024 * 1024,
            worker_pool_size: 4,
            batch_queue_capacity: 64,
            loader_pool_size: 4,
            strict_variable_mode: false,
            load_timeout_ms: 30_000,
            compile_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the registry cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.batch_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "batch_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.loader_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "loader_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        (self.load_timeout_ms > 0).then(|| Duration::from_millis(self.load_timeout_ms))
    }

    pub fn compile_timeout(&self) -> Option<Duration> {
        (self.compile_timeout_ms > 0).then(|| Duration::from_millis(self.compile_timeout_ms))
    }

    /// Set both render cache budgets
    pub fn with_render_cache(mut self, max_entries: usize, max_bytes: usize) -> Self {
        self.render_cache_max_entries = max_entries;
        self.render_cache_max_bytes = max_bytes;
        self
    }

    /// Set both compiled cache budgets
    pub fn with_compiled_cache(mut self, max_entries: usize, max_bytes: usize) -> Self {
        self.compiled_cache_max_entries = max_entries;
        self.compiled_cache_max_bytes = max_bytes;
        self
    }

    /// Set the number of batch render workers
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Set how many batch jobs may wait before submission blocks
    pub fn with_batch_queue_capacity(mut self, capacity: usize) -> Self {
        self.batch_queue_capacity = capacity;
        self
    }

    /// Set the number of threads running content loaders
    pub fn with_loader_pool_size(mut self, size: usize) -> Self {
        self.loader_pool_size = size;
        self
    }

    /// Enable or disable strict variable mode
    pub fn with_strict_variables(mut self, strict: bool) -> Self {
        self.strict_variable_mode = strict;
        self
    }

    /// Set the content load timeout; a zero duration disables it
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_ms = timeout_millis(timeout);
        self
    }

    /// Set the compilation timeout; a zero duration disables it
    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout_ms = timeout_millis(timeout);
        self
    }
}

/// Whole milliseconds, rounding a non-zero sub-millisecond timeout up to 1
fn timeout_millis(timeout: Duration) -> u64 {
    if timeout.is_zero() {
        0
    } else {
        timeout.as_millis().clamp(1, u64::MAX as u128) as u64
    }
}
