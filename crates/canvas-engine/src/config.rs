//! Engine configuration
//!
//! Every field has a default, so a config file only needs the settings it
//! changes. Loaded from JSON with `EngineConfig::from_file`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CanvasEngineError, Result};
use crate::retry::RetryPolicies;

/// What to do with a block whose upstream block failed or was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamFailurePolicy {
    /// Run the block anyway; references to the failed block stay literal
    #[default]
    AttemptUnresolved,
    /// Skip the block without running it
    SkipDependents,
}

/// Configuration for an `ExecutionEngine`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Retry/backoff policy per error category
    pub retry: RetryPolicies,
    /// Handling of blocks downstream of a failure
    pub upstream_failure: UpstreamFailurePolicy,
    /// Upper bound for one executor call in milliseconds
    pub block_timeout_ms: Option<u64>,
    /// Number of entries kept in the error log
    pub error_log_capacity: usize,
}

pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 100;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicies::default(),
            upstream_failure: UpstreamFailurePolicy::default(),
            block_timeout_ms: None,
            error_log_capacity: DEFAULT_ERROR_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        log::info!("Loaded engine configuration from {:?}", path);
        Ok(config)
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.error_log_capacity == 0 {
            return Err(CanvasEngineError::config("errorLogCapacity must be at least 1"));
        }
        if self.block_timeout_ms == Some(0) {
            return Err(CanvasEngineError::config("blockTimeoutMs must be positive"));
        }
        Ok(())
    }

    pub fn with_retry(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_upstream_failure(mut self, policy: UpstreamFailurePolicy) -> Self {
        self.upstream_failure = policy;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Block timeout as a duration
    pub fn block_timeout(&self) -> Option<Duration> {
        self.block_timeout_ms.map(Duration::from_millis)
    }
}
