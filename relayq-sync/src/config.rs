/// Queue configuration for resource limits and operational parameters

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of records held in the queue
    pub capacity: usize,

    /// Maximum requests dispatched per batch within a sync pass
    pub batch_size: usize,

    /// Retry schedule applied to retryable failures
    pub retry: RetryPolicy,

    /// Directory for the persisted queue document (None = in-memory only)
    pub storage_dir: Option<PathBuf>,

    /// Completed records retained as history before pruning
    pub completed_retention: usize,

    /// Per-call timeout for executor dispatch
    pub request_timeout: Duration,

    /// zstd level for the persisted document (1-22)
    /// Default: 3 (balanced speed/ratio)
    pub compression_level: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            batch_size: 25,
            retry: RetryPolicy::default(),
            storage_dir: None,
            completed_retention: 256,
            request_timeout: Duration::from_secs(30),
            compression_level: 3,
        }
    }
}

impl QueueConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of queued records
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the per-pass batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the retry schedule
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the directory for the persisted queue document
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Set how many completed records are retained for diagnostics
    pub fn with_completed_retention(mut self, retention: usize) -> Self {
        self.completed_retention = retention;
        self
    }

    /// Set the per-call executor timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set compression level (1-22)
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level.clamp(1, 22);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let config = QueueConfig::new()
            .with_capacity(10)
            .with_batch_size(4)
            .with_completed_retention(8)
            .with_compression_level(40);

        assert_eq!(config.capacity, 10);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.completed_retention, 8);
        assert_eq!(config.compression_level, 22);
    }

    #[test]
    fn test_capacity_floor() {
        let config = QueueConfig::new().with_capacity(0).with_batch_size(0);
        assert_eq!(config.capacity, 1);
        assert_eq!(config.batch_size, 1);
    }
}
