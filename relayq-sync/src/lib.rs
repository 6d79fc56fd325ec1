/// RelayQ synchronization engine
///
/// Offline-durable request queue with automatic synchronization on
/// reconnect. Mutations made while offline are persisted locally, then
/// replayed against the backend in priority order once connectivity
/// returns, with retry backoff, dependency ordering, and three-strategy
/// conflict resolution.
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────────┐
/// │              OfflineQueueManager                │
/// │  queue_request / execute_with_fallback / sync   │
/// └──────┬──────────┬───────────┬───────────┬───────┘
///        │          │           │           │
///   QueueStore  NetworkMonitor  ConflictResolver
///        │          │           │           │
///        │     (edge-triggered  │      Executor
///   persistence    sync)        │    (mock / HTTP)
///   (zstd + sha256)        audit records
/// ```
///
/// # Example
///
/// ```no_run
/// use relayq_sync::{OfflineQueueBuilder, MockExecutor, RequestOptions};
/// use relayq_core::{Action, EntityType, HttpMethod, NetworkState};
/// use std::sync::Arc;
///
/// # async fn example() -> relayq_core::Result<()> {
/// let manager = OfflineQueueBuilder::new()
///     .with_executor(Arc::new(MockExecutor::new()))
///     .with_initial_state(NetworkState::offline())
///     .build()?;
///
/// manager.queue_request(
///     EntityType::Order,
///     Action::Create,
///     HttpMethod::Post,
///     "/api/v1/orders",
///     &serde_json::json!({"id": "order-1"}),
///     RequestOptions::default(),
/// )?;
///
/// // Going online triggers a sync pass in the background.
/// manager.set_network_state(NetworkState::online());
/// # Ok(())
/// # }
/// ```

pub mod config;
pub mod conflict;
pub mod engine;
pub mod executor;
pub mod network;
pub mod retry;
pub mod stats;
pub mod store;

pub use config::QueueConfig;
pub use conflict::{ConflictOutcome, ConflictResolver};
pub use engine::{FallbackOptions, OfflineQueueManager};
pub use executor::{ExecuteOutcome, Executor, MockExecutor, RecordedCall};
#[cfg(feature = "http")]
pub use executor::HttpExecutor;
pub use network::NetworkMonitor;
pub use retry::RetryPolicy;
pub use store::{QueueStore, RequestFilter, RequestOptions};

// Re-export the core vocabulary so callers need a single import path.
pub use relayq_core::{
    Action, ConflictChoice, ConflictRecord, ConflictStrategy, ConflictType, EntityType, Error,
    HttpMethod, NetworkState, Priority, QueueExport, QueuedRequest, RequestId, RequestStatus,
    Statistics, SyncResult,
};

use relayq_core::Result;
use std::sync::Arc;

/// Builder for [`OfflineQueueManager`]
///
/// An executor is required; everything else has defaults. `build()` must
/// run inside a tokio runtime since it spawns the connectivity listener.
pub struct OfflineQueueBuilder {
    config: QueueConfig,
    executor: Option<Arc<dyn Executor>>,
    initial_state: NetworkState,
}

impl OfflineQueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            executor: None,
            initial_state: NetworkState::online(),
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_initial_state(mut self, state: NetworkState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn build(self) -> Result<Arc<OfflineQueueManager>> {
        let executor = self
            .executor
            .ok_or_else(|| Error::Validation("an executor is required".to_string()))?;
        OfflineQueueManager::new(self.config, executor, self.initial_state)
    }
}

impl Default for OfflineQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
