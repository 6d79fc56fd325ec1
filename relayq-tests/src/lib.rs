/// Test utilities and helpers for RelayQ testing
///
/// Provides a managed queue wrapper that owns its temporary storage
/// directory and scripted executor, plus enqueue shorthands.

use relayq_core::{Action, EntityType, HttpMethod, NetworkState, Priority, RequestId};
use relayq_sync::{
    ConflictStrategy, MockExecutor, OfflineQueueBuilder, OfflineQueueManager, QueueConfig,
    RequestOptions, RetryPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Install a test-friendly tracing subscriber once per process. Controlled
/// by RUST_LOG; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Managed queue whose storage directory lives as long as the wrapper
pub struct TestQueue {
    pub manager: Arc<OfflineQueueManager>,
    pub executor: Arc<MockExecutor>,
    pub dir: PathBuf,
    _temp_dir: Option<TempDir>,
}

impl TestQueue {
    /// Offline queue with fast retry backoff and temp-dir persistence
    pub fn new() -> Self {
        Self::with_config(Self::fast_config)
    }

    /// Same, but starting online
    pub fn online() -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().to_path_buf();
        let executor = Arc::new(MockExecutor::new());
        let manager = OfflineQueueBuilder::new()
            .with_config(Self::fast_config(dir.clone()))
            .with_executor(executor.clone())
            .with_initial_state(NetworkState::online())
            .build()
            .expect("Failed to build queue manager");

        Self {
            manager,
            executor,
            dir,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Build with a custom config derived from the storage directory
    pub fn with_config(config: impl FnOnce(PathBuf) -> QueueConfig) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().to_path_buf();
        let executor = Arc::new(MockExecutor::new());
        let manager = OfflineQueueBuilder::new()
            .with_config(config(dir.clone()))
            .with_executor(executor.clone())
            .with_initial_state(NetworkState::offline())
            .build()
            .expect("Failed to build queue manager");

        Self {
            manager,
            executor,
            dir,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Reopen a queue over an existing storage directory
    pub fn reopen(dir: PathBuf) -> Self {
        let executor = Arc::new(MockExecutor::new());
        let manager = OfflineQueueBuilder::new()
            .with_config(Self::fast_config(dir.clone()))
            .with_executor(executor.clone())
            .with_initial_state(NetworkState::offline())
            .build()
            .expect("Failed to reopen queue manager");

        Self {
            manager,
            executor,
            dir,
            _temp_dir: None,
        }
    }

    /// Hand over the storage directory, keeping it alive past this wrapper
    pub fn into_dir(mut self) -> (PathBuf, TempDir) {
        let temp_dir = self._temp_dir.take().expect("directory already taken");
        (self.dir.clone(), temp_dir)
    }

    fn fast_config(dir: PathBuf) -> QueueConfig {
        QueueConfig::new()
            .with_storage_dir(dir)
            .with_retry_policy(RetryPolicy::fast())
    }

    /// Enqueue an order-create request with the given priority
    pub fn enqueue_order(&self, n: u32, priority: Priority) -> RequestId {
        self.manager
            .queue_request(
                EntityType::Order,
                Action::Create,
                HttpMethod::Post,
                "/api/v1/orders",
                &serde_json::json!({ "order": n }),
                RequestOptions {
                    priority,
                    ..Default::default()
                },
            )
            .expect("Failed to enqueue")
    }

    /// Enqueue a product update carrying a conflict strategy
    pub fn enqueue_update(&self, strategy: ConflictStrategy) -> RequestId {
        self.manager
            .queue_request(
                EntityType::Product,
                Action::Update,
                HttpMethod::Put,
                "/api/v1/products/9",
                &serde_json::json!({ "price": 12.5, "version": 3 }),
                RequestOptions {
                    conflict_strategy: strategy,
                    ..Default::default()
                },
            )
            .expect("Failed to enqueue")
    }

    /// Enqueue a request that depends on earlier ones
    pub fn enqueue_dependent(&self, deps: Vec<RequestId>) -> RequestId {
        self.manager
            .queue_request(
                EntityType::Payment,
                Action::Create,
                HttpMethod::Post,
                "/api/v1/payments",
                &serde_json::json!({ "amount": 100 }),
                RequestOptions {
                    dependencies: deps,
                    ..Default::default()
                },
            )
            .expect("Failed to enqueue")
    }
}

impl Default for TestQueue {
    fn default() -> Self {
        Self::new()
    }
}
