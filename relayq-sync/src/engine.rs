/// Sync engine and offline queue facade
///
/// Orchestrates synchronization passes over the durable queue store and
/// exposes the public operations: enqueue, fallback-aware execution,
/// explicit sync, conflict resolution, statistics, export, and teardown.
/// One instance is process-scoped, owned and injected by its caller, with
/// an explicit constructor and `destroy()` so test suites can create
/// isolated instances.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use relayq_core::{
    integrity, now_ms, Action, ConflictChoice, ConflictRecord, EntityType, Error, HttpMethod,
    NetworkState, Priority, QueueExport, QueuedRequest, RequestId, RequestMetadata, RequestStatus,
    Result, Statistics, SyncErrorEntry, SyncResult,
};

use crate::config::QueueConfig;
use crate::conflict::{ConflictOutcome, ConflictResolver};
use crate::executor::{ExecuteOutcome, Executor};
use crate::network::NetworkMonitor;
use crate::stats;
use crate::store::{QueueStore, RequestOptions};

struct CachedResponse {
    body: Value,
    stored_at: i64,
    ttl_ms: i64,
}

/// Options for `execute_with_fallback`
#[derive(Debug, Clone)]
pub struct FallbackOptions {
    /// Returned immediately when the call cannot reach the backend
    pub offline_response: Value,
    /// Cache a successful online response under this key
    pub cache_key: Option<String>,
    /// How long a cached response stays valid
    pub cache_duration: Option<Duration>,
    /// Priority for the queued request when degrading offline
    pub priority: Option<Priority>,
}

impl FallbackOptions {
    pub fn new(offline_response: Value) -> Self {
        Self {
            offline_response,
            cache_key: None,
            cache_duration: None,
            priority: None,
        }
    }

    pub fn with_cache(mut self, key: impl Into<String>, duration: Duration) -> Self {
        self.cache_key = Some(key.into());
        self.cache_duration = Some(duration);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Process-scoped offline queue and synchronization engine
pub struct OfflineQueueManager {
    store: Arc<QueueStore>,
    executor: Arc<dyn Executor>,
    resolver: ConflictResolver,
    network: NetworkMonitor,
    config: QueueConfig,
    cache: RwLock<HashMap<String, CachedResponse>>,
    /// Serializes sync passes; two passes never overlap on the same store.
    sync_gate: tokio::sync::Mutex<()>,
    destroyed: AtomicBool,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl OfflineQueueManager {
    /// Create a manager, restore any persisted queue, and start the
    /// connectivity listener. Must be called within a tokio runtime.
    pub fn new(
        config: QueueConfig,
        executor: Arc<dyn Executor>,
        initial_network: NetworkState,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(QueueStore::new(&config));
        store.restore()?;

        let (network, transitions) = NetworkMonitor::new(initial_network);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let manager = Arc::new(Self {
            resolver: ConflictResolver::new(store.clone()),
            store,
            executor,
            network,
            config,
            cache: RwLock::new(HashMap::new()),
            sync_gate: tokio::sync::Mutex::new(()),
            destroyed: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        });

        Arc::clone(&manager).spawn_online_listener(transitions, shutdown_rx);
        Ok(manager)
    }

    fn spawn_online_listener(
        self: Arc<Self>,
        mut transitions: mpsc::UnboundedReceiver<()>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = transitions.recv() => match maybe {
                        Some(()) => {
                            let result = self.sync_queue().await;
                            tracing::info!(
                                synced = result.synced_count,
                                failed = result.failed_count,
                                conflicts = result.conflict_count,
                                "online-transition sync pass finished"
                            );
                        }
                        None => break,
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("connectivity listener stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Enqueue a mutating operation for later synchronization.
    ///
    /// Only payload validation can fail here; capacity pressure evicts and
    /// storage faults are deferred, so a well-formed record always lands.
    pub fn queue_request<T: Serialize>(
        &self,
        entity_type: EntityType,
        action: Action,
        method: HttpMethod,
        url: impl Into<String>,
        payload: &T,
        options: RequestOptions,
    ) -> Result<RequestId> {
        self.ensure_alive()?;
        let payload = integrity::to_payload(payload)?;
        self.store
            .enqueue(entity_type, action, method, url.into(), payload, &options)
    }

    /// Execute a call now if online, or queue it and return the caller's
    /// fallback value immediately. Never blocks the caller on connectivity;
    /// only payload validation errors surface synchronously.
    pub async fn execute_with_fallback<T: Serialize>(
        &self,
        entity_type: EntityType,
        action: Action,
        method: HttpMethod,
        url: impl Into<String>,
        payload: &T,
        options: FallbackOptions,
    ) -> Result<Value> {
        self.ensure_alive()?;
        let url = url.into();
        let payload = integrity::to_payload(payload)?;
        let FallbackOptions {
            offline_response,
            cache_key,
            cache_duration,
            priority,
        } = options;
        let priority = priority.unwrap_or_default();

        if !self.network.is_online() {
            if let Some(cached) = self.cached_response(cache_key.as_deref()) {
                return Ok(cached);
            }
            self.enqueue_fallback(entity_type, action, method, url, payload, priority)?;
            return Ok(offline_response);
        }

        let probe = self.one_shot_request(entity_type, action, method, url.clone(), payload.clone())?;
        match self.execute_with_timeout(&probe, false).await {
            ExecuteOutcome::Success(body) => {
                if let (Some(key), Some(duration)) = (cache_key, cache_duration) {
                    self.cache.write().insert(
                        key,
                        CachedResponse {
                            body: body.clone(),
                            stored_at: now_ms(),
                            ttl_ms: duration.as_millis() as i64,
                        },
                    );
                }
                Ok(body)
            }
            ExecuteOutcome::Failure(error) => {
                // Nominally online but the call did not land; degrade to the
                // queue rather than raising to the caller.
                tracing::warn!(error = %error, url = %url, "direct call failed, queueing for sync");
                self.enqueue_fallback(entity_type, action, method, url, payload, priority)?;
                Ok(offline_response)
            }
            ExecuteOutcome::Conflict { .. } => {
                // Queue it so the next sync pass routes it through the
                // conflict resolver with full bookkeeping.
                self.enqueue_fallback(entity_type, action, method, url, payload, priority)?;
                Ok(offline_response)
            }
        }
    }

    /// Run one synchronization pass. Calls arriving while a pass is in
    /// flight wait for the gate and then run their own pass; two passes
    /// never overlap.
    pub async fn sync_queue(&self) -> SyncResult {
        let _gate = self.sync_gate.lock().await;

        let mut result = SyncResult { success: true, ..Default::default() };
        if self.destroyed.load(Ordering::SeqCst) {
            result.success = false;
            return result;
        }

        tracing::debug!(queued = self.store.len(), "sync pass started");

        // Each round drains one batch; a dependent whose dependency
        // completed in round N becomes eligible in round N+1 at the
        // earliest. The round bound covers the longest dependency chain.
        let max_rounds = self.store.len() + 1;
        'pass: for _ in 0..max_rounds {
            let batch = self.store.ready_batch(self.config.batch_size, now_ms());
            if batch.is_empty() {
                break;
            }

            for request in &batch {
                if self.destroyed.load(Ordering::SeqCst) {
                    tracing::warn!("shutdown during sync pass, abandoning remainder");
                    break 'pass;
                }
                self.dispatch_one(request, &mut result).await;
            }

            self.store.persist_best_effort();
        }

        result.success = result.errors.is_empty();
        tracing::info!(
            synced = result.synced_count,
            failed = result.failed_count,
            conflicts = result.conflict_count,
            "sync pass finished"
        );
        result
    }

    async fn dispatch_one(&self, request: &QueuedRequest, result: &mut SyncResult) {
        self.store.mark_processing(&request.id);
        tracing::debug!(
            request_id = %request.id,
            method = request.method.as_str(),
            url = %request.url,
            "dispatching request"
        );

        let force = request.metadata.force_override;
        match self.execute_with_timeout(request, force).await {
            ExecuteOutcome::Success(_) => {
                self.store.complete(&request.id);
                result.synced_count += 1;
            }
            ExecuteOutcome::Failure(error) => self.handle_failure(request, error, result),
            ExecuteOutcome::Conflict { server_state } => {
                self.handle_conflict(request, server_state, result).await
            }
        }
    }

    fn handle_failure(&self, request: &QueuedRequest, error: Error, result: &mut SyncResult) {
        result.errors.push(SyncErrorEntry {
            request_id: request.id.clone(),
            code: error.code().to_string(),
            message: error.to_string(),
        });

        if error.is_retryable() {
            let policy = self.config.retry.clone();
            let mut terminal = false;
            self.store.apply(&request.id, |r| {
                terminal = !policy.schedule_retry(r, error.to_string());
            });

            if terminal {
                tracing::warn!(request_id = %request.id, "retry budget exhausted, request failed terminally");
                result.failed_count += 1;
                self.cascade(&request.id, result);
            } else {
                tracing::debug!(request_id = %request.id, error = %error, "retryable failure, backoff scheduled");
            }
        } else {
            self.store.fail(&request.id, error.to_string());
            result.failed_count += 1;
            self.cascade(&request.id, result);
        }
    }

    fn cascade(&self, failed_id: &RequestId, result: &mut SyncResult) {
        for dependent in self.store.cascade_fail(failed_id) {
            result.failed_count += 1;
            result.errors.push(SyncErrorEntry {
                request_id: dependent,
                code: "DEPENDENCY_FAILED".to_string(),
                message: format!("dependency {} failed terminally", failed_id),
            });
        }
    }

    async fn handle_conflict(
        &self,
        request: &QueuedRequest,
        server_state: Option<Value>,
        result: &mut SyncResult,
    ) {
        result.conflict_count += 1;

        match self.resolver.on_conflict(request, server_state) {
            ConflictOutcome::AdoptedServer | ConflictOutcome::Deferred => {}
            ConflictOutcome::Resubmit => {
                match self.execute_with_timeout(request, true).await {
                    ExecuteOutcome::Success(_) => {
                        self.resolver.mark_client_resolved(&request.id);
                        self.store.complete(&request.id);
                        result.synced_count += 1;
                    }
                    ExecuteOutcome::Failure(error) => self.handle_failure(request, error, result),
                    ExecuteOutcome::Conflict { .. } => {
                        // The override itself conflicted; park it rather
                        // than ping-pong with the backend.
                        self.resolver.defer(&request.id);
                    }
                }
            }
        }
    }

    async fn execute_with_timeout(&self, request: &QueuedRequest, force: bool) -> ExecuteOutcome {
        match tokio::time::timeout(
            self.config.request_timeout,
            self.executor.execute(request, force),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => ExecuteOutcome::Failure(Error::Network("request timed out".to_string())),
        }
    }

    /// Record lookup by id (checksum-verified)
    pub fn get_request_status(&self, id: &RequestId) -> Option<QueuedRequest> {
        self.store.get(id)
    }

    /// Aggregate counts and timing estimates over the current snapshot
    pub fn get_statistics(&self) -> Statistics {
        let (requests, conflicts) = self.store.snapshot();
        stats::collect(&requests, &conflicts)
    }

    /// All conflict records, oldest first
    pub fn get_conflicts(&self) -> Vec<ConflictRecord> {
        self.store.conflicts()
    }

    /// Explicitly resolve a parked MANUAL conflict
    pub fn resolve_conflict(&self, id: &RequestId, choice: ConflictChoice) -> Result<()> {
        self.ensure_alive()?;
        self.resolver.resolve(id, choice)
    }

    /// Diagnostic snapshot of the whole queue
    pub fn export_queue(&self) -> QueueExport {
        let (requests, conflicts) = self.store.snapshot();
        let statistics = stats::collect(&requests, &conflicts);
        QueueExport {
            timestamp: now_ms(),
            statistics,
            queue: requests,
            conflicts,
        }
    }

    /// Drop every queued record, conflict, and cached response
    pub fn clear_queue(&self) {
        self.store.clear();
        self.cache.write().clear();
    }

    /// Feed an observed connectivity change. The offline-to-online edge
    /// triggers one asynchronous sync pass.
    pub fn set_network_state(&self, state: NetworkState) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        self.network.set_state(state);
    }

    /// Current observed connectivity
    pub fn network_state(&self) -> NetworkState {
        self.network.state()
    }

    /// Stop the connectivity listener and persist final state. An in-flight
    /// sync batch completes its current item and abandons the remainder.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let shutdown = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown {
            let _ = tx.send(()).await;
        }

        self.store.persist_best_effort();
        tracing::info!("offline queue destroyed");
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Internal("offline queue destroyed".to_string()));
        }
        Ok(())
    }

    fn cached_response(&self, key: Option<&str>) -> Option<Value> {
        let key = key?;
        let cache = self.cache.read();
        let entry = cache.get(key)?;
        if now_ms() - entry.stored_at <= entry.ttl_ms {
            Some(entry.body.clone())
        } else {
            None
        }
    }

    fn enqueue_fallback(
        &self,
        entity_type: EntityType,
        action: Action,
        method: HttpMethod,
        url: String,
        payload: Value,
        priority: Priority,
    ) -> Result<RequestId> {
        self.store.enqueue(
            entity_type,
            action,
            method,
            url,
            payload,
            &RequestOptions {
                priority,
                ..Default::default()
            },
        )
    }

    /// A transient record handed to the executor for a direct call; it is
    /// never stored.
    fn one_shot_request(
        &self,
        entity_type: EntityType,
        action: Action,
        method: HttpMethod,
        url: String,
        payload: Value,
    ) -> Result<QueuedRequest> {
        let checksum = integrity::checksum(&payload)?;
        Ok(QueuedRequest {
            id: RequestId::new(),
            entity_type,
            action,
            method,
            url,
            payload,
            priority: Priority::default(),
            status: RequestStatus::Processing,
            dependencies: Vec::new(),
            conflict_strategy: Default::default(),
            metadata: RequestMetadata::new(0, now_ms()),
            checksum,
        })
    }
}
