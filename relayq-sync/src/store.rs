/// Durable, restart-safe queue store
///
/// Holds queued-request records indexed by id, with a monotonic enqueue
/// sequence for FIFO tiebreaks. The durable form is a versioned, compressed
/// JSON document under one fixed file name; the in-memory index is rebuilt
/// from that document on restore, and the document remains the source of
/// truth across restarts. Persistence is best-effort: a storage fault never
/// fails the logical operation and is retried on the next persist cycle.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use relayq_core::{
    integrity, now_ms, Action, ConflictChoice, ConflictRecord, ConflictStrategy, EntityType,
    Error, HttpMethod, Priority, QueuedRequest, RequestId, RequestMetadata, RequestStatus, Result,
};

use crate::config::QueueConfig;

const STORAGE_VERSION: u32 = 1;
const QUEUE_FILE: &str = "relayq-queue.zst";
const MAX_CONFLICT_HISTORY: usize = 1000;

/// Caller-supplied options for a new request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub priority: Priority,
    pub dependencies: Vec<RequestId>,
    pub conflict_strategy: ConflictStrategy,
}

/// Filter for `list`
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub entity_type: Option<EntityType>,
}

impl RequestFilter {
    pub fn with_status(status: RequestStatus) -> Self {
        Self { status: Some(status), entity_type: None }
    }

    fn matches(&self, request: &QueuedRequest) -> bool {
        self.status.map_or(true, |s| request.status == s)
            && self.entity_type.map_or(true, |e| request.entity_type == e)
    }
}

/// Persisted document shape (versioned)
#[derive(Debug, Serialize, Deserialize)]
struct PersistedQueue {
    version: u32,
    next_sequence: u64,
    requests: Vec<QueuedRequest>,
    conflicts: Vec<ConflictRecord>,
}

struct StoreInner {
    requests: HashMap<String, QueuedRequest>,
    conflicts: Vec<ConflictRecord>,
    next_sequence: u64,
}

/// Durable collection of queued requests
pub struct QueueStore {
    inner: RwLock<StoreInner>,
    path: Option<PathBuf>,
    /// Serializes persist cycles; snapshot, temp write, and rename happen
    /// under this lock so two cycles never interleave on the same file.
    persist_lock: Mutex<()>,
    capacity: usize,
    completed_retention: usize,
    compression_level: i32,
}

impl QueueStore {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                requests: HashMap::new(),
                conflicts: Vec::new(),
                next_sequence: 1,
            }),
            path: config.storage_dir.as_ref().map(|dir| dir.join(QUEUE_FILE)),
            persist_lock: Mutex::new(()),
            capacity: config.capacity,
            completed_retention: config.completed_retention,
            compression_level: config.compression_level,
        }
    }

    /// Enqueue a new request. Never fails for a well-formed record: capacity
    /// pressure evicts rather than rejects, and a storage fault is deferred.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        action: Action,
        method: HttpMethod,
        url: String,
        payload: Value,
        options: &RequestOptions,
    ) -> Result<RequestId> {
        let checksum = integrity::checksum(&payload)?;
        let id = RequestId::new();

        {
            let mut inner = self.inner.write();
            Self::make_room(&mut inner, self.capacity);

            let sequence = inner.next_sequence;
            inner.next_sequence += 1;

            let request = QueuedRequest {
                id: id.clone(),
                entity_type,
                action,
                method,
                url,
                payload,
                priority: options.priority,
                status: RequestStatus::Pending,
                dependencies: options.dependencies.clone(),
                conflict_strategy: options.conflict_strategy,
                metadata: RequestMetadata::new(sequence, now_ms()),
                checksum,
            };

            tracing::debug!(
                request_id = %id,
                entity = ?entity_type,
                action = ?action,
                priority = ?options.priority,
                "request enqueued"
            );
            inner.requests.insert(id.0.clone(), request);
        }

        self.persist_best_effort();
        Ok(id)
    }

    /// Evict until one slot is free. History goes before live work; among
    /// Pending records the lowest-priority oldest goes first, and Critical
    /// records only when no alternative exists. Conflict records persist
    /// until explicitly resolved and are never evicted.
    fn make_room(inner: &mut StoreInner, capacity: usize) {
        while inner.requests.len() >= capacity {
            let victim = Self::pick_eviction_victim(inner);
            match victim {
                Some(id) => {
                    let evicted = inner.requests.remove(&id);
                    if let Some(evicted) = evicted {
                        tracing::warn!(
                            request_id = %evicted.id,
                            status = ?evicted.status,
                            priority = ?evicted.priority,
                            "queue full, evicting record"
                        );
                    }
                }
                None => {
                    tracing::warn!("queue over capacity with no evictable record");
                    break;
                }
            }
        }
    }

    fn pick_eviction_victim(inner: &StoreInner) -> Option<String> {
        let oldest = |status: RequestStatus| {
            inner
                .requests
                .values()
                .filter(|r| r.status == status)
                .min_by_key(|r| r.metadata.sequence)
                .map(|r| r.id.0.clone())
        };

        if let Some(id) = oldest(RequestStatus::Completed) {
            return Some(id);
        }
        if let Some(id) = oldest(RequestStatus::Failed) {
            return Some(id);
        }

        // Lowest priority first, oldest within a priority.
        let pending = |allow_critical: bool| {
            inner
                .requests
                .values()
                .filter(|r| r.status == RequestStatus::Pending)
                .filter(|r| allow_critical || r.priority != Priority::Critical)
                .max_by_key(|r| (r.priority, std::cmp::Reverse(r.metadata.sequence)))
                .map(|r| r.id.0.clone())
        };

        pending(false).or_else(|| pending(true))
    }

    /// Fetch a record by id, verifying its payload checksum. A mismatch
    /// quarantines the record instead of returning it as dispatchable.
    pub fn get(&self, id: &RequestId) -> Option<QueuedRequest> {
        let request = self.inner.read().requests.get(&id.0).cloned()?;
        Some(self.verify_or_quarantine(request))
    }

    fn verify_or_quarantine(&self, request: QueuedRequest) -> QueuedRequest {
        let intact = integrity::verify(&request.payload, &request.checksum).unwrap_or(false);
        if intact {
            return request;
        }

        tracing::error!(request_id = %request.id, "payload checksum mismatch, quarantining record");
        let mut inner = self.inner.write();
        if let Some(stored) = inner.requests.get_mut(&request.id.0) {
            stored.status = RequestStatus::Failed;
            stored.metadata.next_attempt_at = None;
            stored.metadata.last_error =
                Some(Error::Integrity(request.id.0.clone()).code().to_string());
            return stored.clone();
        }
        request
    }

    /// List records matching a filter, in creation order
    pub fn list(&self, filter: &RequestFilter) -> Vec<QueuedRequest> {
        let mut records: Vec<_> = self
            .inner
            .read()
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.metadata.sequence);
        records
    }

    /// Remove a record by id
    pub fn remove(&self, id: &RequestId) -> Option<QueuedRequest> {
        let removed = self.inner.write().requests.remove(&id.0);
        if removed.is_some() {
            self.persist_best_effort();
        }
        removed
    }

    /// Select the next batch of dispatchable requests: Pending, past any
    /// backoff gate, every dependency Completed, checksum intact. Sorted by
    /// priority then creation order.
    pub fn ready_batch(&self, limit: usize, now_ms: i64) -> Vec<QueuedRequest> {
        let candidates: Vec<QueuedRequest> = {
            let inner = self.inner.read();
            inner
                .requests
                .values()
                .filter(|r| r.is_ready(now_ms))
                .filter(|r| Self::dependencies_completed(&inner, r))
                .cloned()
                .collect()
        };

        let mut ready: Vec<QueuedRequest> = candidates
            .into_iter()
            .map(|r| self.verify_or_quarantine(r))
            .filter(|r| r.status == RequestStatus::Pending)
            .collect();

        ready.sort_by_key(|r| (r.priority, r.metadata.sequence));
        ready.truncate(limit);
        ready
    }

    fn dependencies_completed(inner: &StoreInner, request: &QueuedRequest) -> bool {
        request.dependencies.iter().all(|dep| {
            match inner.requests.get(&dep.0) {
                Some(dep_request) => dep_request.status == RequestStatus::Completed,
                // A record pruned from history already completed.
                None => true,
            }
        })
    }

    /// Apply a mutation to a stored record. Returns false when the id is gone.
    pub fn apply<F>(&self, id: &RequestId, mutate: F) -> bool
    where
        F: FnOnce(&mut QueuedRequest),
    {
        let mut inner = self.inner.write();
        match inner.requests.get_mut(&id.0) {
            Some(request) => {
                mutate(request);
                true
            }
            None => false,
        }
    }

    pub fn mark_processing(&self, id: &RequestId) -> bool {
        self.apply(id, |r| r.status = RequestStatus::Processing)
    }

    /// Mark a request Completed and prune history beyond the retention bound.
    pub fn complete(&self, id: &RequestId) {
        self.apply(id, |r| {
            r.status = RequestStatus::Completed;
            r.metadata.next_attempt_at = None;
            r.metadata.last_error = None;
        });
        self.prune_completed();
    }

    /// Mark a request terminally Failed.
    pub fn fail(&self, id: &RequestId, error: String) {
        self.apply(id, |r| {
            r.status = RequestStatus::Failed;
            r.metadata.next_attempt_at = None;
            r.metadata.last_error = Some(error);
        });
    }

    /// Terminally fail every request that (transitively) depends on
    /// `failed_id`, so nothing stays blocked forever behind a dead
    /// dependency. Returns the newly failed ids.
    pub fn cascade_fail(&self, failed_id: &RequestId) -> Vec<RequestId> {
        let mut inner = self.inner.write();
        let mut frontier = vec![failed_id.clone()];
        let mut cascaded = Vec::new();

        while let Some(root) = frontier.pop() {
            let dependents: Vec<RequestId> = inner
                .requests
                .values()
                .filter(|r| !r.is_terminal() && r.dependencies.contains(&root))
                .map(|r| r.id.clone())
                .collect();

            for id in dependents {
                if let Some(request) = inner.requests.get_mut(&id.0) {
                    request.status = RequestStatus::Failed;
                    request.metadata.next_attempt_at = None;
                    request.metadata.last_error =
                        Some(format!("dependency failed: {}", root));
                    tracing::warn!(request_id = %id, dependency = %root, "cascading dependency failure");
                    frontier.push(id.clone());
                    cascaded.push(id);
                }
            }
        }

        cascaded
    }

    fn prune_completed(&self) {
        let mut inner = self.inner.write();
        let mut completed: Vec<(u64, String)> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Completed)
            .map(|r| (r.metadata.sequence, r.id.0.clone()))
            .collect();

        if completed.len() <= self.completed_retention {
            return;
        }

        completed.sort_by_key(|(sequence, _)| *sequence);
        let excess = completed.len() - self.completed_retention;
        for (_, id) in completed.into_iter().take(excess) {
            inner.requests.remove(&id);
        }
    }

    /// Append a conflict audit record. Resolved history is bounded;
    /// unresolved conflicts persist until explicitly resolved.
    pub fn add_conflict(&self, record: ConflictRecord) {
        {
            let mut inner = self.inner.write();
            inner.conflicts.push(record);
            if inner.conflicts.len() > MAX_CONFLICT_HISTORY {
                let mut excess = inner.conflicts.len() - MAX_CONFLICT_HISTORY;
                inner.conflicts.retain(|c| {
                    if excess > 0 && c.is_resolved() {
                        excess -= 1;
                        false
                    } else {
                        true
                    }
                });
            }
        }
        self.persist_best_effort();
    }

    /// All conflict records, oldest first
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.read().conflicts.clone()
    }

    /// Mark the unresolved conflict record for a request as resolved.
    pub fn resolve_conflict_record(
        &self,
        request_id: &RequestId,
        choice: ConflictChoice,
    ) -> Result<ConflictRecord> {
        let mut inner = self.inner.write();
        let record = inner
            .conflicts
            .iter_mut()
            .rev()
            .find(|c| &c.request_id == request_id && !c.is_resolved())
            .ok_or_else(|| Error::NotFound(format!("unresolved conflict for {}", request_id)))?;

        record.resolved_at = Some(now_ms());
        record.resolution = Some(choice);
        Ok(record.clone())
    }

    /// Snapshot of all records (creation order) and conflicts
    pub fn snapshot(&self) -> (Vec<QueuedRequest>, Vec<ConflictRecord>) {
        let inner = self.inner.read();
        let mut requests: Vec<_> = inner.requests.values().cloned().collect();
        requests.sort_by_key(|r| r.metadata.sequence);
        (requests, inner.conflicts.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().requests.is_empty()
    }

    /// Drop every record and conflict
    pub fn clear(&self) {
        {
            let mut inner = self.inner.write();
            inner.requests.clear();
            inner.conflicts.clear();
        }
        self.persist_best_effort();
    }

    /// Write the versioned, compressed queue document atomically
    /// (write-temp-then-rename). In-memory stores are a no-op.
    pub fn persist(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };

        // One cycle at a time: a later snapshot must never race an earlier
        // write on the shared temp file.
        let _cycle = self.persist_lock.lock();

        let document = {
            let inner = self.inner.read();
            let mut requests: Vec<_> = inner.requests.values().cloned().collect();
            requests.sort_by_key(|r| r.metadata.sequence);
            PersistedQueue {
                version: STORAGE_VERSION,
                next_sequence: inner.next_sequence,
                requests,
                conflicts: inner.conflicts.clone(),
            }
        };

        let json = serde_json::to_vec(&document)?;
        let compressed = integrity::compress(&json, self.compression_level)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("create {}: {}", parent.display(), e)))?;
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &compressed)
            .map_err(|e| Error::Storage(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("rename {}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Persist, degrading a storage fault to a logged warning. The in-memory
    /// state stays authoritative and the write is retried on the next cycle.
    pub fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "queue persistence failed, will retry on next cycle");
        }
    }

    /// Rebuild the in-memory index from the durable document. Missing file
    /// means a fresh store.
    pub fn restore(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };
        if !path.exists() {
            return Ok(());
        }

        let compressed = std::fs::read(&path)
            .map_err(|e| Error::Storage(format!("read {}: {}", path.display(), e)))?;
        let json = integrity::decompress(&compressed)
            .map_err(|e| e.with_context("restore queue document"))?;
        let document: PersistedQueue = serde_json::from_slice(&json)?;

        if document.version != STORAGE_VERSION {
            return Err(Error::Storage(format!(
                "unsupported queue document version {}",
                document.version
            )));
        }

        let mut inner = self.inner.write();
        inner.next_sequence = document.next_sequence;
        inner.conflicts = document.conflicts;
        inner.requests = document
            .requests
            .into_iter()
            .map(|r| (r.id.0.clone(), r))
            .collect();

        tracing::info!(records = inner.requests.len(), "queue restored from disk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_capacity(capacity: usize) -> QueueStore {
        QueueStore::new(&QueueConfig::new().with_capacity(capacity))
    }

    fn enqueue_one(store: &QueueStore, priority: Priority) -> RequestId {
        store
            .enqueue(
                EntityType::Order,
                Action::Create,
                HttpMethod::Post,
                "/api/v1/orders".to_string(),
                json!({"id": "order-123", "quantity": 2}),
                &RequestOptions { priority, ..Default::default() },
            )
            .unwrap()
    }

    #[test]
    fn test_enqueue_and_get() {
        let store = store_with_capacity(10);
        let id = enqueue_one(&store, Priority::High);

        let request = store.get(&id).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.payload["id"], "order-123");
        assert!(!request.checksum.is_empty());
    }

    #[test]
    fn test_ready_batch_priority_then_fifo() {
        let store = store_with_capacity(10);
        let low = enqueue_one(&store, Priority::Low);
        let critical = enqueue_one(&store, Priority::Critical);
        let high_a = enqueue_one(&store, Priority::High);
        let high_b = enqueue_one(&store, Priority::High);

        let batch = store.ready_batch(10, now_ms());
        let ids: Vec<_> = batch.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![critical, high_a, high_b, low]);
    }

    #[test]
    fn test_ready_batch_gates_on_dependencies() {
        let store = store_with_capacity(10);
        let dep = enqueue_one(&store, Priority::Medium);
        let dependent = store
            .enqueue(
                EntityType::Payment,
                Action::Create,
                HttpMethod::Post,
                "/api/v1/payments".to_string(),
                json!({"order": "order-123"}),
                &RequestOptions {
                    dependencies: vec![dep.clone()],
                    ..Default::default()
                },
            )
            .unwrap();

        let batch = store.ready_batch(10, now_ms());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, dep);

        store.complete(&dep);
        let batch = store.ready_batch(10, now_ms());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, dependent);
    }

    #[test]
    fn test_eviction_prefers_lowest_priority_oldest() {
        let store = store_with_capacity(3);
        let low_old = enqueue_one(&store, Priority::Low);
        let low_new = enqueue_one(&store, Priority::Low);
        let critical = enqueue_one(&store, Priority::Critical);

        // Fourth enqueue forces an eviction: the oldest Low goes first.
        let high = enqueue_one(&store, Priority::High);

        assert!(store.get(&low_old).is_none());
        assert!(store.get(&low_new).is_some());
        assert!(store.get(&critical).is_some());
        assert!(store.get(&high).is_some());
    }

    #[test]
    fn test_eviction_takes_critical_only_without_alternative() {
        let store = store_with_capacity(2);
        let critical_old = enqueue_one(&store, Priority::Critical);
        let critical_new = enqueue_one(&store, Priority::Critical);

        let incoming = enqueue_one(&store, Priority::Low);

        assert!(store.get(&critical_old).is_none());
        assert!(store.get(&critical_new).is_some());
        assert!(store.get(&incoming).is_some());
    }

    #[test]
    fn test_checksum_mismatch_quarantines() {
        let store = store_with_capacity(10);
        let id = enqueue_one(&store, Priority::Medium);

        // Corrupt the stored payload behind the checksum's back.
        store.apply(&id, |r| r.payload = json!({"id": "tampered"}));

        let request = store.get(&id).unwrap();
        assert_eq!(request.status, RequestStatus::Failed);
        assert_eq!(request.metadata.last_error.as_deref(), Some("CHECKSUM_MISMATCH"));

        assert!(store.ready_batch(10, now_ms()).is_empty());
    }

    #[test]
    fn test_cascade_fail_transitive() {
        let store = store_with_capacity(10);
        let a = enqueue_one(&store, Priority::Medium);
        let b = store
            .enqueue(
                EntityType::Payment,
                Action::Create,
                HttpMethod::Post,
                "/api/v1/payments".to_string(),
                json!({}),
                &RequestOptions { dependencies: vec![a.clone()], ..Default::default() },
            )
            .unwrap();
        let c = store
            .enqueue(
                EntityType::Report,
                Action::Sync,
                HttpMethod::Post,
                "/api/v1/reports".to_string(),
                json!({}),
                &RequestOptions { dependencies: vec![b.clone()], ..Default::default() },
            )
            .unwrap();

        store.fail(&a, "terminal".to_string());
        let cascaded = store.cascade_fail(&a);

        assert_eq!(cascaded.len(), 2);
        assert_eq!(store.get(&b).unwrap().status, RequestStatus::Failed);
        assert_eq!(store.get(&c).unwrap().status, RequestStatus::Failed);
        assert!(store
            .get(&c)
            .unwrap()
            .metadata
            .last_error
            .unwrap()
            .starts_with("dependency failed"));
    }

    #[test]
    fn test_persist_restore_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = QueueConfig::new().with_storage_dir(dir.path());

        let id = {
            let store = QueueStore::new(&config);
            let id = store
                .enqueue(
                    EntityType::Customer,
                    Action::Update,
                    HttpMethod::Put,
                    "/api/v1/customers/7".to_string(),
                    json!({"name": "Ada", "tier": "gold"}),
                    &RequestOptions::default(),
                )
                .unwrap();
            store.persist().unwrap();
            id
        };

        // Full destroy/recreate cycle.
        let store = QueueStore::new(&config);
        store.restore().unwrap();

        let request = store.get(&id).unwrap();
        assert_eq!(request.entity_type, EntityType::Customer);
        assert_eq!(request.action, Action::Update);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.payload, json!({"name": "Ada", "tier": "gold"}));
    }

    #[test]
    fn test_concurrent_persist_cycles_stay_decodable() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = QueueConfig::new().with_storage_dir(dir.path());
        let store = std::sync::Arc::new(QueueStore::new(&config));

        // Growing and shrinking the queue from several threads drives
        // overlapping persist cycles of differing document sizes.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for round in 0..25u8 {
                    let id = enqueue_one(&store, Priority::Medium);
                    if round % 2 == 0 {
                        store.remove(&id);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        store.persist().unwrap();

        let reopened = QueueStore::new(&config);
        reopened.restore().unwrap();
        assert_eq!(reopened.len(), store.len());
    }

    #[test]
    fn test_completed_history_bounded() {
        let config = QueueConfig::new().with_completed_retention(2);
        let store = QueueStore::new(&config);

        let ids: Vec<_> = (0..5).map(|_| enqueue_one(&store, Priority::Medium)).collect();
        for id in &ids {
            store.complete(id);
        }

        let completed = store.list(&RequestFilter::with_status(RequestStatus::Completed));
        assert_eq!(completed.len(), 2);
        // Newest history survives.
        assert_eq!(completed[1].id, ids[4]);
    }
}
