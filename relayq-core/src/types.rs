/// Core types for the offline request queue
///
/// Defines the queued-request record, its classification enums, and the
/// aggregate result/statistics types shared across the workspace.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a queued request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::str::FromStr for RequestId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Domain object a queued operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Order,
    Payment,
    Product,
    Report,
    Customer,
    Inventory,
}

/// Verb a queued operation applies to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    Delete,
    Sync,
}

/// Transport method for the queued call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Dispatch priority. Variant order is dispatch order: `Critical` sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Lifecycle state of a queued request
///
/// Transitions: Pending -> Processing -> {Completed | Failed | Conflict}.
/// A retryable failure returns the request to Pending until the retry
/// budget is exhausted, after which Failed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Conflict,
}

/// Conflict resolution strategy attached to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStrategy {
    /// Discard the local mutation and adopt the server's state
    ServerWins,
    /// Resubmit the local mutation with an override flag
    ClientWins,
    /// Park the request until an explicit resolution call
    Manual,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        Self::ServerWins
    }
}

/// Bookkeeping carried alongside a queued request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Stable key so a retried delivery is recognized by the backend
    pub idempotency_key: String,
    /// Original creation timestamp (epoch millis)
    pub created_at: i64,
    /// Monotonic enqueue sequence, FIFO tiebreak within a priority
    pub sequence: u64,
    /// Number of retry attempts so far
    pub retry_count: u32,
    /// Earliest eligible next attempt (epoch millis), if backing off
    pub next_attempt_at: Option<i64>,
    /// Error from the last attempt (if any)
    pub last_error: Option<String>,
    /// Resubmit with the conflict-override flag on the next attempt
    #[serde(default)]
    pub force_override: bool,
}

impl RequestMetadata {
    pub fn new(sequence: u64, now_ms: i64) -> Self {
        Self {
            idempotency_key: Uuid::new_v4().to_string(),
            created_at: now_ms,
            sequence,
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            force_override: false,
        }
    }
}

/// A durable queued request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Unique ID, minted at enqueue time
    pub id: RequestId,
    /// Target entity
    pub entity_type: EntityType,
    /// Operation verb
    pub action: Action,
    /// Transport method
    pub method: HttpMethod,
    /// Transport URL
    pub url: String,
    /// Opaque payload, stored verbatim
    pub payload: Value,
    /// Dispatch priority
    pub priority: Priority,
    /// Lifecycle state
    pub status: RequestStatus,
    /// Requests that must reach Completed before this one is eligible
    pub dependencies: Vec<RequestId>,
    /// Strategy applied when the backend reports a version mismatch
    pub conflict_strategy: ConflictStrategy,
    /// Bookkeeping
    pub metadata: RequestMetadata,
    /// Integrity digest of the serialized payload
    pub checksum: String,
}

impl QueuedRequest {
    /// True once the request can never be dispatched again
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RequestStatus::Completed | RequestStatus::Failed)
    }

    /// True when the request is eligible for dispatch at `now_ms`,
    /// dependency gating aside
    pub fn is_ready(&self, now_ms: i64) -> bool {
        self.status == RequestStatus::Pending
            && self.metadata.next_attempt_at.map_or(true, |at| at <= now_ms)
    }
}

/// Why a conflict was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    /// Server holds a newer version of the entity
    VersionMismatch,
    /// Entity no longer exists on the server
    DeletedOnServer,
}

/// Explicit choice supplied to resolve a parked conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictChoice {
    UseServer,
    UseClient,
}

/// Audit record for a detected conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique ID for this conflict
    pub id: String,
    /// The request that hit the conflict
    pub request_id: RequestId,
    /// Why the conflict was raised
    pub conflict_type: ConflictType,
    /// Server-side snapshot, as reported by the backend
    pub server_state: Option<Value>,
    /// Client-side snapshot (the queued payload)
    pub client_state: Value,
    /// Strategy in effect when the conflict was detected
    pub strategy: ConflictStrategy,
    /// Detected at (epoch millis)
    pub detected_at: i64,
    /// Resolved at (epoch millis), if resolved
    pub resolved_at: Option<i64>,
    /// Which side won, if resolved
    pub resolution: Option<ConflictChoice>,
}

impl ConflictRecord {
    pub fn new(
        request_id: RequestId,
        conflict_type: ConflictType,
        server_state: Option<Value>,
        client_state: Value,
        strategy: ConflictStrategy,
        detected_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            conflict_type,
            server_state,
            client_state,
            strategy,
            detected_at,
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Observed connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub is_online: bool,
    pub is_reachable: bool,
}

impl NetworkState {
    pub fn online() -> Self {
        Self { is_online: true, is_reachable: true }
    }

    pub fn offline() -> Self {
        Self { is_online: false, is_reachable: false }
    }
}

/// One failure captured during a sync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorEntry {
    pub request_id: RequestId,
    pub code: String,
    pub message: String,
}

/// Outcome of one synchronization pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub synced_count: usize,
    pub failed_count: usize,
    pub conflict_count: usize,
    pub errors: Vec<SyncErrorEntry>,
}

/// Aggregate counts and timing estimates derived from a queue snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_queued: usize,
    pub by_priority: HashMap<Priority, usize>,
    pub by_entity_type: HashMap<EntityType, usize>,
    pub by_status: HashMap<RequestStatus, usize>,
    /// Creation time of the oldest Pending request (epoch millis)
    pub oldest_pending_at: Option<i64>,
    pub conflicts_pending: usize,
    pub estimated_sync_duration_ms: u64,
}

/// Diagnostic snapshot of the whole queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueExport {
    pub timestamp: i64,
    pub statistics: Statistics,
    pub queue: Vec<QueuedRequest>,
    pub conflicts: Vec<ConflictRecord>,
}

/// Current time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
