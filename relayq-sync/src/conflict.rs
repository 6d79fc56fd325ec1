/// Conflict detection bookkeeping and strategy dispatch
///
/// Invoked when the executor reports a version mismatch between the queued
/// mutation and the server's current state. Strategy dispatch is a tagged
/// union with one handler per tag: server-wins and manual are settled here;
/// client-wins hands an explicit resubmit decision back to the sync engine,
/// which owns the executor.

use serde_json::Value;
use std::sync::Arc;

use relayq_core::{
    now_ms, ConflictChoice, ConflictRecord, ConflictStrategy, ConflictType, Error, QueuedRequest,
    RequestId, RequestStatus, Result,
};

use crate::store::QueueStore;

/// What the sync engine should do after a conflict was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Server state adopted, local mutation discarded, request Completed
    AdoptedServer,
    /// Resubmit the local mutation with the override flag
    Resubmit,
    /// Parked in Conflict status awaiting an explicit resolution call
    Deferred,
}

pub struct ConflictResolver {
    store: Arc<QueueStore>,
}

impl ConflictResolver {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }

    /// Handle an executor-reported conflict according to the request's
    /// strategy. Neither side of a MANUAL conflict is ever silently
    /// dropped: both snapshots land in the audit record.
    pub fn on_conflict(
        &self,
        request: &QueuedRequest,
        server_state: Option<Value>,
    ) -> ConflictOutcome {
        let mut record = Self::audit_record(request, server_state);

        match request.conflict_strategy {
            ConflictStrategy::ServerWins => {
                record.resolved_at = Some(now_ms());
                record.resolution = Some(ConflictChoice::UseServer);
                self.store.add_conflict(record);
                self.store.complete(&request.id);
                tracing::info!(request_id = %request.id, "conflict resolved server-wins, local change discarded");
                ConflictOutcome::AdoptedServer
            }
            ConflictStrategy::ClientWins => {
                self.store.add_conflict(record);
                ConflictOutcome::Resubmit
            }
            ConflictStrategy::Manual => {
                self.store.add_conflict(record);
                self.store.apply(&request.id, |r| {
                    r.status = RequestStatus::Conflict;
                    r.metadata.next_attempt_at = None;
                });
                tracing::warn!(request_id = %request.id, "conflict parked for manual resolution");
                ConflictOutcome::Deferred
            }
        }
    }

    /// Record that a client-wins resubmission was accepted by the backend.
    pub fn mark_client_resolved(&self, request_id: &RequestId) {
        if let Err(e) = self
            .store
            .resolve_conflict_record(request_id, ConflictChoice::UseClient)
        {
            tracing::warn!(request_id = %request_id, error = %e, "no conflict record to resolve");
        }
    }

    /// Park a request for manual resolution after an override resubmission
    /// hit another conflict. Prevents a server-wins/client-wins ping-pong.
    pub fn defer(&self, request_id: &RequestId) {
        self.store.apply(request_id, |r| {
            r.status = RequestStatus::Conflict;
            r.metadata.next_attempt_at = None;
        });
    }

    /// Explicitly resolve a parked conflict.
    ///
    /// UseServer discards the local mutation and completes the request;
    /// UseClient returns it to Pending with the override flag set, so the
    /// next sync pass resubmits it.
    pub fn resolve(&self, request_id: &RequestId, choice: ConflictChoice) -> Result<()> {
        let request = self
            .store
            .get(request_id)
            .ok_or_else(|| Error::NotFound(request_id.0.clone()))?;

        if request.status != RequestStatus::Conflict {
            return Err(Error::Conflict(format!(
                "request {} is not awaiting resolution",
                request_id
            )));
        }

        match choice {
            ConflictChoice::UseServer => {
                self.store.complete(request_id);
            }
            ConflictChoice::UseClient => {
                self.store.apply(request_id, |r| {
                    r.status = RequestStatus::Pending;
                    r.metadata.force_override = true;
                    r.metadata.next_attempt_at = None;
                });
            }
        }

        self.store.resolve_conflict_record(request_id, choice)?;
        self.store.persist_best_effort();
        Ok(())
    }

    fn audit_record(request: &QueuedRequest, server_state: Option<Value>) -> ConflictRecord {
        let conflict_type = if server_state.is_some() {
            ConflictType::VersionMismatch
        } else {
            ConflictType::DeletedOnServer
        };
        ConflictRecord::new(
            request.id.clone(),
            conflict_type,
            server_state,
            request.payload.clone(),
            request.conflict_strategy,
            now_ms(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::store::RequestOptions;
    use relayq_core::{Action, EntityType, HttpMethod};
    use serde_json::json;

    fn setup(strategy: ConflictStrategy) -> (Arc<QueueStore>, ConflictResolver, RequestId) {
        let store = Arc::new(QueueStore::new(&QueueConfig::default()));
        let id = store
            .enqueue(
                EntityType::Product,
                Action::Update,
                HttpMethod::Put,
                "/api/v1/products/9".to_string(),
                json!({"price": 12.5, "version": 3}),
                &RequestOptions { conflict_strategy: strategy, ..Default::default() },
            )
            .unwrap();
        let resolver = ConflictResolver::new(store.clone());
        (store, resolver, id)
    }

    #[test]
    fn test_server_wins_completes_and_records() {
        let (store, resolver, id) = setup(ConflictStrategy::ServerWins);
        let request = store.get(&id).unwrap();

        let outcome = resolver.on_conflict(&request, Some(json!({"price": 11.0, "version": 4})));
        assert_eq!(outcome, ConflictOutcome::AdoptedServer);
        assert_eq!(store.get(&id).unwrap().status, RequestStatus::Completed);

        let conflicts = store.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].is_resolved());
        assert_eq!(conflicts[0].resolution, Some(ConflictChoice::UseServer));
        assert_eq!(conflicts[0].conflict_type, ConflictType::VersionMismatch);
    }

    #[test]
    fn test_client_wins_requests_resubmit() {
        let (store, resolver, id) = setup(ConflictStrategy::ClientWins);
        let request = store.get(&id).unwrap();

        let outcome = resolver.on_conflict(&request, Some(json!({"version": 4})));
        assert_eq!(outcome, ConflictOutcome::Resubmit);

        resolver.mark_client_resolved(&id);
        let conflicts = store.conflicts();
        assert_eq!(conflicts[0].resolution, Some(ConflictChoice::UseClient));
    }

    #[test]
    fn test_manual_keeps_both_snapshots() {
        let (store, resolver, id) = setup(ConflictStrategy::Manual);
        let request = store.get(&id).unwrap();

        let outcome = resolver.on_conflict(&request, Some(json!({"price": 10.0})));
        assert_eq!(outcome, ConflictOutcome::Deferred);
        assert_eq!(store.get(&id).unwrap().status, RequestStatus::Conflict);

        let conflicts = store.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert!(!conflicts[0].is_resolved());
        assert_eq!(conflicts[0].server_state, Some(json!({"price": 10.0})));
        assert_eq!(conflicts[0].client_state, json!({"price": 12.5, "version": 3}));
    }

    #[test]
    fn test_manual_resolution_use_client_requeues_with_override() {
        let (store, resolver, id) = setup(ConflictStrategy::Manual);
        let request = store.get(&id).unwrap();
        resolver.on_conflict(&request, Some(json!({})));

        resolver.resolve(&id, ConflictChoice::UseClient).unwrap();

        let request = store.get(&id).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.metadata.force_override);
        assert!(store.conflicts()[0].is_resolved());
    }

    #[test]
    fn test_resolve_rejects_non_conflicted_request() {
        let (_store, resolver, id) = setup(ConflictStrategy::Manual);
        let result = resolver.resolve(&id, ConflictChoice::UseServer);
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_deleted_on_server_classified() {
        let (store, resolver, id) = setup(ConflictStrategy::Manual);
        let request = store.get(&id).unwrap();

        resolver.on_conflict(&request, None);
        assert_eq!(store.conflicts()[0].conflict_type, ConflictType::DeletedOnServer);
    }
}
