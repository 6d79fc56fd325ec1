/// On-demand statistics over a queue snapshot
///
/// Derived from the current state on every call; carries no mutable state
/// of its own.

use relayq_core::{ConflictRecord, QueuedRequest, RequestStatus, Statistics};

/// Rough per-request dispatch estimate used for the sync-time projection
const EST_DISPATCH_MS: u64 = 500;

pub fn collect(requests: &[QueuedRequest], conflicts: &[ConflictRecord]) -> Statistics {
    let mut stats = Statistics {
        total_queued: requests.len(),
        ..Default::default()
    };

    for request in requests {
        *stats.by_priority.entry(request.priority).or_insert(0) += 1;
        *stats.by_entity_type.entry(request.entity_type).or_insert(0) += 1;
        *stats.by_status.entry(request.status).or_insert(0) += 1;

        if request.status == RequestStatus::Pending {
            let created = request.metadata.created_at;
            stats.oldest_pending_at =
                Some(stats.oldest_pending_at.map_or(created, |oldest| oldest.min(created)));
        }
    }

    let pending = stats
        .by_status
        .get(&RequestStatus::Pending)
        .copied()
        .unwrap_or(0);
    stats.estimated_sync_duration_ms = pending as u64 * EST_DISPATCH_MS;
    stats.conflicts_pending = conflicts.iter().filter(|c| !c.is_resolved()).count();

    stats
}
