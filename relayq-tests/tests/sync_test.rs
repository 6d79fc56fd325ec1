/// Sync pass ordering, retry backoff, terminal failure, and cascading
/// dependency failure.

use anyhow::Result;
use relayq_core::{Priority, RequestStatus};
use relayq_sync::ExecuteOutcome;
use relayq_test_utils::TestQueue;
use std::time::Duration;

#[tokio::test]
async fn test_dispatch_order_priority_then_fifo() -> Result<()> {
    let queue = TestQueue::online();
    queue.enqueue_order(1, Priority::Low);
    queue.enqueue_order(2, Priority::Critical);
    queue.enqueue_order(3, Priority::High);
    queue.enqueue_order(4, Priority::High);

    let result = queue.manager.sync_queue().await;
    assert!(result.success);
    assert_eq!(result.synced_count, 4);

    let dispatched: Vec<u64> = queue
        .executor
        .calls()
        .iter()
        .map(|c| c.payload["order"].as_u64().unwrap())
        .collect();
    assert_eq!(dispatched, vec![2, 3, 4, 1]);
    Ok(())
}

#[tokio::test]
async fn test_retryable_failure_reports_but_keeps_request() -> Result<()> {
    let queue = TestQueue::online();
    let id = queue.enqueue_order(1, Priority::Medium);
    queue.executor.push_network_failures(1);

    let result = queue.manager.sync_queue().await;

    // The pass is not clean, but the request is not terminally failed.
    assert!(!result.success);
    assert_eq!(result.failed_count, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, "NETWORK_ERROR");

    let request = queue.manager.get_request_status(&id).unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.metadata.retry_count, 1);
    assert!(request.metadata.next_attempt_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_backoff_gates_until_next_attempt() -> Result<()> {
    let queue = TestQueue::online();
    queue.enqueue_order(1, Priority::Medium);
    queue.executor.push_network_failures(1);

    queue.manager.sync_queue().await;
    assert_eq!(queue.executor.call_count(), 1);

    // Immediately after the failure the backoff window is still open, so a
    // new pass finds nothing dispatchable.
    let result = queue.manager.sync_queue().await;
    assert_eq!(result.synced_count, 0);
    assert_eq!(queue.executor.call_count(), 1);

    // Past the (fast-policy) backoff window the retry goes out and lands.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let result = queue.manager.sync_queue().await;
    assert!(result.success);
    assert_eq!(result.synced_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_fail_terminally_and_cascade() -> Result<()> {
    let queue = TestQueue::online();
    let parent = queue.enqueue_order(1, Priority::Medium);
    let child = queue.enqueue_dependent(vec![parent.clone()]);

    // Fast policy allows 3 retries; the 4th failure is terminal.
    queue.executor.push_network_failures(4);

    let mut last = queue.manager.sync_queue().await;
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(120)).await;
        last = queue.manager.sync_queue().await;
        if queue.manager.get_request_status(&parent).unwrap().status == RequestStatus::Failed {
            break;
        }
    }

    assert_eq!(
        queue.manager.get_request_status(&parent).unwrap().status,
        RequestStatus::Failed
    );

    // The dependent never reached the backend and failed by cascade.
    let child_request = queue.manager.get_request_status(&child).unwrap();
    assert_eq!(child_request.status, RequestStatus::Failed);
    assert!(child_request
        .metadata
        .last_error
        .unwrap()
        .starts_with("dependency failed"));
    assert!(last
        .errors
        .iter()
        .any(|e| e.code == "DEPENDENCY_FAILED" && e.request_id == child));
    Ok(())
}

#[tokio::test]
async fn test_non_retryable_failure_is_immediately_terminal() -> Result<()> {
    let queue = TestQueue::online();
    let id = queue.enqueue_order(1, Priority::Medium);
    queue.executor.push_outcome(ExecuteOutcome::Failure(
        relayq_core::Error::Server {
            status: 422,
            message: "validation failed".to_string(),
        },
    ));

    let result = queue.manager.sync_queue().await;
    assert!(!result.success);
    assert_eq!(result.failed_count, 1);
    assert_eq!(
        queue.manager.get_request_status(&id).unwrap().status,
        RequestStatus::Failed
    );

    // No retry was attempted.
    assert_eq!(queue.executor.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_dependency_chain_completes_in_one_call() -> Result<()> {
    let queue = TestQueue::online();
    let a = queue.enqueue_order(1, Priority::Medium);
    let b = queue.enqueue_dependent(vec![a.clone()]);
    let c = queue.enqueue_dependent(vec![b.clone()]);

    // A single sync call runs batches in rounds, so each link of the chain
    // becomes eligible once its dependency completed.
    let result = queue.manager.sync_queue().await;
    assert!(result.success);
    assert_eq!(result.synced_count, 3);
    assert_eq!(
        queue.manager.get_request_status(&c).unwrap().status,
        RequestStatus::Completed
    );
    Ok(())
}
