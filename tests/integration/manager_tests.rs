//! Transform manager tests.
//!
//! A gated mock source keeps workers busy on demand, which makes
//! coalescing, queueing and rejection observable from outside the actor.

use std::time::Duration;

use pixelpipe::error::{OverloadReason, TransformError};
use pixelpipe::transform::{
    ImageOrigin, ManagerConfig, Operation, OutputFormat, TransformManager, TransformRequest,
};

use super::test_utils::*;

fn grayscale(id: &str) -> TransformRequest {
    TransformRequest::new(id, vec![Operation::Grayscale], OutputFormat::Png)
}

fn source_with(ids: &[&str]) -> MockImageSource {
    ids.iter().fold(MockImageSource::new(), |source, id| {
        source.with_image(*id, create_test_png(16, 8))
    })
}

async fn wait_for_completed(manager: &TransformManager, completed: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = manager.stats().await.unwrap();
        if stats.completed + stats.failed >= completed {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "work never completed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_identical_requests_share_one_transform() {
    let source = source_with(&["a.png"]).gated();
    let manager = spawn_manager(&source, test_manager_config(2, 4));

    let tickets: Vec<_> = (0..5).map(|_| manager.submit(grayscale("a.png"))).collect();
    wait_until(|| source.fetch_count() == 1).await;

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.coalesced, 4);
    assert_eq!(stats.busy_workers, 1);

    source.release(1);

    let mut outputs = Vec::new();
    for ticket in tickets {
        outputs.push(ticket.wait().await.unwrap());
    }

    assert_eq!(source.fetch_count(), 1);
    for output in &outputs {
        assert_eq!(output.data, outputs[0].data);
        assert_eq!(output.fingerprint, outputs[0].fingerprint);
        assert_eq!(output.origin, ImageOrigin::Transform);
    }
}

#[tokio::test]
async fn test_failure_reaches_every_waiter_and_is_not_cached() {
    let source = MockImageSource::new().gated();
    let manager = spawn_manager(&source, test_manager_config(1, 4));

    let tickets: Vec<_> = (0..3).map(|_| manager.submit(grayscale("missing.png"))).collect();
    wait_until(|| source.fetch_count() == 1).await;
    source.release(1);

    for ticket in tickets {
        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, TransformError::SourceNotFound { .. }), "{err}");
    }

    source.release(1);
    let err = manager.transform(grayscale("missing.png")).await.unwrap_err();
    assert!(matches!(err, TransformError::SourceNotFound { .. }));
    assert_eq!(source.fetch_count(), 2);

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.cache_entries, 0);
}

#[tokio::test]
async fn test_source_panic_answers_waiters_and_frees_worker() {
    let source = source_with(&["a.png"]).panicking_on("boom.png");
    let manager = spawn_manager(&source, test_manager_config(1, 4));

    let first = manager.submit(grayscale("boom.png"));
    let second = manager.submit(grayscale("boom.png"));
    let queued = manager.submit(grayscale("a.png"));

    for ticket in [first, second] {
        let err = tokio::time::timeout(Duration::from_secs(2), ticket.wait())
            .await
            .expect("waiter was never answered")
            .unwrap_err();
        assert!(matches!(err, TransformError::Internal { .. }), "{err}");
    }

    // The queued request still gets the single worker
    let output = tokio::time::timeout(Duration::from_secs(2), queued.wait())
        .await
        .expect("queued request was never dispatched")
        .unwrap();
    assert_eq!(output.origin, ImageOrigin::Transform);

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.busy_workers, 0);
    assert_eq!(stats.workers, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.failed, 1);

    let later = manager.transform(grayscale("a.png")).await.unwrap();
    assert_eq!(later.origin, ImageOrigin::Cache);
}

// =============================================================================
// Admission and Dispatch
// =============================================================================

#[tokio::test]
async fn test_full_queue_rejects_new_fingerprints() {
    let source = source_with(&["a.png", "b.png", "c.png"]).gated();
    let manager = spawn_manager(&source, test_manager_config(1, 1));

    let a = manager.submit(grayscale("a.png"));
    wait_until(|| source.fetch_count() == 1).await;

    let b = manager.submit(grayscale("b.png"));
    let c = manager.submit(grayscale("c.png"));

    let err = c.wait().await.unwrap_err();
    assert!(matches!(
        err,
        TransformError::Overloaded {
            reason: OverloadReason::QueueFull
        }
    ));

    // Joining a queued fingerprint does not need a queue slot
    let b_again = manager.submit(grayscale("b.png"));

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.rejected, 1);

    source.release(2);
    assert!(a.wait().await.is_ok());
    let b = b.wait().await.unwrap();
    let b_again = b_again.wait().await.unwrap();
    assert_eq!(b.data, b_again.data);
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_queued_requests_dispatch_in_arrival_order() {
    let ids = ["first.png", "second.png", "third.png", "fourth.png"];
    let source = source_with(&ids).gated();
    let manager = spawn_manager(&source, test_manager_config(1, 8));

    let first = manager.submit(grayscale(ids[0]));
    wait_until(|| source.fetch_count() == 1).await;

    let rest: Vec<_> = ids[1..].iter().map(|id| manager.submit(grayscale(id))).collect();
    assert_eq!(manager.stats().await.unwrap().queued, 3);

    source.release(ids.len());
    first.wait().await.unwrap();
    for ticket in rest {
        ticket.wait().await.unwrap();
    }

    assert_eq!(source.fetches().await, ids.to_vec());
}

#[tokio::test]
async fn test_queued_request_times_out() {
    let source = source_with(&["a.png", "b.png"]).gated();
    let config = ManagerConfig {
        max_queue_wait: Duration::from_millis(50),
        pending_check_interval: Duration::from_millis(10),
        ..test_manager_config(1, 4)
    };
    let manager = spawn_manager(&source, config);

    let a = manager.submit(grayscale("a.png"));
    wait_until(|| source.fetch_count() == 1).await;

    let err = manager.transform(grayscale("b.png")).await.unwrap_err();
    assert!(matches!(
        err,
        TransformError::Overloaded {
            reason: OverloadReason::QueueTimeout
        }
    ));

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.pending, 1);

    // The dispatched request is never timed out
    source.release(1);
    assert!(a.wait().await.is_ok());
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_full_inbox_rejects_immediately() {
    let source = source_with(&["a.png", "b.png"]);
    let config = ManagerConfig {
        inbox_capacity: 1,
        ..test_manager_config(1, 4)
    };
    let manager = spawn_manager(&source, config);

    // The manager task cannot run between these two calls on this runtime
    let a = manager.submit(grayscale("a.png"));
    let b = manager.submit(grayscale("b.png"));

    let err = b.wait().await.unwrap_err();
    assert!(matches!(
        err,
        TransformError::Overloaded {
            reason: OverloadReason::Busy
        }
    ));
    assert!(a.wait().await.is_ok());
}

// =============================================================================
// Caching
// =============================================================================

#[tokio::test]
async fn test_cache_hit_after_completion() {
    let source = source_with(&["a.png"]);
    let manager = spawn_manager(&source, test_manager_config(2, 4));

    let fresh = manager.transform(grayscale("a.png")).await.unwrap();
    assert_eq!(fresh.origin, ImageOrigin::Transform);
    assert!(fresh.timings.is_some());

    let cached = manager.transform(grayscale("a.png")).await.unwrap();
    assert_eq!(cached.origin, ImageOrigin::Cache);
    assert!(cached.timings.is_none());
    assert_eq!(cached.data, fresh.data);

    let other_format = TransformRequest::new("a.png", vec![Operation::Grayscale], OutputFormat::Gif);
    let other = manager.transform(other_format).await.unwrap();
    assert_eq!(other.origin, ImageOrigin::Transform);

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.cache_entries, 2);
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_abandoned_request_is_still_cached() {
    let source = source_with(&["a.png"]).gated();
    let manager = spawn_manager(&source, test_manager_config(1, 4));

    drop(manager.submit(grayscale("a.png")));
    wait_until(|| source.fetch_count() == 1).await;
    source.release(1);
    wait_for_completed(&manager, 1).await;

    let output = manager.transform(grayscale("a.png")).await.unwrap();
    assert_eq!(output.origin, ImageOrigin::Cache);
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_clear_cache() {
    let source = source_with(&["a.png", "b.png"]);
    let manager = spawn_manager(&source, test_manager_config(2, 4));

    manager.transform(grayscale("a.png")).await.unwrap();
    manager.transform(grayscale("b.png")).await.unwrap();

    assert_eq!(manager.clear_cache().await.unwrap(), 2);
    assert_eq!(manager.clear_cache().await.unwrap(), 0);

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.cache_entries, 0);
    assert_eq!(stats.cache_bytes, 0);

    let output = manager.transform(grayscale("a.png")).await.unwrap();
    assert_eq!(output.origin, ImageOrigin::Transform);
}
