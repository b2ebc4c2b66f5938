//! Capacity rejection, reclamation, and recovery scenarios.

mod common;

use common::{balancer, sha256_hex};
use std::time::Duration;
use trini_balancer::TaskStatus;

#[tokio::test(start_paused = true)]
async fn capacity_rejection_triggers_reclaim_and_recovery() {
    // A single 10-unit worker with the usage trigger effectively disabled,
    // so only the failing capacity check starts a collection.
    let balancer = balancer(1, 10, 1.0);
    let worker = balancer.worker(1).unwrap();

    for input in ["xxxx", "yyyy"] {
        let task = worker.submit(input).await.result().await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "input {input}");
    }

    // 8 units used: the third task does not fit, and rejecting it starts
    // a major collection.
    let task = worker.submit("zzzz").await.result().await.unwrap();
    assert_eq!(task.status, TaskStatus::Rejected);
    assert!(task.output.is_empty());

    // After the pause ceiling the heap is clear and the same task fits.
    tokio::time::sleep(Duration::from_secs(6)).await;

    let ping = balancer.ping(1).await.unwrap();
    assert!(ping.available);
    assert_eq!(ping.tasks_processed, 0);

    let task = worker.submit("zzzz").await.result().await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output, sha256_hex("zzzz"));
}

#[tokio::test(start_paused = true)]
async fn usage_threshold_schedules_collection_after_completion() {
    let balancer = balancer(1, 10, 0.8);
    let worker = balancer.worker(1).unwrap();

    // Two five-unit tasks fill the heap; crossing the 80% trigger after
    // the second completion schedules an asynchronous collection.
    for input in ["xxxxx", "yyyyy"] {
        let task = worker.submit(input).await.result().await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    // The next submission lands during or after the collection window; it
    // is either rejected mid-pause or completes on a cleared heap, and the
    // heap is eventually reset either way.
    tokio::time::sleep(Duration::from_secs(6)).await;

    let ping = balancer.ping(1).await.unwrap();
    assert!(ping.available);
    assert!(!ping.collecting);
    assert_eq!(ping.tasks_processed, 0);
    assert!((ping.mem_used_pct - 0.0).abs() < f64::EPSILON);

    let task = worker.submit("zzzzz").await.result().await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn rejection_during_pause_then_dispatch_recovers() {
    let balancer = balancer(2, 10, 1.0);
    let first = balancer.worker(1).unwrap();

    // Fill worker 1 and force its reclaim path.
    first.submit("aaaaaaaa").await.result().await.unwrap();
    let rejected = first.submit("bbbbbbbb").await.result().await.unwrap();
    assert_eq!(rejected.status, TaskStatus::Rejected);

    // Dispatch routes around worker 1, which is either mid-pause already
    // or still too full for a three-unit task.
    let worker = balancer.dispatch("ccc").await.unwrap();
    assert_eq!(worker.id(), 2);
}
