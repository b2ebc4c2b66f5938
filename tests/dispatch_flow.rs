//! End-to-end dispatch scenarios through the public surface.

mod common;

use common::{balancer, sha256_hex};
use trini_balancer::{Algorithm, LoadBalancingPolicy, TaskStatus};

#[tokio::test(start_paused = true)]
async fn cold_start_round_robin_processes_in_order() {
    let balancer = balancer(4, 100, 0.8);
    balancer.set_policy(LoadBalancingPolicy {
        algorithm: Algorithm::RoundRobin,
        gc_aware: true,
        magc_threshold_ms: 2_000,
        history_window_size: 30,
    });

    let inputs = ["a", "bb", "ccc", "dddd"];
    let mut selected = Vec::new();

    for input in inputs {
        let worker = balancer.dispatch(input).await.expect("worker available");
        selected.push(worker.id());

        let task = worker
            .submit(input)
            .await
            .result()
            .await
            .expect("result published");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.input, input);
        assert_eq!(task.output, sha256_hex(input));
    }

    // With no history there are no forecasts, so the GC guard never fires
    // and the ring is walked in order.
    assert_eq!(selected, vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn round_robin_fairness_over_idle_pool() {
    let balancer = balancer(4, 1_000, 0.8);

    let mut counts = std::collections::HashMap::new();
    for _ in 0..12 {
        let worker = balancer.dispatch("x").await.unwrap();
        *counts.entry(worker.id()).or_insert(0u32) += 1;
    }

    for id in 1..=4 {
        assert_eq!(counts[&id], 3, "worker {id} should be selected exactly 3 times");
    }
}

#[tokio::test(start_paused = true)]
async fn process_combines_dispatch_and_submit() {
    let balancer = balancer(2, 100, 0.8);

    let pending = balancer.process("hello world").await.unwrap();
    let task = pending.result().await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output, sha256_hex("hello world"));
    assert!(task.id.starts_with("task-"));
}

#[tokio::test(start_paused = true)]
async fn unknown_algorithm_is_rejected_before_policy_install() {
    let balancer = balancer(2, 100, 0.8);
    let before = balancer.policy();

    let parsed = "FIFO".parse::<Algorithm>();
    assert!(parsed.is_err());

    // Nothing was installed.
    assert_eq!(balancer.policy(), before);
}
