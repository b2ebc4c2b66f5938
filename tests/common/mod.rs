//! Shared fixtures for integration tests.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use trini_balancer::{Balancer, BalancerConfig};

/// Builds a balancer over `workers` workers with the given heap budget and
/// collection trigger fraction.
pub fn balancer(workers: u32, heap_max: usize, gc_trigger: f64) -> Arc<Balancer> {
    let mut config = BalancerConfig::default();
    config.cluster.workers = workers;
    config.cluster.heap_max = heap_max;
    config.cluster.gc_trigger = gc_trigger;
    Balancer::new(config).expect("valid test configuration")
}

/// Hex-encoded SHA-256, the default payload's output.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input))
}
