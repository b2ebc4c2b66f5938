//! Load-balancing policies and selection algorithms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BalancerError;

/// Selection algorithm for dispatching tasks across the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Round-robin over the worker ring.
    #[serde(rename = "RR")]
    RoundRobin,
    /// Uniform random over the eligible set.
    #[serde(rename = "RAN")]
    Random,
    /// Weighted round-robin consuming runtime weights.
    #[serde(rename = "WRR")]
    WeightedRoundRobin,
    /// Weighted random with static weights as bucket widths.
    #[serde(rename = "WRAN")]
    WeightedRandom,
}

impl Algorithm {
    /// Returns the wire name of the algorithm.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RoundRobin => "RR",
            Self::Random => "RAN",
            Self::WeightedRoundRobin => "WRR",
            Self::WeightedRandom => "WRAN",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RR" => Ok(Self::RoundRobin),
            "RAN" => Ok(Self::Random),
            "WRR" => Ok(Self::WeightedRoundRobin),
            "WRAN" => Ok(Self::WeightedRandom),
            other => Err(BalancerError::UnknownAlgorithm(other.to_owned())),
        }
    }
}

/// Rules the dispatcher applies when selecting a worker.
///
/// A single instance is owned by the dispatcher and replaced atomically,
/// either by the policy-adaptation step of the analysis loop or by an
/// external operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancingPolicy {
    /// Selection algorithm.
    pub algorithm: Algorithm,
    /// Whether the forecast guard participates in selection.
    pub gc_aware: bool,
    /// Forecast horizon: a worker is skipped when a major collection is
    /// predicted within this many milliseconds.
    pub magc_threshold_ms: u64,
    /// Number of recent snapshots the policy considers significant.
    pub history_window_size: usize,
}

impl Default for LoadBalancingPolicy {
    /// The default family's policy: plain round-robin, forecast guard off.
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RoundRobin,
            gc_aware: false,
            magc_threshold_ms: 2_000,
            history_window_size: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_round_trips_through_names() {
        for algo in [
            Algorithm::RoundRobin,
            Algorithm::Random,
            Algorithm::WeightedRoundRobin,
            Algorithm::WeightedRandom,
        ] {
            assert_eq!(algo.name().parse::<Algorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn algorithm_parse_is_case_insensitive() {
        assert_eq!("wrr".parse::<Algorithm>().unwrap(), Algorithm::WeightedRoundRobin);
        assert_eq!("Ran".parse::<Algorithm>().unwrap(), Algorithm::Random);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = "LRU".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, BalancerError::UnknownAlgorithm(ref s) if s == "LRU"));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Algorithm::WeightedRandom).unwrap();
        assert_eq!(json, "\"WRAN\"");

        let policy: LoadBalancingPolicy = serde_json::from_str(
            r#"{"algorithm":"RAN","gc_aware":true,"magc_threshold_ms":3000,"history_window_size":30}"#,
        )
        .unwrap();
        assert_eq!(policy.algorithm, Algorithm::Random);
        assert!(policy.gc_aware);
    }

    #[test]
    fn default_policy_is_plain_round_robin() {
        let policy = LoadBalancingPolicy::default();
        assert_eq!(policy.algorithm, Algorithm::RoundRobin);
        assert!(!policy.gc_aware);
        assert_eq!(policy.magc_threshold_ms, 2_000);
    }
}
