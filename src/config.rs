//! Configuration types for the balancer and its simulated cluster.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{BalancerError, Result};

/// Top-level balancer configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Worker pool configuration.
    pub cluster: ClusterConfig,
    /// Simulated latency knobs.
    pub timing: TimingConfig,
    /// Major-collection pause model.
    pub magc: MagcDurationConfig,
    /// Adaptive control loop configuration.
    pub trini: TriniConfig,
}

impl BalancerConfig {
    /// Loads configuration from a TOML file layered under `TRINI_`-prefixed
    /// environment variables, then validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TRINI_").split("_"))
            .extract()
            .map_err(|e| BalancerError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.workers == 0 {
            return Err(BalancerError::Config("cluster.workers must be at least 1".into()));
        }
        if !(self.cluster.gc_trigger > 0.0 && self.cluster.gc_trigger <= 1.0) {
            return Err(BalancerError::Config(format!(
                "cluster.gc_trigger must be in (0, 1], got {}",
                self.cluster.gc_trigger
            )));
        }
        if self.cluster.heap_max == 0 {
            return Err(BalancerError::Config("cluster.heap_max must be positive".into()));
        }
        if self.timing.execute_min > self.timing.execute_max {
            return Err(BalancerError::Config(
                "timing.execute_min must not exceed timing.execute_max".into(),
            ));
        }
        if self.magc.floor_ms > self.magc.ceiling_ms {
            return Err(BalancerError::Config(
                "magc.floor_ms must not exceed magc.ceiling_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration.
///
/// The pool is fixed for the process lifetime; workers are created at
/// startup and destroyed at shutdown.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of simulated workers.
    pub workers: u32,
    /// Total heap budget per worker, in task-size units.
    pub heap_max: usize,
    /// Heap usage fraction (0, 1] above which a worker schedules a major
    /// collection after finishing a task.
    pub gc_trigger: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            heap_max: 100,
            gc_trigger: 0.8,
        }
    }
}

/// Simulated latency knobs.
///
/// These sleeps shape the forecaster's time axis; they are simulation
/// parameters, not incidental delays.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay applied by every availability check, capacity check, and ping.
    #[serde(with = "serde_duration_ms")]
    pub probe_delay: Duration,
    /// Delay applied on task submission before execution is spawned.
    #[serde(with = "serde_duration_ms")]
    pub submit_delay: Duration,
    /// Lower bound of the per-task execution latency.
    #[serde(with = "serde_duration_ms")]
    pub execute_min: Duration,
    /// Upper bound of the per-task execution latency.
    #[serde(with = "serde_duration_ms")]
    pub execute_max: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_delay: Duration::from_millis(100),
            submit_delay: Duration::from_millis(300),
            execute_min: Duration::from_millis(500),
            execute_max: Duration::from_millis(600),
        }
    }
}

/// Major-collection pause model: `base_ms + slope_ms * usage`, jittered by
/// ±20% and clipped to `[floor_ms, ceiling_ms]`.
///
/// The default base exceeds the default ceiling, so in practice every pause
/// lands on the ceiling. Both ends are configurable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MagcDurationConfig {
    /// Base pause in milliseconds.
    pub base_ms: u64,
    /// Additional milliseconds per unit of heap usage (0.0-1.0).
    pub slope_ms: u64,
    /// Minimum pause after clipping.
    pub floor_ms: u64,
    /// Maximum pause after clipping.
    pub ceiling_ms: u64,
}

impl Default for MagcDurationConfig {
    fn default() -> Self {
        Self {
            base_ms: 10_000,
            slope_ms: 2_500,
            floor_ms: 100,
            ceiling_ms: 5_000,
        }
    }
}

/// Adaptive control loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriniConfig {
    /// Whether the adaptive system starts active.
    pub active: bool,
    /// Interval between telemetry snapshots.
    #[serde(with = "serde_duration_secs")]
    pub monitor_interval: Duration,
    /// Interval between classification/forecast passes.
    #[serde(with = "serde_duration_secs")]
    pub analysis_interval: Duration,
    /// Bounded capacity of each worker's snapshot ring.
    pub history_capacity: usize,
    /// Age beyond which a forecast (or the newest snapshot feeding one) is
    /// considered stale.
    #[serde(with = "serde_duration_secs")]
    pub forecast_stale_after: Duration,
}

impl Default for TriniConfig {
    fn default() -> Self {
        Self {
            active: true,
            monitor_interval: Duration::from_secs(2),
            analysis_interval: Duration::from_secs(10),
            history_capacity: 100,
            forecast_stale_after: Duration::from_secs(30),
        }
    }
}

/// Serde helper for Duration as milliseconds.
mod serde_duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BalancerConfig::default();
        assert_eq!(config.cluster.workers, 4);
        assert_eq!(config.cluster.heap_max, 100);
        assert!((config.cluster.gc_trigger - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.trini.monitor_interval, Duration::from_secs(2));
        assert_eq!(config.trini.analysis_interval, Duration::from_secs(10));
        assert_eq!(config.trini.history_capacity, 100);
        config.validate().unwrap();
    }

    #[test]
    fn magc_defaults_keep_base_above_ceiling() {
        let magc = MagcDurationConfig::default();
        assert!(magc.base_ms > magc.ceiling_ms);
        assert_eq!(magc.ceiling_ms, 5_000);
    }

    #[test]
    fn validate_rejects_bad_gc_trigger() {
        let mut config = BalancerConfig::default();
        config.cluster.gc_trigger = 0.0;
        assert!(config.validate().is_err());

        config.cluster.gc_trigger = 1.5;
        assert!(config.validate().is_err());

        config.cluster.gc_trigger = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_pool() {
        let mut config = BalancerConfig::default();
        config.cluster.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_deserialize_from_scalars() {
        let config: BalancerConfig = serde_json::from_str(
            r#"{"timing":{"probe_delay":50},"trini":{"monitor_interval":1}}"#,
        )
        .unwrap();
        assert_eq!(config.timing.probe_delay, Duration::from_millis(50));
        assert_eq!(config.trini.monitor_interval, Duration::from_secs(1));
        // Unspecified fields keep their defaults.
        assert_eq!(config.timing.submit_delay, Duration::from_millis(300));
    }
}
