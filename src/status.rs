//! Serialisable reports for the external status surface.
//!
//! The core hands these plain values to collaborators (gateways, CLIs);
//! wire encoding is their concern. Internal instants are reported as
//! relative millisecond ages so the values survive serialisation.

use serde::Serialize;

use crate::family::{FamilyId, ProgramFamily};
use crate::policy::LoadBalancingPolicy;
use crate::worker::WorkerId;

/// Liveness report for a single worker.
#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    /// Worker identifier.
    pub worker_id: WorkerId,
    /// Coarse status string.
    pub status: &'static str,
    /// Whether the worker can currently take work.
    pub available: bool,
    /// Whether a major collection is in progress.
    pub collecting: bool,
    /// Heap usage as a percentage.
    pub mem_used_pct: f64,
    /// Number of tasks processed since the last collection.
    pub tasks_processed: usize,
    /// Ids of tasks processed since the last collection.
    pub task_ids: Vec<String>,
    /// Formatted `used/limit (pct)` summary.
    pub memory_usage: String,
}

/// Full status of the adaptive system.
#[derive(Debug, Clone, Serialize)]
pub struct TriniStatus {
    /// Whether the adaptive loops are active.
    pub active: bool,
    /// Monitor interval in milliseconds.
    pub monitor_interval_ms: u64,
    /// Analysis interval in milliseconds.
    pub analysis_interval_ms: u64,
    /// Number of registered program families.
    pub family_count: usize,
    /// The policy the dispatcher currently applies.
    pub current_policy: LoadBalancingPolicy,
    /// Per-worker classification and forecast detail.
    pub workers: Vec<WorkerTriniDetail>,
}

/// Per-worker slice of [`TriniStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerTriniDetail {
    /// Worker identifier.
    pub worker_id: WorkerId,
    /// Current program family.
    pub family: FamilySummary,
    /// Number of retained telemetry snapshots.
    pub gc_history_count: usize,
    /// Latest forecast, if one exists.
    pub forecast: Option<ForecastReport>,
    /// Young-generation usage.
    pub young_gen_used: usize,
    /// Old-generation usage.
    pub old_gen_used: usize,
    /// Young-generation capacity.
    pub young_gen_max: usize,
    /// Old-generation capacity.
    pub old_gen_max: usize,
    /// Major collections completed.
    pub gc_count: u64,
    /// Static dispatch weight.
    pub weight: u32,
}

/// Compact family identification for per-worker reports.
#[derive(Debug, Clone, Serialize)]
pub struct FamilySummary {
    /// Family identifier.
    pub id: FamilyId,
    /// Human-readable name.
    pub name: &'static str,
    /// Forecast horizon in milliseconds.
    pub magc_threshold_ms: u64,
    /// Forecast window in snapshots.
    pub forecast_window: usize,
}

impl From<&ProgramFamily> for FamilySummary {
    fn from(family: &ProgramFamily) -> Self {
        Self {
            id: family.id,
            name: family.name,
            magc_threshold_ms: family.magc_threshold_ms,
            forecast_window: family.forecast_window,
        }
    }
}

/// Serialisable view of a forecast.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastReport {
    /// Milliseconds until the predicted collection, zero once passed.
    pub predicted_in_ms: u64,
    /// Forecast confidence in `[0, 1]`.
    pub confidence: f64,
    /// Predicted young-generation usage at collection time.
    pub young_gen_threshold: usize,
    /// Horizon computed at forecast creation.
    pub time_to_magc_ms: u64,
    /// Forecast age in milliseconds.
    pub age_ms: u64,
    /// Whether the forecast falls within the active policy threshold.
    pub within_threshold: bool,
}

/// Serialisable view of a heap snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    /// Snapshot age in milliseconds.
    pub age_ms: u64,
    /// Young-generation usage.
    pub young_gen_used: usize,
    /// Old-generation usage.
    pub old_gen_used: usize,
    /// Young-generation capacity.
    pub young_gen_max: usize,
    /// Old-generation capacity.
    pub old_gen_max: usize,
    /// Total heap usage.
    pub total_mem_used: usize,
    /// Total heap capacity.
    pub total_mem_max: usize,
    /// Major collections completed at snapshot time.
    pub gc_count: u64,
    /// Duration of the last major collection; zero if none.
    pub magc_duration_ms: u64,
    /// Whether a collection was in progress.
    pub is_collecting_gc: bool,
}

/// Telemetry history slice for one worker.
#[derive(Debug, Clone, Serialize)]
pub struct GcHistoryReport {
    /// Worker identifier.
    pub worker_id: WorkerId,
    /// Snapshots retained in the ring.
    pub history_count: usize,
    /// Snapshots returned after the limit.
    pub returned_count: usize,
    /// The snapshots, most recent last.
    pub gc_history: Vec<SnapshotReport>,
}

/// The family registry as exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyListing {
    /// Id of the fallback family.
    pub default_family: FamilyId,
    /// All families in classification order.
    pub families: Vec<FamilyDetail>,
}

/// Full description of one program family.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyDetail {
    /// Family identifier.
    pub id: FamilyId,
    /// Human-readable name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Lower bound on average collection duration, if any.
    pub min_avg_magc_ms: Option<u64>,
    /// Upper bound on average collection duration, if any.
    pub max_avg_magc_ms: Option<u64>,
    /// Minimum samples before the family applies.
    pub min_samples: usize,
    /// The family's preferred policy.
    pub policy: LoadBalancingPolicy,
    /// Forecast window in snapshots.
    pub forecast_window: usize,
    /// Forecast horizon in milliseconds.
    pub magc_threshold_ms: u64,
}

impl From<&ProgramFamily> for FamilyDetail {
    fn from(family: &ProgramFamily) -> Self {
        Self {
            id: family.id,
            name: family.name,
            description: family.description,
            min_avg_magc_ms: family.criteria.min_avg_magc_ms,
            max_avg_magc_ms: family.criteria.max_avg_magc_ms,
            min_samples: family.criteria.min_samples,
            policy: family.policy.clone(),
            forecast_window: family.forecast_window,
            magc_threshold_ms: family.magc_threshold_ms,
        }
    }
}
