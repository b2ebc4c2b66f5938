//! Program families: equivalence classes of workers by observed
//! major-collection duration, each carrying a preferred policy.
//!
//! The family set is closed and ordered. Classification walks the registry
//! in a stable order (`short-magc`, `medium-magc`, `long-magc`, then the
//! `default` fallback) so tie-breaking is reproducible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::policy::{Algorithm, LoadBalancingPolicy};
use crate::telemetry::HeapSnapshot;

/// Number of recent collection durations the classifier inspects.
const RECENT_DURATION_SAMPLES: usize = 10;

/// Minimum history length before classification runs at all.
pub(crate) const MIN_HISTORY_FOR_ANALYSIS: usize = 3;

/// Identifier of a program family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FamilyId {
    /// Major collections typically at or under 500 ms.
    ShortMagc,
    /// Major collections between 500 ms and 2 s.
    MediumMagc,
    /// Major collections at or over 2 s.
    LongMagc,
    /// Fallback for unclassified workers.
    Default,
}

impl FamilyId {
    /// Returns the wire name of the family.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortMagc => "short-magc",
            Self::MediumMagc => "medium-magc",
            Self::LongMagc => "long-magc",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds on the average recent major-collection duration that qualify a
/// worker for a family. Bounds are inclusive.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DurationCriteria {
    /// Lower bound on the average duration, if any.
    pub min_avg_magc_ms: Option<u64>,
    /// Upper bound on the average duration, if any.
    pub max_avg_magc_ms: Option<u64>,
    /// Minimum number of duration samples before the family applies.
    pub min_samples: usize,
}

impl DurationCriteria {
    fn admits(&self, avg_ms: u64) -> bool {
        if let Some(max) = self.max_avg_magc_ms {
            if avg_ms > max {
                return false;
            }
        }
        if let Some(min) = self.min_avg_magc_ms {
            if avg_ms < min {
                return false;
            }
        }
        true
    }
}

/// A program family: classification criteria plus the policy installed when
/// the family dominates the cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramFamily {
    /// Family identifier.
    pub id: FamilyId,
    /// Human-readable name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Qualification criteria.
    pub criteria: DurationCriteria,
    /// Policy this family prefers.
    pub policy: LoadBalancingPolicy,
    /// Number of recent snapshots the forecaster consumes for members.
    pub forecast_window: usize,
    /// Forecast horizon in milliseconds for members.
    pub magc_threshold_ms: u64,
}

/// The closed, ordered set of program families.
#[derive(Debug)]
pub struct FamilyRegistry {
    families: Vec<Arc<ProgramFamily>>,
}

impl FamilyRegistry {
    /// Builds the predefined registry.
    #[must_use]
    pub fn new() -> Self {
        let families = vec![
            Arc::new(ProgramFamily {
                id: FamilyId::ShortMagc,
                name: "Short MaGC Duration",
                description: "Applications with major collections typically under 500ms",
                criteria: DurationCriteria {
                    min_avg_magc_ms: None,
                    max_avg_magc_ms: Some(500),
                    min_samples: 5,
                },
                policy: LoadBalancingPolicy {
                    algorithm: Algorithm::RoundRobin,
                    gc_aware: true,
                    magc_threshold_ms: 1_000,
                    history_window_size: 20,
                },
                forecast_window: 15,
                magc_threshold_ms: 1_000,
            }),
            Arc::new(ProgramFamily {
                id: FamilyId::MediumMagc,
                name: "Medium MaGC Duration",
                description: "Applications with major collections between 500ms and 2s",
                criteria: DurationCriteria {
                    min_avg_magc_ms: Some(500),
                    max_avg_magc_ms: Some(2_000),
                    min_samples: 5,
                },
                policy: LoadBalancingPolicy {
                    algorithm: Algorithm::WeightedRoundRobin,
                    gc_aware: true,
                    magc_threshold_ms: 3_000,
                    history_window_size: 30,
                },
                forecast_window: 25,
                magc_threshold_ms: 3_000,
            }),
            Arc::new(ProgramFamily {
                id: FamilyId::LongMagc,
                name: "Long MaGC Duration",
                description: "Applications with major collections over 2 seconds",
                criteria: DurationCriteria {
                    min_avg_magc_ms: Some(2_000),
                    max_avg_magc_ms: None,
                    min_samples: 3,
                },
                policy: LoadBalancingPolicy {
                    algorithm: Algorithm::WeightedRoundRobin,
                    gc_aware: true,
                    magc_threshold_ms: 5_000,
                    history_window_size: 40,
                },
                forecast_window: 35,
                magc_threshold_ms: 5_000,
            }),
            Arc::new(ProgramFamily {
                id: FamilyId::Default,
                name: "Default",
                description: "Default family for unclassified applications",
                criteria: DurationCriteria {
                    min_avg_magc_ms: None,
                    max_avg_magc_ms: None,
                    min_samples: 0,
                },
                policy: LoadBalancingPolicy::default(),
                forecast_window: 10,
                magc_threshold_ms: 2_000,
            }),
        ];

        Self { families }
    }

    /// The fallback family.
    #[must_use]
    pub fn default_family(&self) -> &Arc<ProgramFamily> {
        self.families
            .last()
            .expect("registry always holds the default family")
    }

    /// Looks up a family by id.
    #[must_use]
    pub fn get(&self, id: FamilyId) -> Option<&Arc<ProgramFamily>> {
        self.families.iter().find(|f| f.id == id)
    }

    /// All families in classification order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProgramFamily>> {
        self.families.iter()
    }

    /// Number of registered families.
    #[must_use]
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Returns true if the registry is empty. It never is.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Re-evaluates a worker's family against its history.
    ///
    /// Computes the mean of the recent collection durations and returns the
    /// first family in registry order that admits it with enough samples.
    /// When no family qualifies, the current family is kept while it still
    /// fits the observations; a current family that became invalid falls
    /// back to `default`.
    pub fn classify(
        &self,
        current: &Arc<ProgramFamily>,
        history: &[HeapSnapshot],
    ) -> Arc<ProgramFamily> {
        if history.len() < MIN_HISTORY_FOR_ANALYSIS {
            return Arc::clone(current);
        }

        let durations = recent_magc_durations(history);
        let Some(avg) = average(&durations) else {
            // No collections observed yet.
            return Arc::clone(current);
        };

        for family in &self.families {
            if family.id == FamilyId::Default {
                continue;
            }
            if durations.len() < family.criteria.min_samples {
                continue;
            }
            if family.criteria.admits(avg) {
                return Arc::clone(family);
            }
        }

        if self.still_valid(current, history) {
            Arc::clone(current)
        } else {
            Arc::clone(self.default_family())
        }
    }

    /// Checks whether a family still suits the observed history.
    fn still_valid(&self, family: &ProgramFamily, history: &[HeapSnapshot]) -> bool {
        if history.len() < family.criteria.min_samples {
            // A family demanding samples is only valid on a blank slate.
            return history.is_empty();
        }

        let durations = recent_magc_durations(history);
        match average(&durations) {
            // No collections observed yet: nothing contradicts the family.
            None => true,
            Some(avg) => family.criteria.admits(avg),
        }
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects the newest-first major-collection durations out of the history,
/// at most [`RECENT_DURATION_SAMPLES`] of them.
fn recent_magc_durations(history: &[HeapSnapshot]) -> Vec<u64> {
    history
        .iter()
        .rev()
        .filter(|s| s.last_magc_duration_ms > 0)
        .take(RECENT_DURATION_SAMPLES)
        .map(|s| s.last_magc_duration_ms)
        .collect()
}

/// Integer mean, `None` for an empty slice.
fn average(durations: &[u64]) -> Option<u64> {
    if durations.is_empty() {
        return None;
    }
    Some(durations.iter().sum::<u64>() / durations.len() as u64)
}
