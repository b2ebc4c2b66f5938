//! The dispatcher: selects a worker for each incoming task using the
//! active policy's selection algorithm.
//!
//! Every GC-aware algorithm carries an escape condition: when the forecast
//! guard filters out every otherwise-eligible worker, selection re-runs
//! without the guard so tasks keep flowing while the whole pool predicts
//! imminent collections.

use parking_lot::{Mutex as SyncMutex, RwLock};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::BalancerConfig;
use crate::error::{BalancerError, Result};
use crate::family::FamilyId;
use crate::policy::{Algorithm, LoadBalancingPolicy};
use crate::status::{
    FamilyDetail, FamilyListing, GcHistoryReport, PingReport, SnapshotReport, TriniStatus,
};
use crate::task::{Payload, PendingTask, Sha256Payload};
use crate::trini::TriniControl;
use crate::worker::{Worker, WorkerId};

/// GC-aware dispatcher over a fixed pool of simulated workers.
pub struct Balancer {
    workers: Vec<Arc<Worker>>,
    trini: Arc<TriniControl>,
    policy: RwLock<LoadBalancingPolicy>,
    cursor: SyncMutex<usize>,
    rng: SyncMutex<SmallRng>,
    /// Serialises selection passes; a dispatch is not cancellable
    /// mid-selection.
    select_lock: Mutex<()>,
}

impl Balancer {
    /// Builds a balancer with the default SHA-256 payload.
    pub fn new(config: BalancerConfig) -> Result<Arc<Self>> {
        Self::with_payload(config, Arc::new(Sha256Payload))
    }

    /// Builds a balancer executing the given payload on every worker.
    ///
    /// Workers get ids `1..=n`, the default program family, and the default
    /// family's (non-GC-aware round-robin) policy.
    pub fn with_payload(config: BalancerConfig, payload: Arc<dyn Payload>) -> Result<Arc<Self>> {
        config.validate()?;

        let trini = Arc::new(TriniControl::new(&config.trini));
        let default_family = Arc::clone(trini.registry().default_family());
        let policy = default_family.policy.clone();

        let workers = (1..=config.cluster.workers)
            .map(|id| {
                Worker::new(
                    id,
                    &config,
                    Arc::clone(&default_family),
                    Arc::clone(&payload),
                )
            })
            .collect();

        Ok(Arc::new(Self {
            workers,
            trini,
            policy: RwLock::new(policy),
            cursor: SyncMutex::new(0),
            rng: SyncMutex::new(SmallRng::from_entropy()),
            select_lock: Mutex::new(()),
        }))
    }

    /// The worker pool, in ring order.
    #[must_use]
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Looks up a worker by id.
    pub fn worker(&self, id: WorkerId) -> Result<&Arc<Worker>> {
        self.workers
            .iter()
            .find(|w| w.id() == id)
            .ok_or(BalancerError::WorkerNotFound(id))
    }

    /// The adaptive-system control state.
    #[must_use]
    pub fn trini(&self) -> &Arc<TriniControl> {
        &self.trini
    }

    /// Snapshot of the active policy.
    #[must_use]
    pub fn policy(&self) -> LoadBalancingPolicy {
        self.policy.read().clone()
    }

    /// Atomically replaces the active policy.
    pub fn set_policy(&self, policy: LoadBalancingPolicy) {
        info!(
            algorithm = %policy.algorithm,
            gc_aware = policy.gc_aware,
            threshold_ms = policy.magc_threshold_ms,
            "load-balancing policy updated"
        );
        *self.policy.write() = policy;
    }

    /// Enables or disables the adaptive system.
    pub fn toggle_trini(&self, active: bool) {
        self.trini.set_active(active);
    }

    /// Selects a worker for the task and returns it without submitting.
    ///
    /// Applies the active policy's GC-aware algorithm, or the plain
    /// round-robin fallback when the adaptive system is inactive or the
    /// policy is not GC-aware.
    pub async fn dispatch(&self, input: &str) -> Result<Arc<Worker>> {
        let _guard = self.select_lock.lock().await;
        let policy = self.policy();

        if !self.trini.is_active() || !policy.gc_aware {
            return self.plain_round_robin(input).await;
        }

        match policy.algorithm {
            Algorithm::RoundRobin => self.gc_round_robin(input, policy.magc_threshold_ms).await,
            Algorithm::Random => self.gc_random(input, policy.magc_threshold_ms).await,
            Algorithm::WeightedRoundRobin => {
                self.gc_weighted_round_robin(input, policy.magc_threshold_ms)
                    .await
            }
            Algorithm::WeightedRandom => {
                self.gc_weighted_random(input, policy.magc_threshold_ms).await
            }
        }
    }

    /// Dispatches and submits in one step.
    pub async fn process(&self, input: &str) -> Result<PendingTask> {
        let worker = self.dispatch(input).await?;
        Ok(worker.submit(input).await)
    }

    /// Plain round-robin: availability and capacity only.
    async fn plain_round_robin(&self, input: &str) -> Result<Arc<Worker>> {
        let start = *self.cursor.lock();
        let count = self.workers.len();

        for offset in 0..count {
            let index = (start + offset) % count;
            let worker = &self.workers[index];

            let available = worker.is_available().await;
            if available && worker.check_capacity_or_reclaim(input.len()).await {
                *self.cursor.lock() = (index + 1) % count;
                debug!(worker = worker.id(), "worker selected (round-robin)");
                return Ok(Arc::clone(worker));
            } else if available {
                debug!(worker = worker.id(), "worker skipped, memory full");
            } else {
                debug!(worker = worker.id(), "worker skipped, busy or collecting");
            }
        }

        Err(BalancerError::NoEligibleWorker(
            "every worker is unavailable or memory-full",
        ))
    }

    /// GC-aware round-robin: skips workers with a collection predicted
    /// within the threshold; escapes to the plain fallback on exhaustion.
    async fn gc_round_robin(&self, input: &str, threshold_ms: u64) -> Result<Arc<Worker>> {
        let start = *self.cursor.lock();
        let count = self.workers.len();

        for offset in 0..count {
            let index = (start + offset) % count;
            let worker = &self.workers[index];

            if !worker.is_available().await
                || !worker.check_capacity_or_reclaim(input.len()).await
            {
                continue;
            }

            if worker.forecast_valid(threshold_ms).await {
                info!(
                    worker = worker.id(),
                    threshold_ms, "worker skipped, major collection predicted"
                );
                continue;
            }

            *self.cursor.lock() = (index + 1) % count;
            debug!(worker = worker.id(), "worker selected (gc-rr)");
            return Ok(Arc::clone(worker));
        }

        info!("no gc-safe worker available, escaping to plain round-robin");
        self.plain_round_robin(input).await
    }

    /// GC-aware random: uniform pick over the eligible, GC-safe set;
    /// escapes by dropping the forecast filter for this call only.
    async fn gc_random(&self, input: &str, threshold_ms: u64) -> Result<Arc<Worker>> {
        let mut eligible = Vec::new();
        for worker in &self.workers {
            if worker.is_available().await
                && worker.check_capacity_or_reclaim(input.len()).await
            {
                if worker.forecast_valid(threshold_ms).await {
                    info!(
                        worker = worker.id(),
                        threshold_ms, "worker skipped, major collection predicted"
                    );
                } else {
                    eligible.push(Arc::clone(worker));
                }
            }
        }

        if let Some(worker) = self.pick_uniform(&eligible) {
            debug!(worker = worker.id(), "worker selected (gc-ran)");
            return Ok(worker);
        }

        info!("no gc-safe worker available, escaping to plain random");
        let mut eligible = Vec::new();
        for worker in &self.workers {
            if worker.is_available().await
                && worker.check_capacity_or_reclaim(input.len()).await
            {
                eligible.push(Arc::clone(worker));
            }
        }

        self.pick_uniform(&eligible).ok_or(BalancerError::NoEligibleWorker(
            "every worker is unavailable or memory-full",
        ))
    }

    /// GC-aware weighted round-robin over mutable runtime weights.
    ///
    /// Weights are consumed before the candidate is probed and restored on
    /// rejection; runtime weights survive policy changes and replenish only
    /// once every worker's weight reaches zero.
    async fn gc_weighted_round_robin(&self, input: &str, threshold_ms: u64) -> Result<Arc<Worker>> {
        let count = self.workers.len();

        let mut all_zero = true;
        for worker in &self.workers {
            if worker.runtime_weight().await > 0 {
                all_zero = false;
                break;
            }
        }
        if all_zero {
            for worker in &self.workers {
                worker.replenish_runtime_weight().await;
            }
            debug!("runtime weights replenished");
        }

        let mut index = 0usize;
        let mut rejected = 0usize;
        while rejected < count {
            if index >= count {
                index = 0;
            }
            let worker = &self.workers[index];

            if worker.runtime_weight().await == 0 {
                index += 1;
                continue;
            }

            worker.consume_runtime_weight().await;

            if !worker.is_available().await
                || !worker.check_capacity_or_reclaim(input.len()).await
            {
                worker.restore_runtime_weight().await;
                index += 1;
                rejected += 1;
                continue;
            }

            if worker.forecast_valid(threshold_ms).await {
                info!(
                    worker = worker.id(),
                    threshold_ms, "worker skipped, major collection predicted"
                );
                worker.restore_runtime_weight().await;
                index += 1;
                rejected += 1;
                continue;
            }

            debug!(worker = worker.id(), "worker selected (gc-wrr)");
            return Ok(Arc::clone(worker));
        }

        info!("no gc-safe worker available, escaping to plain round-robin");
        self.plain_round_robin(input).await
    }

    /// GC-aware weighted random: static weights as bucket widths; escapes
    /// by rebuilding the buckets without the forecast filter.
    async fn gc_weighted_random(&self, input: &str, threshold_ms: u64) -> Result<Arc<Worker>> {
        let mut eligible: Vec<(Arc<Worker>, u32)> = Vec::new();
        let mut total_weight = 0u32;

        for worker in &self.workers {
            if worker.is_available().await
                && worker.check_capacity_or_reclaim(input.len()).await
            {
                if worker.forecast_valid(threshold_ms).await {
                    info!(
                        worker = worker.id(),
                        threshold_ms, "worker skipped, major collection predicted"
                    );
                } else {
                    let weight = worker.weight().await;
                    total_weight += weight;
                    eligible.push((Arc::clone(worker), weight));
                }
            }
        }

        if total_weight == 0 {
            info!("no gc-safe worker available, escaping to plain weighted random");
            eligible.clear();
            for worker in &self.workers {
                if worker.is_available().await
                    && worker.check_capacity_or_reclaim(input.len()).await
                {
                    let weight = worker.weight().await;
                    total_weight += weight;
                    eligible.push((Arc::clone(worker), weight));
                }
            }

            if total_weight == 0 {
                return Err(BalancerError::NoEligibleWorker(
                    "every worker is unavailable or memory-full",
                ));
            }
        }

        let roll = self.rng.lock().gen_range(0..total_weight);
        let mut cumulative = 0u32;
        for (worker, weight) in &eligible {
            cumulative += weight;
            if roll < cumulative {
                debug!(worker = worker.id(), "worker selected (gc-wran)");
                return Ok(Arc::clone(worker));
            }
        }

        // The buckets cover [0, total_weight); this is unreachable but the
        // first candidate is a harmless backstop.
        Ok(Arc::clone(&eligible[0].0))
    }

    fn pick_uniform(&self, eligible: &[Arc<Worker>]) -> Option<Arc<Worker>> {
        if eligible.is_empty() {
            return None;
        }
        let index = self.rng.lock().gen_range(0..eligible.len());
        Some(Arc::clone(&eligible[index]))
    }

    /// One monitor pass: appends a telemetry snapshot per worker.
    pub async fn run_monitor_cycle(&self) {
        for worker in &self.workers {
            worker.record_snapshot().await;
        }
    }

    /// One analysis pass: re-classifies and re-forecasts every worker,
    /// then adapts the cluster policy.
    ///
    /// Per-worker analysis runs in spawned tasks so a panic in one
    /// worker's regression is contained and logged rather than halting the
    /// loop.
    pub async fn run_analysis_cycle(self: &Arc<Self>) {
        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let worker = Arc::clone(worker);
            let trini = Arc::clone(&self.trini);
            handles.push(tokio::spawn(async move {
                worker.analyze(trini.registry()).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker analysis task failed");
            }
        }

        self.adapt_policy().await;
    }

    /// Installs the dominant family's policy when that family is GC-aware.
    ///
    /// Plurality ties resolve to the earliest family in registry order. A
    /// cluster dominated by the default (non-GC-aware) family leaves the
    /// policy untouched.
    pub async fn adapt_policy(&self) {
        if !self.trini.is_active() {
            return;
        }

        let mut counts: HashMap<FamilyId, usize> = HashMap::new();
        for worker in &self.workers {
            *counts.entry(worker.family().await.id).or_insert(0) += 1;
        }

        let mut dominant = None;
        let mut dominant_count = 0usize;
        for family in self.trini.registry().iter() {
            let count = counts.get(&family.id).copied().unwrap_or(0);
            if count > dominant_count {
                dominant = Some(Arc::clone(family));
                dominant_count = count;
            }
        }

        match dominant {
            Some(family) if family.policy.gc_aware => {
                info!(family = %family.id, workers = dominant_count, "dominant family policy installed");
                self.set_policy(family.policy.clone());
            }
            _ => debug!("no dominant gc-aware family, policy unchanged"),
        }
    }

    /// Liveness report for one worker.
    pub async fn ping(&self, id: WorkerId) -> Result<PingReport> {
        Ok(self.worker(id)?.ping().await)
    }

    /// Telemetry history for one worker, most recent last.
    pub async fn gc_history(&self, id: WorkerId, limit: usize) -> Result<GcHistoryReport> {
        let worker = self.worker(id)?;
        let (history_count, snapshots) = worker.gc_history(limit).await;
        let now = Instant::now();

        let gc_history: Vec<SnapshotReport> = snapshots
            .iter()
            .map(|s| {
                #[allow(clippy::cast_possible_truncation)]
                let age_ms = now.saturating_duration_since(s.taken_at).as_millis() as u64;
                SnapshotReport {
                    age_ms,
                    young_gen_used: s.young_used,
                    old_gen_used: s.old_used,
                    young_gen_max: s.young_max,
                    old_gen_max: s.old_max,
                    total_mem_used: s.total_used,
                    total_mem_max: s.total_max,
                    gc_count: s.gc_count,
                    magc_duration_ms: s.last_magc_duration_ms,
                    is_collecting_gc: s.collecting,
                }
            })
            .collect();

        Ok(GcHistoryReport {
            worker_id: id,
            history_count,
            returned_count: gc_history.len(),
            gc_history,
        })
    }

    /// Full adaptive-system status.
    pub async fn trini_status(&self) -> TriniStatus {
        let policy = self.policy();
        let mut workers = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            workers.push(worker.trini_detail(policy.magc_threshold_ms).await);
        }

        #[allow(clippy::cast_possible_truncation)]
        let monitor_interval_ms = self.trini.monitor_interval().as_millis() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let analysis_interval_ms = self.trini.analysis_interval().as_millis() as u64;

        TriniStatus {
            active: self.trini.is_active(),
            monitor_interval_ms,
            analysis_interval_ms,
            family_count: self.trini.registry().len(),
            current_policy: policy,
            workers,
        }
    }

    /// The family registry as exposed to operators.
    #[must_use]
    pub fn list_families(&self) -> FamilyListing {
        let registry = self.trini.registry();
        FamilyListing {
            default_family: registry.default_family().id,
            families: registry.iter().map(|f| FamilyDetail::from(f.as_ref())).collect(),
        }
    }
}
