//! Simulated worker: a generational heap model, task execution, and
//! self-triggered stop-the-world major collections.
//!
//! Every probe and execution path sleeps for its configured latency. The
//! sleeps shape the forecaster's time axis, so they are part of the model
//! rather than incidental delays; all of them go through `tokio::time` and
//! can be stepped deterministically under a paused test clock.

use parking_lot::Mutex as SyncMutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::{BalancerConfig, MagcDurationConfig, TimingConfig};
use crate::family::{FamilyRegistry, ProgramFamily, MIN_HISTORY_FOR_ANALYSIS};
use crate::forecast::{forecast_magc, MagcForecast};
use crate::status::{ForecastReport, PingReport, WorkerTriniDetail};
use crate::task::{Payload, PendingTask, Task};
use crate::telemetry::{HeapSnapshot, SnapshotRing};

/// Stable worker identifier.
pub type WorkerId = u32;

/// Fraction of an admitted task charged to the young generation; the rest
/// lands in the old generation directly.
const YOUNG_ADMISSION_SHARE: f64 = 0.8;

/// One simulated worker instance.
///
/// All mutable state (flags, heap counters, task list, telemetry, family,
/// forecast, weights) lives behind a single async mutex; the simulated
/// latencies sleep while it is held, which is what serialises operations on
/// one worker the way a real busy instance would.
pub struct Worker {
    id: WorkerId,
    timing: TimingConfig,
    magc: MagcDurationConfig,
    forecast_stale_after: Duration,
    payload: Arc<dyn Payload>,
    rng: SyncMutex<SmallRng>,
    state: Mutex<WorkerState>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("timing", &self.timing)
            .field("magc", &self.magc)
            .field("forecast_stale_after", &self.forecast_stale_after)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct WorkerState {
    heap_max: usize,
    gc_trigger: f64,
    young_max: usize,
    old_max: usize,
    young_used: usize,
    old_used: usize,
    total_used: usize,
    busy: bool,
    collecting: bool,
    task_ids: Vec<String>,
    gc_count: u64,
    last_magc_end: Option<Instant>,
    last_magc_duration_ms: u64,
    weight: u32,
    runtime_weight: u32,
    family: Arc<ProgramFamily>,
    forecast: Option<MagcForecast>,
    history: SnapshotRing,
}

impl WorkerState {
    fn usage_fraction(&self) -> f64 {
        if self.heap_max == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = self.total_used as f64 / self.heap_max as f64;
        fraction
    }

    /// Charges an admitted task to the heap model.
    ///
    /// The total counter is authoritative for capacity checks; the
    /// generation counters saturate at their maxima.
    fn admit(&mut self, size: usize) {
        self.total_used += size;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let young_inc = (size as f64 * YOUNG_ADMISSION_SHARE) as usize;
        let old_inc = size - young_inc;
        self.young_used += young_inc;
        self.old_used += old_inc;

        // Promote a quarter of the young generation once it crosses half
        // of its capacity.
        if self.young_used > self.young_max / 2 {
            let promoted = self.young_used / 4;
            self.young_used -= promoted;
            self.old_used += promoted;
        }

        self.young_used = self.young_used.min(self.young_max);
        self.old_used = self.old_used.min(self.old_max);
    }

    fn snapshot(&self, now: Instant) -> HeapSnapshot {
        HeapSnapshot {
            taken_at: now,
            young_used: self.young_used,
            old_used: self.old_used,
            young_max: self.young_max,
            old_max: self.old_max,
            total_used: self.total_used,
            total_max: self.heap_max,
            gc_count: self.gc_count,
            last_magc_end: self.last_magc_end,
            last_magc_duration_ms: self.last_magc_duration_ms,
            collecting: self.collecting,
        }
    }
}

impl Worker {
    /// Creates a configured, started worker.
    ///
    /// Heap counters start at zero, the generational split assigns half of
    /// the heap budget to each generation, and the dispatch weight is one.
    pub fn new(
        id: WorkerId,
        config: &BalancerConfig,
        family: Arc<ProgramFamily>,
        payload: Arc<dyn Payload>,
    ) -> Arc<Self> {
        let heap_max = config.cluster.heap_max;
        Arc::new(Self {
            id,
            timing: config.timing.clone(),
            magc: config.magc.clone(),
            forecast_stale_after: config.trini.forecast_stale_after,
            payload,
            rng: SyncMutex::new(SmallRng::from_entropy()),
            state: Mutex::new(WorkerState {
                heap_max,
                gc_trigger: config.cluster.gc_trigger,
                young_max: heap_max / 2,
                old_max: heap_max / 2,
                young_used: 0,
                old_used: 0,
                total_used: 0,
                busy: false,
                collecting: false,
                task_ids: Vec::new(),
                gc_count: 0,
                last_magc_end: None,
                last_magc_duration_ms: 0,
                weight: 1,
                runtime_weight: 1,
                family,
                forecast: None,
                history: SnapshotRing::new(config.trini.history_capacity),
            }),
        })
    }

    /// Worker identifier.
    #[must_use]
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Replaces the heap budget and rescales the generational split.
    pub async fn set_heap_limit(&self, limit: usize) {
        let mut state = self.state.lock().await;
        state.heap_max = limit;
        state.young_max = limit / 2;
        state.old_max = limit / 2;
    }

    /// Replaces the collection trigger fraction.
    pub async fn set_gc_trigger(&self, fraction: f64) {
        let mut state = self.state.lock().await;
        state.gc_trigger = fraction;
    }

    /// Current `(heap_max, gc_trigger)` configuration.
    pub async fn configuration(&self) -> (usize, f64) {
        let state = self.state.lock().await;
        (state.heap_max, state.gc_trigger)
    }

    /// True unless a major collection is in progress.
    ///
    /// Blocks for the probe latency while holding the worker lock.
    pub async fn is_available(&self) -> bool {
        let state = self.state.lock().await;
        sleep(self.timing.probe_delay).await;
        !state.collecting
    }

    /// Checks whether a task of `size` fits in the remaining heap budget.
    ///
    /// A failing check synchronously schedules a major collection before
    /// returning: rejecting a task triggers reclamation so the next
    /// dispatch attempt may succeed. Callers rely on that coupling.
    pub async fn check_capacity_or_reclaim(self: &Arc<Self>, size: usize) -> bool {
        let state = self.state.lock().await;
        sleep(self.timing.probe_delay).await;

        if state.total_used + size > state.heap_max {
            let worker = Arc::clone(self);
            tokio::spawn(async move { worker.collect_major().await });
            return false;
        }
        true
    }

    /// Accepts a task for execution and returns immediately.
    ///
    /// Availability and capacity are re-checked on the execution path; a
    /// worker that turned busy or full in the meantime publishes a
    /// rejected record on the result channel instead of failing the call.
    pub async fn submit(self: &Arc<Self>, input: &str) -> PendingTask {
        sleep(self.timing.submit_delay).await;

        let (tx, rx) = oneshot::channel();
        let worker = Arc::clone(self);
        let input = input.to_owned();
        tokio::spawn(async move { worker.run_task(input, tx).await });

        PendingTask::new(rx)
    }

    async fn run_task(self: Arc<Self>, input: String, tx: oneshot::Sender<Task>) {
        if !self.is_available().await || !self.check_capacity_or_reclaim(input.len()).await {
            let id = self.generate_id("error");
            let _ = tx.send(Task::rejected(id, input));
            return;
        }

        let task = self.execute(input).await;
        let completed = task.status == crate::task::TaskStatus::Completed;
        let _ = tx.send(task);

        if !completed {
            return;
        }

        // Usage-triggered collection after the task lands.
        let (usage, trigger) = {
            let state = self.state.lock().await;
            (state.usage_fraction(), state.gc_trigger)
        };
        if usage >= trigger {
            let worker = Arc::clone(&self);
            tokio::spawn(async move { worker.collect_major().await });
        }
    }

    /// Admits and executes one task under the worker lock.
    async fn execute(&self, input: String) -> Task {
        let mut state = self.state.lock().await;

        // The worker may have entered a collection between the probes and
        // admission; no heap mutation is allowed in that window.
        if state.collecting {
            return Task::rejected(self.generate_id("error"), input);
        }

        state.busy = true;
        state.admit(input.len());

        let delay = self.execution_delay();
        sleep(delay).await;
        let output = self.payload.execute(&input).await;

        let task = Task::completed(self.generate_id("task"), input, output);
        state.task_ids.push(task.id.clone());
        state.busy = false;

        debug!(worker = self.id, task = %task.id, "task completed");
        task
    }

    /// Runs a stop-the-world major collection.
    ///
    /// Concurrent requests coalesce: a collection already in progress
    /// makes this a no-op. The pause sleeps without the lock so probes
    /// observe the collecting flag meanwhile.
    pub(crate) async fn collect_major(self: Arc<Self>) {
        let pause = {
            let mut state = self.state.lock().await;
            if state.collecting {
                return;
            }
            state.collecting = true;
            state.busy = true;
            self.collection_pause(state.usage_fraction())
        };

        #[allow(clippy::cast_possible_truncation)]
        let pause_ms = pause.as_millis() as u64;
        debug!(worker = self.id, pause_ms, "major collection started");
        sleep(pause).await;

        {
            let mut state = self.state.lock().await;
            state.last_magc_duration_ms = pause_ms;
            state.last_magc_end = Some(Instant::now());
            state.gc_count += 1;
            state.total_used = 0;
            state.young_used = 0;
            state.old_used = 0;
            state.task_ids.clear();
            state.collecting = false;
            state.busy = false;
        }

        info!(worker = self.id, pause_ms, "major collection finished");
    }

    /// Pause model: `base + slope * usage`, jittered ±20%, clipped to the
    /// configured floor/ceiling.
    fn collection_pause(&self, usage: f64) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let base = self.magc.base_ms as f64 + (self.magc.slope_ms as f64 * usage).floor();
        let jitter = self.rng.lock().gen_range(-0.2..=0.2) * base;
        #[allow(clippy::cast_precision_loss)]
        let clipped = (base + jitter).clamp(self.magc.floor_ms as f64, self.magc.ceiling_ms as f64);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = clipped as u64;
        Duration::from_millis(ms)
    }

    fn execution_delay(&self) -> Duration {
        let min = self.timing.execute_min;
        let max = self.timing.execute_max;
        if max <= min {
            return min;
        }
        let spread = (max - min).as_millis() as u64;
        let extra = self.rng.lock().gen_range(0..=spread);
        min + Duration::from_millis(extra)
    }

    fn generate_id(&self, prefix: &str) -> String {
        let n: u32 = self.rng.lock().gen_range(0..1_000);
        format!("{prefix}-{n}")
    }

    /// True iff a non-stale forecast predicts a major collection within
    /// `threshold_ms` from now.
    pub async fn forecast_valid(&self, threshold_ms: u64) -> bool {
        let state = self.state.lock().await;
        let now = Instant::now();

        match &state.forecast {
            None => false,
            Some(forecast) => {
                if forecast.is_stale(now, self.forecast_stale_after) {
                    return false;
                }
                matches!(forecast.time_until_ms(now), Some(ms) if ms <= threshold_ms)
            }
        }
    }

    /// Appends a telemetry snapshot of the current heap state.
    pub async fn record_snapshot(&self) {
        let mut state = self.state.lock().await;
        let snapshot = state.snapshot(Instant::now());
        state.history.push(snapshot);
    }

    /// One analysis pass: re-classify the family, then refresh the
    /// forecast over the family's window.
    ///
    /// Works on value copies of the history so concurrent appends by the
    /// monitor cannot race the regression.
    pub async fn analyze(&self, registry: &FamilyRegistry) {
        let (history, family, old_max) = {
            let state = self.state.lock().await;
            (state.history.to_vec(), Arc::clone(&state.family), state.old_max)
        };

        if history.len() < MIN_HISTORY_FOR_ANALYSIS {
            return;
        }

        let next = registry.classify(&family, &history);
        if next.id != family.id {
            let mut state = self.state.lock().await;
            state.family = Arc::clone(&next);
            info!(worker = self.id, family = %next.id, "adapted to program family");
        }

        let window = history.len().min(next.forecast_window);
        let window = &history[history.len() - window..];
        if let Some(forecast) =
            forecast_magc(window, old_max, Instant::now(), self.forecast_stale_after)
        {
            debug!(
                worker = self.id,
                time_to_magc_ms = forecast.time_to_magc_ms,
                confidence = forecast.confidence,
                "forecast refreshed"
            );
            let mut state = self.state.lock().await;
            state.forecast = Some(forecast);
        }
    }

    /// Liveness report. Blocks for the probe latency.
    pub async fn ping(&self) -> PingReport {
        let state = self.state.lock().await;
        sleep(self.timing.probe_delay).await;

        let pct = state.usage_fraction() * 100.0;
        PingReport {
            worker_id: self.id,
            status: "online",
            available: !state.collecting,
            collecting: state.collecting,
            mem_used_pct: pct,
            tasks_processed: state.task_ids.len(),
            task_ids: state.task_ids.clone(),
            memory_usage: format!("{}/{} ({pct:.1}%)", state.total_used, state.heap_max),
        }
    }

    /// Per-worker detail for the adaptive-system status report.
    pub async fn trini_detail(&self, active_threshold_ms: u64) -> WorkerTriniDetail {
        let state = self.state.lock().await;
        let now = Instant::now();

        let forecast = state.forecast.as_ref().map(|f| {
            let fresh = !f.is_stale(now, self.forecast_stale_after);
            let remaining = f.time_until_ms(now);
            #[allow(clippy::cast_possible_truncation)]
            let age_ms = now.saturating_duration_since(f.created_at).as_millis() as u64;
            ForecastReport {
                predicted_in_ms: remaining.unwrap_or(0),
                confidence: f.confidence,
                young_gen_threshold: f.young_threshold,
                time_to_magc_ms: f.time_to_magc_ms,
                age_ms,
                within_threshold: fresh
                    && matches!(remaining, Some(ms) if ms <= active_threshold_ms),
            }
        });

        WorkerTriniDetail {
            worker_id: self.id,
            family: state.family.as_ref().into(),
            gc_history_count: state.history.len(),
            forecast,
            young_gen_used: state.young_used,
            old_gen_used: state.old_used,
            young_gen_max: state.young_max,
            old_gen_max: state.old_max,
            gc_count: state.gc_count,
            weight: state.weight,
        }
    }

    /// Copy of the telemetry ring: `(retained, most recent limit entries)`.
    pub async fn gc_history(&self, limit: usize) -> (usize, Vec<HeapSnapshot>) {
        let state = self.state.lock().await;
        (state.history.len(), state.history.recent(limit))
    }

    /// Current program family.
    pub async fn family(&self) -> Arc<ProgramFamily> {
        Arc::clone(&self.state.lock().await.family)
    }

    /// Latest forecast, if any.
    pub async fn forecast(&self) -> Option<MagcForecast> {
        self.state.lock().await.forecast.clone()
    }

    /// Static dispatch weight.
    pub async fn weight(&self) -> u32 {
        self.state.lock().await.weight
    }

    /// Remaining runtime weight for the current weighted round-robin cycle.
    pub async fn runtime_weight(&self) -> u32 {
        self.state.lock().await.runtime_weight
    }

    /// Consumes one unit of runtime weight, saturating at zero.
    pub(crate) async fn consume_runtime_weight(&self) {
        let mut state = self.state.lock().await;
        state.runtime_weight = state.runtime_weight.saturating_sub(1);
    }

    /// Undoes a tentative consumption, never exceeding the static weight.
    pub(crate) async fn restore_runtime_weight(&self) {
        let mut state = self.state.lock().await;
        state.runtime_weight = (state.runtime_weight + 1).min(state.weight);
    }

    /// Replenishes the runtime weight to the static weight.
    pub(crate) async fn replenish_runtime_weight(&self) {
        let mut state = self.state.lock().await;
        state.runtime_weight = state.weight;
    }
}

#[cfg(test)]
impl Worker {
    pub(crate) async fn seed_history(&self, snapshots: Vec<HeapSnapshot>) {
        let mut state = self.state.lock().await;
        for snapshot in snapshots {
            state.history.push(snapshot);
        }
    }

    pub(crate) async fn install_forecast(&self, forecast: MagcForecast) {
        self.state.lock().await.forecast = Some(forecast);
    }

    pub(crate) async fn set_family(&self, family: Arc<ProgramFamily>) {
        self.state.lock().await.family = family;
    }

    pub(crate) async fn set_weight(&self, weight: u32) {
        let mut state = self.state.lock().await;
        state.weight = weight;
        state.runtime_weight = weight;
    }

    pub(crate) async fn force_collecting(&self, collecting: bool) {
        let mut state = self.state.lock().await;
        state.collecting = collecting;
        state.busy = collecting;
    }

    pub(crate) async fn heap_usage(&self) -> (usize, usize, usize) {
        let state = self.state.lock().await;
        (state.young_used, state.old_used, state.total_used)
    }

    pub(crate) async fn gc_count(&self) -> u64 {
        self.state.lock().await.gc_count
    }
}
