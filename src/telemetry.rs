//! Per-worker heap telemetry: snapshots and the bounded history ring.

use std::collections::VecDeque;
use tokio::time::Instant;

/// Point-in-time heap and collection state of one worker.
///
/// Immutable once created. Snapshots feed the forecaster and the family
/// classifier.
#[derive(Debug, Clone)]
pub struct HeapSnapshot {
    /// When the snapshot was taken.
    pub taken_at: Instant,
    /// Young-generation usage.
    pub young_used: usize,
    /// Old-generation usage.
    pub old_used: usize,
    /// Young-generation capacity.
    pub young_max: usize,
    /// Old-generation capacity.
    pub old_max: usize,
    /// Total heap usage.
    pub total_used: usize,
    /// Total heap capacity.
    pub total_max: usize,
    /// Major collections completed so far.
    pub gc_count: u64,
    /// End of the most recent major collection, if any.
    pub last_magc_end: Option<Instant>,
    /// Duration of the most recent major collection; zero if none yet.
    pub last_magc_duration_ms: u64,
    /// Whether a major collection was in progress.
    pub collecting: bool,
}

/// Bounded FIFO ring of heap snapshots.
///
/// Appends evict the oldest entry once the ring is full. Readers take
/// value copies; the ring itself lives under the owning worker's lock.
#[derive(Debug)]
pub struct SnapshotRing {
    capacity: usize,
    entries: VecDeque<HeapSnapshot>,
}

impl SnapshotRing {
    /// Creates an empty ring holding at most `capacity` snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Appends a snapshot, evicting the oldest when full.
    pub fn push(&mut self, snapshot: HeapSnapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no snapshots are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value-copy of the full ring, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<HeapSnapshot> {
        self.entries.iter().cloned().collect()
    }

    /// Value-copy of the most recent `limit` snapshots, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<HeapSnapshot> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }
}
