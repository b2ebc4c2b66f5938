//! Task records and the execution payload seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

/// Terminal status of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task executed and produced an output.
    Completed,
    /// Task was turned away: the worker was unavailable, memory-full, or
    /// mid-collection at admission.
    Rejected,
}

/// A processed (or rejected) unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Generated task identifier.
    pub id: String,
    /// Raw task input.
    pub input: String,
    /// Payload output; empty for rejected tasks.
    pub output: String,
    /// Terminal status.
    pub status: TaskStatus,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Builds a completed task record.
    #[must_use]
    pub fn completed(id: String, input: String, output: String) -> Self {
        Self {
            id,
            input,
            output,
            status: TaskStatus::Completed,
            created_at: Utc::now(),
        }
    }

    /// Builds a rejected task record.
    #[must_use]
    pub fn rejected(id: String, input: String) -> Self {
        Self {
            id,
            input,
            output: String::new(),
            status: TaskStatus::Rejected,
            created_at: Utc::now(),
        }
    }
}

/// Handle to a task accepted by a worker.
///
/// The result channel is buffered: an abandoned handle does not block or
/// leak the executor.
#[derive(Debug)]
pub struct PendingTask {
    receiver: oneshot::Receiver<Task>,
}

impl PendingTask {
    pub(crate) fn new(receiver: oneshot::Receiver<Task>) -> Self {
        Self { receiver }
    }

    /// Waits for the terminal task record.
    ///
    /// Returns `None` only if the executing worker was torn down before
    /// publishing a result.
    pub async fn result(self) -> Option<Task> {
        self.receiver.await.ok()
    }
}

/// The unit of CPU-bound work a worker performs.
///
/// The dispatcher core is payload-agnostic; the default implementation
/// hashes the input, standing in for any CPU-bound computation.
#[async_trait]
pub trait Payload: Send + Sync {
    /// Computes the task output for the given input.
    async fn execute(&self, input: &str) -> String;
}

/// Default payload: hex-encoded SHA-256 of the input.
#[derive(Debug, Default)]
pub struct Sha256Payload;

#[async_trait]
impl Payload for Sha256Payload {
    async fn execute(&self, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sha256_payload_hashes_input() {
        let payload = Sha256Payload;
        let output = payload.execute("a").await;
        assert_eq!(
            output,
            "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb"
        );
    }

    #[tokio::test]
    async fn abandoned_pending_task_does_not_block_sender() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingTask::new(rx);
        drop(pending);

        // The executor side just observes a closed channel.
        assert!(tx.send(Task::rejected("error-1".into(), "x".into())).is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Completed).unwrap(), "\"completed\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Rejected).unwrap(), "\"rejected\"");
    }
}
