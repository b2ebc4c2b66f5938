//! GC-aware task dispatching over a pool of simulated workers.
//!
//! The balancer routes incoming work across a fixed pool of workers, each
//! carrying a generational-heap model that self-triggers stop-the-world
//! major collections. An adaptive MAPE-K loop keeps the routing out of
//! harm's way:
//!
//! - **Monitor**: periodically samples per-worker heap telemetry into a
//!   bounded snapshot ring
//! - **Analyze**: fits two-stage linear-regression forecasts of the next
//!   major collection (MaGA) and classifies workers into program families
//!   by observed collection duration
//! - **Plan/Execute**: installs the dominant family's load-balancing
//!   policy and skips workers whose forecast predicts an imminent pause
//!
//! Four GC-aware selection algorithms are available (round-robin, random,
//! weighted round-robin, weighted random), each with an escape condition
//! that keeps tasks flowing when the whole pool predicts collections.
//!
//! # Example
//!
//! ```ignore
//! use trini_balancer::{Balancer, BalancerConfig};
//!
//! let balancer = Balancer::new(BalancerConfig::default())?;
//! balancer.start();
//!
//! let pending = balancer.process("some task input").await?;
//! let task = pending.result().await;
//! ```

pub mod balancer;
pub mod config;
pub mod error;
pub mod family;
pub mod forecast;
pub mod policy;
pub mod status;
pub mod task;
pub mod telemetry;
pub mod trini;
pub mod worker;

// Re-export main types
pub use balancer::Balancer;
pub use config::{BalancerConfig, ClusterConfig, MagcDurationConfig, TimingConfig, TriniConfig};
pub use error::{BalancerError, Result};
pub use family::{FamilyId, FamilyRegistry, ProgramFamily};
pub use forecast::MagcForecast;
pub use policy::{Algorithm, LoadBalancingPolicy};
pub use status::{FamilyListing, GcHistoryReport, PingReport, TriniStatus};
pub use task::{Payload, PendingTask, Sha256Payload, Task, TaskStatus};
pub use telemetry::{HeapSnapshot, SnapshotRing};
pub use trini::TriniControl;
pub use worker::{Worker, WorkerId};
