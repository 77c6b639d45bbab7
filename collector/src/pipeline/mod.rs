//! The routing core: batching queues, routers and destination exporters.
//!
//! ```text
//! receiver --enqueue--> BatchQueue --flush--> SignalRouter --dispatch--> DestinationWorker lanes
//!                        (per kind)             (per kind)                (per destination)
//! ```
//!
//! Each signal kind runs its own flush loop, router task and lanes, so a
//! stalled log backend never holds up traces or metrics.

pub mod credits;
pub mod exporter;
pub mod health;
pub mod queue;
pub mod retry;
pub mod router;
pub mod stats;
pub mod supervisor;

pub use health::{ComponentStatus, HealthRegistry, HealthReport, OverallStatus};
pub use queue::{BatchQueue, QueueError};
pub use retry::{AttemptState, DropReason, ExportAttempt, Outcome};
pub use stats::{PipelineStats, StatsSnapshot};
pub use supervisor::{DrainReport, PipelineBuilder, StartError, Supervisor};
