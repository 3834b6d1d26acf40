//! The scaling-policy boundary.
//!
//! The autoscaler tick treats the policy as an opaque oracle: it feeds it
//! lifecycle events and stat snapshots, and asks it for a desired replica
//! count. The interface stays narrow (primitives plus an opaque JSON
//! payload) so policies can be swapped without touching the cluster model.

mod concurrency;
mod fixed;

pub use concurrency::{ConcurrencyPolicy, ConcurrencySettings};
pub use fixed::FixedPolicy;

use std::fmt;

/// Errors from a policy. Any of these aborts the simulation.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy failure: {0}")]
    Failure(String),
}

/// Lifecycle event kinds delivered to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// What a per-replica stat measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatMetric {
    /// Concurrent requests on the replica, in thousandths.
    ConcurrentRequestsMillis,
    /// Requests first admitted since the previous snapshot.
    RequestsReceived,
}

impl fmt::Display for StatMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatMetric::ConcurrentRequestsMillis => "concurrent_requests_millis",
            StatMetric::RequestsReceived => "requests_received",
        };
        f.write_str(s)
    }
}

/// One per-replica measurement at a snapshot time.
#[derive(Debug, Clone)]
pub struct Stat {
    pub time_ns: i64,
    pub pod: String,
    pub metric: StatMetric,
    pub value: i32,
}

/// The oracle the autoscaler tick consults.
///
/// The stats buffer passed to `stat` is caller-owned; implementations must
/// copy what they need rather than retain it.
pub trait ScalingPolicy {
    /// A cluster lifecycle event (replica created/deleted). The payload is
    /// opaque JSON the policy may inspect or ignore.
    fn event(
        &mut self,
        time_ns: i64,
        kind: EventKind,
        object: serde_json::Value,
    ) -> Result<(), PolicyError>;

    /// A batch of per-replica stats snapshotted at one tick.
    fn stat(&mut self, stats: &[Stat]) -> Result<(), PolicyError>;

    /// The desired replica count at the given time.
    fn scale(&mut self, time_ns: i64) -> Result<u32, PolicyError>;
}
