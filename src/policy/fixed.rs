//! Fixed-target policy: always asks for the same replica count.
//!
//! Deterministic by construction, which makes it the workhorse for trace
//! tests and for scenarios where only the cluster mechanics are of interest.

use super::{EventKind, PolicyError, ScalingPolicy, Stat};

pub struct FixedPolicy {
    target: u32,
    scale_times: Vec<i64>,
    stats_seen: usize,
    events_seen: usize,
}

impl FixedPolicy {
    pub fn new(target: u32) -> Self {
        FixedPolicy {
            target,
            scale_times: Vec::new(),
            stats_seen: 0,
            events_seen: 0,
        }
    }

    /// Times at which `scale` was consulted.
    pub fn scale_times(&self) -> &[i64] {
        &self.scale_times
    }

    pub fn stats_seen(&self) -> usize {
        self.stats_seen
    }

    pub fn events_seen(&self) -> usize {
        self.events_seen
    }
}

impl ScalingPolicy for FixedPolicy {
    fn event(
        &mut self,
        _time_ns: i64,
        _kind: EventKind,
        _object: serde_json::Value,
    ) -> Result<(), PolicyError> {
        self.events_seen += 1;
        Ok(())
    }

    fn stat(&mut self, stats: &[Stat]) -> Result<(), PolicyError> {
        self.stats_seen += stats.len();
        Ok(())
    }

    fn scale(&mut self, time_ns: i64) -> Result<u32, PolicyError> {
        self.scale_times.push(time_ns);
        Ok(self.target)
    }
}
