//! Target-concurrency policy: a windowed averaging scaler.
//!
//! Desired replicas = mean total concurrency over the stable window divided
//! by the per-replica concurrency target. A shorter panic window takes over
//! when demand spikes to more than twice what the current replicas are sized
//! for; in panic mode the policy never scales down. Scale-to-zero only
//! happens after demand has been absent for a full grace period.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use super::{EventKind, PolicyError, ScalingPolicy, Stat, StatMetric};

/// Tuning knobs for [`ConcurrencyPolicy`].
#[derive(Debug, Clone)]
pub struct ConcurrencySettings {
    pub stable_window: Duration,
    pub panic_window: Duration,
    pub scale_to_zero_grace: Duration,
    pub target_concurrency_default: f64,
    pub target_concurrency_percentage: f64,
    pub max_scale_up_rate: f64,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        ConcurrencySettings {
            stable_window: Duration::from_secs(60),
            panic_window: Duration::from_secs(6),
            scale_to_zero_grace: Duration::from_secs(30),
            target_concurrency_default: 1.0,
            target_concurrency_percentage: 0.5,
            max_scale_up_rate: 10.0,
        }
    }
}

struct Sample {
    time_ns: i64,
    total_concurrency: f64,
}

pub struct ConcurrencyPolicy {
    settings: ConcurrencySettings,
    samples: VecDeque<Sample>,
    /// Replicas currently serving, tracked from create/delete events.
    ready_replicas: i64,
    /// When demand first went to zero, for the scale-to-zero grace period.
    zero_since_ns: Option<i64>,
}

impl ConcurrencyPolicy {
    pub fn new(settings: ConcurrencySettings) -> Self {
        ConcurrencyPolicy {
            settings,
            samples: VecDeque::new(),
            ready_replicas: 0,
            zero_since_ns: None,
        }
    }

    fn target_per_replica(&self) -> f64 {
        let target =
            self.settings.target_concurrency_default * self.settings.target_concurrency_percentage;
        target.max(0.01)
    }

    fn window_average(&self, now_ns: i64, window: Duration) -> f64 {
        let cutoff = now_ns - window.as_nanos() as i64;
        let mut sum = 0.0;
        let mut count = 0usize;
        for sample in self.samples.iter().filter(|s| s.time_ns > cutoff) {
            sum += sample.total_concurrency;
            count += 1;
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    fn prune(&mut self, now_ns: i64) {
        let cutoff = now_ns - self.settings.stable_window.as_nanos() as i64;
        while self
            .samples
            .front()
            .is_some_and(|s| s.time_ns <= cutoff)
        {
            self.samples.pop_front();
        }
    }
}

impl ScalingPolicy for ConcurrencyPolicy {
    fn event(
        &mut self,
        _time_ns: i64,
        kind: EventKind,
        _object: serde_json::Value,
    ) -> Result<(), PolicyError> {
        match kind {
            EventKind::Create => self.ready_replicas += 1,
            EventKind::Delete => self.ready_replicas = (self.ready_replicas - 1).max(0),
            EventKind::Update => {}
        }
        Ok(())
    }

    fn stat(&mut self, stats: &[Stat]) -> Result<(), PolicyError> {
        let Some(time_ns) = stats.first().map(|s| s.time_ns) else {
            return Ok(());
        };
        let total: f64 = stats
            .iter()
            .filter(|s| s.metric == StatMetric::ConcurrentRequestsMillis)
            .map(|s| f64::from(s.value) / 1000.0)
            .sum();
        self.samples.push_back(Sample {
            time_ns,
            total_concurrency: total,
        });
        Ok(())
    }

    fn scale(&mut self, time_ns: i64) -> Result<u32, PolicyError> {
        self.prune(time_ns);

        let target = self.target_per_replica();
        let ready = self.ready_replicas.max(0) as f64;
        let stable_avg = self.window_average(time_ns, self.settings.stable_window);
        let panic_avg = self.window_average(time_ns, self.settings.panic_window);

        if stable_avg == 0.0 && panic_avg == 0.0 {
            let since = *self.zero_since_ns.get_or_insert(time_ns);
            let grace = self.settings.scale_to_zero_grace.as_nanos() as i64;
            return if time_ns - since >= grace {
                debug!(time_ns, "no demand past grace period, scaling to zero");
                Ok(0)
            } else {
                Ok(self.ready_replicas.max(0) as u32)
            };
        }
        self.zero_since_ns = None;

        let panicking = panic_avg > 2.0 * target * ready.max(1.0);
        let desired = if panicking {
            // Never scale below the current count while panicking.
            (panic_avg / target).ceil().max(ready)
        } else {
            (stable_avg / target).ceil()
        };

        let max_scale_up = (ready.max(1.0) * self.settings.max_scale_up_rate).ceil();
        let clamped = desired.min(max_scale_up).max(1.0);

        debug!(
            time_ns,
            stable_avg,
            panic_avg,
            ready = self.ready_replicas,
            panicking,
            desired = clamped,
            "scale decision"
        );
        Ok(clamped as u32)
    }
}
