//! The per-replica request processor: a single-CPU time-sliced scheduler.
//!
//! Requests wait in the `active` lane, run one at a time in the `on_cpu`
//! lane in 200ms quanta, and leave through the `terminated` lane to either
//! the completion sink or the failure sink. A sliding window of busy
//! intervals feeds the CPU-utilization metric.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::trace;

use crate::model::request::{KIND_REQUEST, RequestEntity};
use crate::simulator::{
    Entity, EntityKind, EntityRef, MovementKind, SimContext, SimTime, SinkStock, Stock,
    StockError, StockName, StockRef, ThroughStock,
};

pub const INTERRUPT_PROCESS: MovementKind = MovementKind("interrupt_process");
pub const COMPLETE_REQUEST: MovementKind = MovementKind("complete_request");
pub const TIMEOUT_REQUEST: MovementKind = MovementKind("timeout_request");

/// Longest uninterrupted stretch a request gets on the CPU.
pub const CPU_QUANTUM: Duration = Duration::from_millis(200);

/// How much history the CPU-utilization window keeps.
pub const CPU_USAGE_WINDOW: Duration = Duration::from_secs(15);

const NANOSECOND: Duration = Duration::from_nanos(1);

/// Busy intervals over a sliding window of simulated time.
pub struct CpuUsageLog {
    window: Duration,
    busy: RefCell<Vec<(SimTime, SimTime)>>,
}

impl CpuUsageLog {
    pub fn new(window: Duration) -> Self {
        CpuUsageLog {
            window,
            busy: RefCell::new(Vec::new()),
        }
    }

    /// Record that the CPU is busy over `[from, to]`.
    pub fn record(&self, from: SimTime, to: SimTime) {
        self.busy.borrow_mut().push((from, to));
    }

    fn trim(&self, now: SimTime) {
        let cutoff = now - self.window;
        let mut busy = self.busy.borrow_mut();
        busy.retain_mut(|slice| {
            if slice.1 < cutoff {
                return false;
            }
            if slice.0 < cutoff {
                slice.0 = cutoff;
            }
            true
        });
    }

    /// Fraction of the window the CPU was busy, clamped to `[0, 1]`.
    /// Intervals recorded ahead of `now` count in full; the window bound
    /// only trims the past.
    pub fn usage(&self, now: SimTime) -> f64 {
        self.trim(now);
        let busy_nanos: i64 = self
            .busy
            .borrow()
            .iter()
            .map(|(from, to)| to.nanos_since(*from))
            .sum();
        (busy_nanos as f64 / self.window.as_nanos() as f64).clamp(0.0, 1.0)
    }
}

/// The processing stock of one replica.
pub struct RequestsProcessingStock {
    weak_self: Weak<RequestsProcessingStock>,
    name: StockName,
    replica_number: u64,

    // Internal process accounting.
    active: ThroughStock,
    on_cpu: Rc<ThroughStock>,
    terminated: ThroughStock,
    cpu_usage: CpuUsageLog,

    requests_complete: Rc<SinkStock>,
    requests_failed: Rc<SinkStock>,
    arrivals_since_snapshot: Cell<u32>,
}

impl RequestsProcessingStock {
    pub fn new(
        replica_number: u64,
        requests_complete: Rc<SinkStock>,
        requests_failed: Rc<SinkStock>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| RequestsProcessingStock {
            weak_self: weak_self.clone(),
            name: StockName::from(format!("RequestsProcessing [{replica_number}]")),
            replica_number,
            active: ThroughStock::new(
                format!("RequestsActive [{replica_number}]"),
                KIND_REQUEST,
            ),
            on_cpu: Rc::new(ThroughStock::new(
                format!("OnCpu [{replica_number}]"),
                KIND_REQUEST,
            )),
            terminated: ThroughStock::new(
                format!("RequestsTerminated [{replica_number}]"),
                KIND_REQUEST,
            ),
            cpu_usage: CpuUsageLog::new(CPU_USAGE_WINDOW),
            requests_complete,
            requests_failed,
            arrivals_since_snapshot: Cell::new(0),
        })
    }

    fn self_ref(&self) -> StockRef {
        // The weak self-reference is only dereferenced from &self methods,
        // while the Rc is necessarily alive.
        self.weak_self.upgrade().expect("stock alive during hook")
    }

    pub fn replica_number(&self) -> u64 {
        self.replica_number
    }

    /// Fraction of the sliding window this replica's CPU was busy.
    pub fn cpu_utilization(&self, now: SimTime) -> f64 {
        self.cpu_usage.usage(now)
    }

    /// Requests first admitted since the last snapshot; reading resets it.
    pub fn arrivals_since_snapshot(&self) -> u32 {
        let arrivals = self.arrivals_since_snapshot.get();
        self.arrivals_since_snapshot.set(0);
        arrivals
    }

    /// If the CPU is idle and work is waiting, grant the head of the active
    /// lane a quantum: charge it, schedule its interrupt, log the busy
    /// interval, and put it on the CPU.
    fn refill_cpu(&self, ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        if self.on_cpu.count() != 0 || self.active.count() == 0 {
            return Ok(());
        }
        let Some(next) = self.active.pop() else {
            return Ok(());
        };
        let Some(request) = next.as_any().downcast_ref::<RequestEntity>() else {
            return Err(StockError::Rejected {
                stock: self.name.clone(),
                entity: next.name().clone(),
                reason: "non-request entity in the active lane".to_string(),
            });
        };

        let now = ctx.now();
        let quantum = request.cpu_time_remaining().min(CPU_QUANTUM);
        request.consume_cpu(quantum);
        ctx.schedule_after(
            INTERRUPT_PROCESS,
            quantum,
            Rc::clone(&self.on_cpu) as StockRef,
            self.self_ref(),
        );
        self.cpu_usage.record(now, now + quantum);
        trace!(
            replica = self.replica_number,
            request = %next.name(),
            quantum_ms = quantum.as_millis() as u64,
            "granting cpu quantum"
        );
        self.on_cpu.push(next)
    }
}

impl Stock for RequestsProcessingStock {
    fn name(&self) -> StockName {
        self.name.clone()
    }

    fn kind_stocked(&self) -> EntityKind {
        KIND_REQUEST
    }

    /// Requests waiting or running. The terminated lane is excluded: those
    /// requests are finished and merely awaiting drain.
    fn count(&self) -> u64 {
        self.active.count() + self.on_cpu.count()
    }

    fn entities_in_stock(&self) -> Vec<EntityRef> {
        let mut entities = self.active.entities_in_stock();
        entities.extend(self.on_cpu.entities_in_stock());
        entities
    }

    fn add(&self, entity: EntityRef, ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        let Some(request) = entity.as_any().downcast_ref::<RequestEntity>() else {
            return Err(StockError::KindMismatch {
                stock: self.name.clone(),
                expects: KIND_REQUEST,
                got: entity.kind(),
                entity: entity.name().clone(),
            });
        };

        let now = ctx.now();
        if request.start_time().is_none() {
            request.set_start_time(now);
            self.arrivals_since_snapshot
                .set(self.arrivals_since_snapshot.get() + 1);
        }

        if request.timed_out(now) {
            ctx.note(format!(
                "request {} timed out after {}ms",
                request.number(),
                now.nanos_since(request.start_time().unwrap_or(now)) / 1_000_000
            ));
            self.terminated.push(Rc::clone(&entity))?;
            ctx.schedule_after(
                TIMEOUT_REQUEST,
                NANOSECOND,
                self.self_ref(),
                Rc::clone(&self.requests_failed) as StockRef,
            );
        } else if request.cpu_time_remaining() > Duration::ZERO {
            self.active.push(Rc::clone(&entity))?;
        } else {
            ctx.note(format!(
                "request {} completed with {}ms of cpu",
                request.number(),
                request.cpu_time_consumed().as_millis()
            ));
            self.terminated.push(Rc::clone(&entity))?;
            ctx.schedule_after(
                COMPLETE_REQUEST,
                NANOSECOND,
                self.self_ref(),
                Rc::clone(&self.requests_complete) as StockRef,
            );
        }

        self.refill_cpu(ctx)
    }

    /// Drains finished requests only. Completed and timed-out requests leave
    /// through the terminated lane; `active` and `on_cpu` are untouchable
    /// from outside.
    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        self.terminated.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::request::RequestBehavior;
    use crate::policy::FixedPolicy;
    use crate::simulator::{Environment, SimTime};

    fn environment() -> Environment {
        Environment::new(
            SimTime::ORIGIN,
            Duration::from_secs(60),
            Box::new(FixedPolicy::new(0)),
        )
    }

    fn sinks() -> (Rc<SinkStock>, Rc<SinkStock>) {
        (
            Rc::new(SinkStock::new("RequestsComplete", KIND_REQUEST)),
            Rc::new(SinkStock::new("RequestsFailed", KIND_REQUEST)),
        )
    }

    fn request(cpu_millis: u64) -> Rc<RequestEntity> {
        Rc::new(RequestEntity::new(1, &RequestBehavior {
            cpu_time: Duration::from_millis(cpu_millis),
            timeout: Duration::from_secs(10),
        }))
    }

    #[test]
    fn admission_grants_a_capped_quantum() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);
        let req = request(500);

        env.with_context(|ctx| stock.add(req.clone(), ctx)).unwrap();

        // One request on the CPU, charged one 200ms quantum up front.
        assert_eq!(stock.count(), 1);
        assert_eq!(req.cpu_time_consumed(), Duration::from_millis(200));

        let interrupt = env
            .pending_movements()
            .find(|m| m.kind() == INTERRUPT_PROCESS)
            .expect("interrupt scheduled");
        assert_eq!(
            interrupt.occurs_at(),
            SimTime::ORIGIN + Duration::from_millis(200)
        );
        assert_eq!(interrupt.from().name().as_str(), "OnCpu [1]");
    }

    #[test]
    fn short_requests_get_a_shorter_quantum() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);
        let req = request(50);

        env.with_context(|ctx| stock.add(req.clone(), ctx)).unwrap();

        assert_eq!(req.cpu_time_consumed(), Duration::from_millis(50));
        let interrupt = env
            .pending_movements()
            .find(|m| m.kind() == INTERRUPT_PROCESS)
            .expect("interrupt scheduled");
        assert_eq!(
            interrupt.occurs_at(),
            SimTime::ORIGIN + Duration::from_millis(50)
        );
    }

    #[test]
    fn at_most_one_request_runs_at_a_time() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);

        env.with_context(|ctx| {
            stock.add(request(500), ctx).unwrap();
            stock.add(Rc::new(RequestEntity::new(2, &RequestBehavior::default())), ctx)
                .unwrap();
        });

        assert_eq!(stock.on_cpu.count(), 1);
        assert_eq!(stock.active.count(), 1);
    }

    #[test]
    fn spent_requests_schedule_completion() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);
        let req = request(200);
        req.set_start_time(SimTime::ORIGIN);
        req.consume_cpu(Duration::from_millis(200));

        env.with_context(|ctx| stock.add(req, ctx)).unwrap();

        let completion = env
            .pending_movements()
            .find(|m| m.kind() == COMPLETE_REQUEST)
            .expect("completion scheduled");
        assert_eq!(completion.occurs_at(), SimTime::ORIGIN + NANOSECOND);
        assert_eq!(completion.to().name().as_str(), "RequestsComplete");
        assert_eq!(stock.terminated.count(), 1);
        // Finished requests don't count as load.
        assert_eq!(stock.count(), 0);
    }

    #[test]
    fn remove_drains_the_terminated_lane_only() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);

        // A running request and a finished one.
        env.with_context(|ctx| {
            stock.add(request(500), ctx).unwrap();
            let done = Rc::new(RequestEntity::new(2, &RequestBehavior::default()));
            done.consume_cpu(Duration::from_millis(100));
            stock.add(done, ctx).unwrap();
        });

        let drained = env.with_context(|ctx| stock.remove(ctx)).expect("finished request");
        assert_eq!(drained.name().as_str(), "request-2");
        assert!(env.with_context(|ctx| stock.remove(ctx)).is_none());
        assert_eq!(stock.on_cpu.count(), 1);
    }

    #[test]
    fn expired_requests_divert_to_the_failure_sink() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);

        let req = Rc::new(RequestEntity::new(3, &RequestBehavior {
            cpu_time: Duration::from_millis(500),
            timeout: Duration::from_millis(100),
        }));
        req.set_start_time(SimTime::ORIGIN - Duration::from_secs(1));

        env.with_context(|ctx| stock.add(req, ctx)).unwrap();

        let diverted = env
            .pending_movements()
            .find(|m| m.kind() == TIMEOUT_REQUEST)
            .expect("timeout movement scheduled");
        assert_eq!(diverted.to().name().as_str(), "RequestsFailed");
        assert_eq!(stock.count(), 0);
    }

    #[test]
    fn rejects_non_request_entities() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);
        let wrong = crate::simulator::BaseEntity::new("imposter", EntityKind("Widget"));

        let err = env.with_context(|ctx| stock.add(wrong, ctx)).unwrap_err();
        assert!(matches!(err, StockError::KindMismatch { .. }));
    }

    #[test]
    fn arrival_counter_resets_on_read() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let stock = RequestsProcessingStock::new(1, complete, failed);

        env.with_context(|ctx| {
            stock.add(request(500), ctx).unwrap();
            // Re-admission of an already-started request is not an arrival.
            let seen = Rc::new(RequestEntity::new(9, &RequestBehavior::default()));
            seen.set_start_time(SimTime::ORIGIN);
            stock.add(seen, ctx).unwrap();
        });

        assert_eq!(stock.arrivals_since_snapshot(), 1);
        assert_eq!(stock.arrivals_since_snapshot(), 0);
    }

    #[test]
    fn cpu_usage_window_trims_and_clamps() {
        let log = CpuUsageLog::new(Duration::from_secs(15));
        let start = SimTime::ORIGIN;

        log.record(start, start + Duration::from_secs(5));
        assert!((log.usage(start + Duration::from_secs(5)) - 5.0 / 15.0).abs() < 1e-9);

        // Ancient slices fall out; straddling slices are clamped.
        let later = start + Duration::from_secs(25);
        log.record(later - Duration::from_secs(20), later - Duration::from_secs(16));
        log.record(later - Duration::from_secs(16), later - Duration::from_secs(14));
        let usage = log.usage(later);
        assert!((usage - 1.0 / 15.0).abs() < 1e-9, "usage was {usage}");
    }

    #[test]
    fn cpu_usage_never_exceeds_one() {
        let log = CpuUsageLog::new(Duration::from_secs(15));
        let start = SimTime::ORIGIN;
        for k in 0..20 {
            let from = start + Duration::from_secs(k);
            log.record(from, from + Duration::from_secs(1));
        }
        let usage = log.usage(start + Duration::from_secs(20));
        assert!((0.0..=1.0).contains(&usage));
    }
}
