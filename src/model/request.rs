//! Request entities and the traffic source that mints them.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::simulator::{
    Entity, EntityKind, EntityName, EntityRef, SimContext, SimTime, Stock, StockError, StockName,
};

pub const KIND_REQUEST: EntityKind = EntityKind("Request");

const BACKOFF_MULTIPLIER: f64 = 1.3;
const MAX_ROUTING_ATTEMPTS: u32 = 18;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// How requests behave: CPU they need and how long they may take end-to-end.
#[derive(Debug, Clone)]
pub struct RequestBehavior {
    pub cpu_time: Duration,
    pub timeout: Duration,
}

impl Default for RequestBehavior {
    fn default() -> Self {
        RequestBehavior {
            cpu_time: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
        }
    }
}

/// A single HTTP request travelling through the cluster.
///
/// Mutable fields use `Cell` because the entity is shared between stocks over
/// its lifetime; the kernel serializes all access.
pub struct RequestEntity {
    name: EntityName,
    number: u64,
    cpu_time_required: Duration,
    cpu_time_consumed: Cell<Duration>,
    start_time: Cell<Option<SimTime>>,
    timeout: Duration,
    next_backoff: Cell<Duration>,
    attempts: Cell<u32>,
}

impl RequestEntity {
    pub fn new(number: u64, behavior: &RequestBehavior) -> Self {
        RequestEntity {
            name: EntityName::from(format!("request-{number}")),
            number,
            cpu_time_required: behavior.cpu_time,
            cpu_time_consumed: Cell::new(Duration::ZERO),
            start_time: Cell::new(None),
            timeout: behavior.timeout,
            next_backoff: Cell::new(INITIAL_BACKOFF),
            attempts: Cell::new(0),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn cpu_time_required(&self) -> Duration {
        self.cpu_time_required
    }

    pub fn cpu_time_consumed(&self) -> Duration {
        self.cpu_time_consumed.get()
    }

    pub fn cpu_time_remaining(&self) -> Duration {
        self.cpu_time_required
            .saturating_sub(self.cpu_time_consumed.get())
    }

    /// Charge a granted quantum. Never exceeds the required budget.
    pub fn consume_cpu(&self, quantum: Duration) {
        let consumed = (self.cpu_time_consumed.get() + quantum).min(self.cpu_time_required);
        self.cpu_time_consumed.set(consumed);
    }

    pub fn start_time(&self) -> Option<SimTime> {
        self.start_time.get()
    }

    pub fn set_start_time(&self, at: SimTime) {
        self.start_time.set(Some(at));
    }

    pub fn timed_out(&self, now: SimTime) -> bool {
        match self.start_time.get() {
            Some(started) => now.nanos_since(started) > self.timeout.as_nanos() as i64,
            None => false,
        }
    }

    /// The next routing backoff, exponentially increasing. `None` once the
    /// attempt budget is spent.
    pub fn next_backoff(&self) -> Option<Duration> {
        if self.attempts.get() >= MAX_ROUTING_ATTEMPTS {
            return None;
        }
        self.attempts.set(self.attempts.get() + 1);
        let backoff = self.next_backoff.get();
        self.next_backoff.set(backoff.mul_f64(BACKOFF_MULTIPLIER));
        Some(backoff)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }
}

impl Entity for RequestEntity {
    fn name(&self) -> &EntityName {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        KIND_REQUEST
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Source stock minting request entities on demand. Traffic patterns
/// schedule `arrive_at_routing_stock` movements out of this stock; the
/// request itself is created when the movement executes.
pub struct TrafficSource {
    name: StockName,
    behavior: RequestBehavior,
    minted: Cell<u64>,
}

impl TrafficSource {
    pub fn new(behavior: RequestBehavior) -> Rc<Self> {
        Rc::new(TrafficSource {
            name: StockName::from("TrafficSource"),
            behavior,
            minted: Cell::new(0),
        })
    }
}

impl Stock for TrafficSource {
    fn name(&self) -> StockName {
        self.name.clone()
    }

    fn kind_stocked(&self) -> EntityKind {
        KIND_REQUEST
    }

    fn count(&self) -> u64 {
        0
    }

    fn entities_in_stock(&self) -> Vec<EntityRef> {
        Vec::new()
    }

    fn add(&self, entity: EntityRef, _ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        Err(StockError::Rejected {
            stock: self.name.clone(),
            entity: entity.name().clone(),
            reason: "the traffic source does not accept entities".to_string(),
        })
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        let number = self.minted.get() + 1;
        self.minted.set(number);
        Some(Rc::new(RequestEntity::new(number, &self.behavior)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_budget_is_never_exceeded() {
        let request = RequestEntity::new(1, &RequestBehavior {
            cpu_time: Duration::from_millis(500),
            timeout: Duration::from_secs(1),
        });

        request.consume_cpu(Duration::from_millis(200));
        request.consume_cpu(Duration::from_millis(200));
        assert_eq!(request.cpu_time_remaining(), Duration::from_millis(100));

        request.consume_cpu(Duration::from_millis(200));
        assert_eq!(request.cpu_time_consumed(), Duration::from_millis(500));
        assert_eq!(request.cpu_time_remaining(), Duration::ZERO);
    }

    #[test]
    fn backoff_grows_and_runs_out() {
        let request = RequestEntity::new(1, &RequestBehavior::default());

        let first = request.next_backoff().unwrap();
        let second = request.next_backoff().unwrap();
        assert_eq!(first, Duration::from_millis(100));
        assert_eq!(second, Duration::from_millis(130));

        for _ in 2..MAX_ROUTING_ATTEMPTS {
            assert!(request.next_backoff().is_some());
        }
        assert!(request.next_backoff().is_none());
        assert_eq!(request.attempts(), MAX_ROUTING_ATTEMPTS);
    }

    #[test]
    fn timeout_is_measured_from_first_admission() {
        let request = RequestEntity::new(1, &RequestBehavior {
            cpu_time: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
        });
        let start = SimTime::ORIGIN + Duration::from_secs(5);

        assert!(!request.timed_out(start + Duration::from_secs(10)));
        request.set_start_time(start);
        assert!(!request.timed_out(start + Duration::from_secs(1)));
        assert!(request.timed_out(start + Duration::from_secs(1) + Duration::from_nanos(1)));
    }
}
