//! Request routing: dispatch arrivals to the least-loaded active replica.

use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::trace;

use crate::model::processing::RequestsProcessingStock;
use crate::model::replica::{ReplicaEntity, ReplicasActiveStock};
use crate::model::request::{KIND_REQUEST, RequestEntity};
use crate::simulator::{
    Entity, EntityKind, EntityRef, MovementKind, SimContext, SinkStock, Stock, StockError,
    StockName, StockRef, ThroughStock,
};

/// Traffic patterns schedule arrivals into the routing stock with this kind.
pub const ARRIVE_AT_ROUTING_STOCK: MovementKind = MovementKind("arrive_at_routing_stock");
pub const SEND_TO_REPLICA: MovementKind = MovementKind("send_to_replica");
pub const RETRY_ROUTING: MovementKind = MovementKind("retry_routing");
pub const FAIL_REQUEST: MovementKind = MovementKind("fail_request");

const NANOSECOND: Duration = Duration::from_nanos(1);

/// Requests in flight awaiting an active replica.
///
/// On arrival a request is dispatched to the active replica with the fewest
/// requests in its processing stock (ties broken by lowest replica number).
/// With no active replica the stock retries itself on the request's
/// exponential backoff until the attempt budget runs out, then fails the
/// request.
pub struct RequestsRoutingStock {
    weak_self: Weak<RequestsRoutingStock>,
    delegate: ThroughStock,
    replicas_active: Rc<ReplicasActiveStock>,
    requests_failed: Rc<SinkStock>,
}

impl RequestsRoutingStock {
    pub fn new(
        replicas_active: Rc<ReplicasActiveStock>,
        requests_failed: Rc<SinkStock>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| RequestsRoutingStock {
            weak_self: weak_self.clone(),
            delegate: ThroughStock::new("RequestsRouting", KIND_REQUEST),
            replicas_active,
            requests_failed,
        })
    }

    fn self_ref(&self) -> StockRef {
        self.weak_self.upgrade().expect("stock alive during hook")
    }

    /// The serving replica with the fewest requests in flight; ties go to
    /// the lowest replica number.
    fn least_loaded_replica(&self) -> Option<(u64, Rc<RequestsProcessingStock>)> {
        self.replicas_active
            .replicas()
            .iter()
            .filter_map(|e| {
                let replica = e.as_any().downcast_ref::<ReplicaEntity>()?;
                Some((replica.number(), Rc::clone(replica.processing())))
            })
            .min_by_key(|(number, processing)| (processing.count(), *number))
    }
}

impl Stock for RequestsRoutingStock {
    fn name(&self) -> StockName {
        self.delegate.name()
    }

    fn kind_stocked(&self) -> EntityKind {
        self.delegate.kind_stocked()
    }

    fn count(&self) -> u64 {
        self.delegate.count()
    }

    fn entities_in_stock(&self) -> Vec<EntityRef> {
        self.delegate.entities_in_stock()
    }

    fn add(&self, entity: EntityRef, ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        let Some(request) = entity.as_any().downcast_ref::<RequestEntity>() else {
            return Err(StockError::KindMismatch {
                stock: self.name(),
                expects: KIND_REQUEST,
                got: entity.kind(),
                entity: entity.name().clone(),
            });
        };

        match self.least_loaded_replica() {
            Some((number, processing)) => {
                ctx.note(format!("routed to replica-{number}"));
                ctx.schedule_after(SEND_TO_REPLICA, NANOSECOND, self.self_ref(), processing);
            }
            None => match request.next_backoff() {
                Some(backoff) => {
                    trace!(
                        request = %entity.name(),
                        backoff_ms = backoff.as_millis() as u64,
                        "no active replicas, retrying"
                    );
                    ctx.note(format!(
                        "no active replicas; retry {} in {}ms",
                        request.attempts(),
                        backoff.as_millis()
                    ));
                    ctx.schedule_after(RETRY_ROUTING, backoff, self.self_ref(), self.self_ref());
                }
                None => {
                    ctx.note("no active replicas; request abandoned".to_string());
                    ctx.schedule_after(
                        FAIL_REQUEST,
                        NANOSECOND,
                        self.self_ref(),
                        Rc::clone(&self.requests_failed) as StockRef,
                    );
                }
            },
        }

        self.delegate.push(entity)
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        self.delegate.pop()
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

    fn request(n: u64) -> Rc<RequestEntity> {
        Rc::new(RequestEntity::new(n, &RequestBehavior::default()))
    }

    #[test]
    fn dispatches_to_the_least_loaded_replica() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let active = ReplicasActiveStock::new();
        let routing = RequestsRoutingStock::new(Rc::clone(&active), Rc::clone(&failed));

        let busy = Rc::new(ReplicaEntity::new(1, Rc::clone(&complete), Rc::clone(&failed)));
        let idle = Rc::new(ReplicaEntity::new(2, complete, failed));

        env.with_context(|ctx| {
            active.add(busy.clone(), ctx).unwrap();
            active.add(idle.clone(), ctx).unwrap();
            busy.processing().add(request(1), ctx).unwrap();
            routing.add(request(2), ctx).unwrap();
        });

        let dispatch = env
            .pending_movements()
            .find(|m| m.kind() == SEND_TO_REPLICA)
            .expect("dispatch scheduled");
        assert_eq!(dispatch.to().name().as_str(), "RequestsProcessing [2]");
    }

    #[test]
    fn ties_break_to_the_lowest_replica_number() {
        let mut env = environment();
        let (complete, failed) = sinks();
        let active = ReplicasActiveStock::new();
        let routing = RequestsRoutingStock::new(Rc::clone(&active), Rc::clone(&failed));

        env.with_context(|ctx| {
            // Insert out of order so FIFO position can't mask the tie-break.
            let second = Rc::new(ReplicaEntity::new(2, Rc::clone(&complete), Rc::clone(&failed)));
            let first = Rc::new(ReplicaEntity::new(1, Rc::clone(&complete), Rc::clone(&failed)));
            active.add(second, ctx).unwrap();
            active.add(first, ctx).unwrap();
            routing.add(request(1), ctx).unwrap();
        });

        let dispatch = env
            .pending_movements()
            .find(|m| m.kind() == SEND_TO_REPLICA)
            .expect("dispatch scheduled");
        assert_eq!(dispatch.to().name().as_str(), "RequestsProcessing [1]");
    }

    #[test]
    fn retries_with_backoff_when_no_replica_serves() {
        let mut env = environment();
        let (_, failed) = sinks();
        let active = ReplicasActiveStock::new();
        let routing = RequestsRoutingStock::new(active, failed);
        let req = request(1);

        env.with_context(|ctx| routing.add(req.clone(), ctx)).unwrap();

        let retry = env
            .pending_movements()
            .find(|m| m.kind() == RETRY_ROUTING)
            .expect("retry scheduled");
        assert_eq!(
            retry.occurs_at(),
            SimTime::ORIGIN + Duration::from_millis(100)
        );
        assert_eq!(req.attempts(), 1);
        assert_eq!(routing.count(), 1);
    }

    #[test]
    fn abandons_after_the_attempt_budget() {
        let mut env = environment();
        let (_, failed) = sinks();
        let active = ReplicasActiveStock::new();
        let routing = RequestsRoutingStock::new(active, Rc::clone(&failed));
        let req = request(1);
        while req.next_backoff().is_some() {}

        env.with_context(|ctx| routing.add(req, ctx)).unwrap();

        let abandon = env
            .pending_movements()
            .find(|m| m.kind() == FAIL_REQUEST)
            .expect("failure scheduled");
        assert_eq!(abandon.to().name().as_str(), "RequestsFailed");
    }
}
