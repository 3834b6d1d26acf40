//! Replica entities, the source that mints them, and the active stock whose
//! hooks publish and withdraw serving endpoints.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;
use tracing::debug;

use crate::model::processing::RequestsProcessingStock;
use crate::policy::{EventKind, Stat, StatMetric};
use crate::simulator::{
    Entity, EntityKind, EntityName, EntityRef, SimContext, SimTime, SinkStock, Stock, StockError,
    StockName, ThroughStock,
};

pub const KIND_REPLICA: EntityKind = EntityKind("Replica");

/// Default compute capacity of one replica, in millicores.
pub const REPLICA_CPU_CAPACITY_MILLIS: f64 = 1000.0;

/// One serving process in the cluster. Owns its processing stock.
pub struct ReplicaEntity {
    name: EntityName,
    number: u64,
    processing: Rc<RequestsProcessingStock>,
    total_cpu_capacity_millis: f64,
    serving: Cell<bool>,
}

impl ReplicaEntity {
    pub fn new(
        number: u64,
        requests_complete: Rc<SinkStock>,
        requests_failed: Rc<SinkStock>,
    ) -> Self {
        ReplicaEntity {
            name: EntityName::from(format!("replica-{number}")),
            number,
            processing: RequestsProcessingStock::new(number, requests_complete, requests_failed),
            total_cpu_capacity_millis: REPLICA_CPU_CAPACITY_MILLIS,
            serving: Cell::new(false),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn processing(&self) -> &Rc<RequestsProcessingStock> {
        &self.processing
    }

    /// Publish this replica's endpoint: it may now receive requests.
    pub fn activate(&self) {
        self.serving.set(true);
        debug!(replica = %self.name, "endpoint published");
    }

    /// Withdraw the endpoint ahead of termination.
    pub fn deactivate(&self) {
        self.serving.set(false);
        debug!(replica = %self.name, "endpoint withdrawn");
    }

    pub fn is_serving(&self) -> bool {
        self.serving.get()
    }

    /// CPU utilization over the sliding window, as a fraction of capacity.
    pub fn cpu_utilization(&self, now: SimTime) -> f64 {
        self.processing.cpu_utilization(now)
    }

    pub fn occupied_cpu_capacity_millis(&self, now: SimTime) -> f64 {
        self.cpu_utilization(now) * self.total_cpu_capacity_millis
    }

    pub fn total_cpu_capacity_millis(&self) -> f64 {
        self.total_cpu_capacity_millis
    }

    /// Snapshot for the autoscaler: concurrency in thousandths plus the
    /// arrivals counter (which resets on read).
    pub fn stats(&self, now: SimTime) -> Vec<Stat> {
        vec![
            Stat {
                time_ns: now.nanos(),
                pod: self.name.as_str().to_string(),
                metric: StatMetric::ConcurrentRequestsMillis,
                value: (self.processing.count() * 1000) as i32,
            },
            Stat {
                time_ns: now.nanos(),
                pod: self.name.as_str().to_string(),
                metric: StatMetric::RequestsReceived,
                value: self.processing.arrivals_since_snapshot() as i32,
            },
        ]
    }
}

impl Entity for ReplicaEntity {
    fn name(&self) -> &EntityName {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        KIND_REPLICA
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Source stock minting replicas with sequential numbers.
pub struct ReplicaSource {
    name: StockName,
    minted: Cell<u64>,
    requests_complete: Rc<SinkStock>,
    requests_failed: Rc<SinkStock>,
}

impl ReplicaSource {
    pub fn new(requests_complete: Rc<SinkStock>, requests_failed: Rc<SinkStock>) -> Rc<Self> {
        Rc::new(ReplicaSource {
            name: StockName::from("ReplicaSource"),
            minted: Cell::new(0),
            requests_complete,
            requests_failed,
        })
    }
}

impl Stock for ReplicaSource {
    fn name(&self) -> StockName {
        self.name.clone()
    }

    fn kind_stocked(&self) -> EntityKind {
        KIND_REPLICA
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
            reason: "the replica source does not accept entities".to_string(),
        })
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        let number = self.minted.get() + 1;
        self.minted.set(number);
        Some(Rc::new(ReplicaEntity::new(
            number,
            Rc::clone(&self.requests_complete),
            Rc::clone(&self.requests_failed),
        )))
    }
}

/// Replicas currently serving. Adding activates the replica and tells the
/// policy a pod was created; removing deactivates it on its way out.
pub struct ReplicasActiveStock {
    delegate: ThroughStock,
}

impl ReplicasActiveStock {
    pub fn new() -> Rc<Self> {
        Rc::new(ReplicasActiveStock {
            delegate: ThroughStock::new("ReplicasActive", KIND_REPLICA),
        })
    }

    /// The serving replicas, in activation order.
    pub fn replicas(&self) -> Vec<EntityRef> {
        self.delegate.entities_in_stock()
    }
}

impl Stock for ReplicasActiveStock {
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
        let Some(replica) = entity.as_any().downcast_ref::<ReplicaEntity>() else {
            return Err(StockError::KindMismatch {
                stock: self.name(),
                expects: KIND_REPLICA,
                got: entity.kind(),
                entity: entity.name().clone(),
            });
        };
        replica.activate();
        let now = ctx.now().nanos();
        ctx.policy().event(
            now,
            EventKind::Create,
            json!({ "kind": "replica", "name": replica.name().as_str() }),
        )?;
        ctx.note(format!("{} is now serving", replica.name()));
        self.delegate.push(entity)
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        let entity = self.delegate.pop()?;
        if let Some(replica) = entity.as_any().downcast_ref::<ReplicaEntity>() {
            replica.deactivate();
        }
        Some(entity)
    }
}
