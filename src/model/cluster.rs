//! The cluster model: replica lifecycle stocks, the desired-replicas stock
//! whose count encodes the autoscaler setpoint, and the wiring between them.
//!
//! Scale changes never touch replicas directly. They add or remove entities
//! in the `Desired` stock, whose hooks schedule replica launches and
//! terminations; the launch and terminate delays make convergence gradual.

use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::model::replica::{KIND_REPLICA, ReplicaEntity, ReplicaSource, ReplicasActiveStock};
use crate::model::request::{KIND_REQUEST, RequestBehavior, TrafficSource};
use crate::model::routing::RequestsRoutingStock;
use crate::policy::{EventKind, PolicyError, ScalingPolicy, Stat};
use crate::simulator::{
    BaseEntity, Entity, EntityKind, EntityRef, Environment, Movement, MovementKind, SimContext,
    SimTime, SinkStock, Stock, StockError, StockName, StockRef, ThroughStock,
};

pub const KIND_DESIRED: EntityKind = EntityKind("Desired");

pub const INCREASE_DESIRED: MovementKind = MovementKind("increase_desired");
pub const REDUCE_DESIRED: MovementKind = MovementKind("reduce_desired");
pub const BEGIN_LAUNCHING: MovementKind = MovementKind("begin_launching");
pub const FINISH_LAUNCHING: MovementKind = MovementKind("finish_launching");
pub const BEGIN_TERMINATING: MovementKind = MovementKind("begin_terminating");
pub const FINISH_TERMINATING: MovementKind = MovementKind("finish_terminating");

const NANOSECOND: Duration = Duration::from_nanos(1);

/// Cluster-level knobs.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub launch_delay: Duration,
    pub terminate_delay: Duration,
    pub initial_replicas: u32,
    pub request_behavior: RequestBehavior,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            launch_delay: Duration::from_secs(1),
            terminate_delay: Duration::from_secs(1),
            initial_replicas: 0,
            request_behavior: RequestBehavior::default(),
        }
    }
}

/// Replicas being brought up. Entering here schedules the transition to
/// active after the launch delay.
pub struct ReplicasLaunchingStock {
    weak_self: Weak<ReplicasLaunchingStock>,
    delegate: ThroughStock,
    launch_delay: Duration,
    active: Rc<ReplicasActiveStock>,
}

impl ReplicasLaunchingStock {
    pub fn new(launch_delay: Duration, active: Rc<ReplicasActiveStock>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| ReplicasLaunchingStock {
            weak_self: weak_self.clone(),
            delegate: ThroughStock::new("ReplicasLaunching", KIND_REPLICA),
            launch_delay,
            active,
        })
    }

    fn self_ref(&self) -> StockRef {
        self.weak_self.upgrade().expect("stock alive during hook")
    }
}

impl Stock for ReplicasLaunchingStock {
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
        ctx.note(format!(
            "{} launching, active in {}ms",
            entity.name(),
            self.launch_delay.as_millis()
        ));
        ctx.schedule_after(
            FINISH_LAUNCHING,
            self.launch_delay,
            self.self_ref(),
            Rc::clone(&self.active) as StockRef,
        );
        self.delegate.push(entity)
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        self.delegate.pop()
    }
}

/// Replicas shutting down. Entering here schedules the transition to
/// terminated after the terminate delay.
pub struct ReplicasTerminatingStock {
    weak_self: Weak<ReplicasTerminatingStock>,
    delegate: ThroughStock,
    terminate_delay: Duration,
    terminated: Rc<ReplicasTerminatedStock>,
}

impl ReplicasTerminatingStock {
    pub fn new(terminate_delay: Duration, terminated: Rc<ReplicasTerminatedStock>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| ReplicasTerminatingStock {
            weak_self: weak_self.clone(),
            delegate: ThroughStock::new("ReplicasTerminating", KIND_REPLICA),
            terminate_delay,
            terminated,
        })
    }

    fn self_ref(&self) -> StockRef {
        self.weak_self.upgrade().expect("stock alive during hook")
    }
}

impl Stock for ReplicasTerminatingStock {
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
        ctx.note(format!(
            "{} terminating, gone in {}ms",
            entity.name(),
            self.terminate_delay.as_millis()
        ));
        ctx.schedule_after(
            FINISH_TERMINATING,
            self.terminate_delay,
            self.self_ref(),
            Rc::clone(&self.terminated) as StockRef,
        );
        self.delegate.push(entity)
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        self.delegate.pop()
    }
}

/// Terminal stock for replicas. Tells the policy the pod is gone.
pub struct ReplicasTerminatedStock {
    delegate: SinkStock,
}

impl ReplicasTerminatedStock {
    pub fn new() -> Rc<Self> {
        Rc::new(ReplicasTerminatedStock {
            delegate: SinkStock::new("ReplicasTerminated", KIND_REPLICA),
        })
    }
}

impl Stock for ReplicasTerminatedStock {
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
        let now = ctx.now().nanos();
        ctx.policy().event(
            now,
            EventKind::Delete,
            json!({ "kind": "replica", "name": entity.name().as_str() }),
        )?;
        self.delegate.push(entity)
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        None
    }
}

/// The autoscaler setpoint, materialized as an entity count.
///
/// Adding a desired token schedules a replica launch; removing one schedules
/// a termination of an active replica.
pub struct DesiredReplicasStock {
    delegate: ThroughStock,
    replica_source: Rc<ReplicaSource>,
    launching: Rc<ReplicasLaunchingStock>,
    active: Rc<ReplicasActiveStock>,
    terminating: Rc<ReplicasTerminatingStock>,
}

impl DesiredReplicasStock {
    pub fn new(
        replica_source: Rc<ReplicaSource>,
        launching: Rc<ReplicasLaunchingStock>,
        active: Rc<ReplicasActiveStock>,
        terminating: Rc<ReplicasTerminatingStock>,
    ) -> Rc<Self> {
        Rc::new(DesiredReplicasStock {
            delegate: ThroughStock::new("Desired", KIND_DESIRED),
            replica_source,
            launching,
            active,
            terminating,
        })
    }
}

impl Stock for DesiredReplicasStock {
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
        self.delegate.push(entity)?;
        ctx.note(format!("desired is now {}", self.delegate.count()));
        ctx.schedule_after(
            BEGIN_LAUNCHING,
            NANOSECOND,
            Rc::clone(&self.replica_source) as StockRef,
            Rc::clone(&self.launching) as StockRef,
        );
        Ok(())
    }

    fn remove(&self, ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        let entity = self.delegate.pop()?;
        ctx.note(format!("desired is now {}", self.delegate.count()));
        ctx.schedule_after(
            BEGIN_TERMINATING,
            NANOSECOND,
            Rc::clone(&self.active) as StockRef,
            Rc::clone(&self.terminating) as StockRef,
        );
        Some(entity)
    }
}

/// Aggregates the replica lifecycle stocks, routing, and the sinks.
pub struct ClusterModel {
    desired: Rc<DesiredReplicasStock>,
    desired_staging: Rc<ThroughStock>,
    desired_sink: Rc<SinkStock>,
    launching: Rc<ReplicasLaunchingStock>,
    active: Rc<ReplicasActiveStock>,
    terminating: Rc<ReplicasTerminatingStock>,
    terminated: Rc<ReplicasTerminatedStock>,
    routing: Rc<RequestsRoutingStock>,
    traffic_source: Rc<TrafficSource>,
    requests_complete: Rc<SinkStock>,
    requests_failed: Rc<SinkStock>,
}

impl ClusterModel {
    /// Build the stock graph and schedule `increase_desired` movements for
    /// any initial replicas, so warm starts flow through the same machinery
    /// as autoscaler scale-ups.
    pub fn new(env: &mut Environment, settings: &ClusterSettings) -> Rc<Self> {
        let requests_complete = Rc::new(SinkStock::new("RequestsComplete", KIND_REQUEST));
        let requests_failed = Rc::new(SinkStock::new("RequestsFailed", KIND_REQUEST));

        let active = ReplicasActiveStock::new();
        let terminated = ReplicasTerminatedStock::new();
        let terminating = ReplicasTerminatingStock::new(settings.terminate_delay, Rc::clone(&terminated));
        let launching = ReplicasLaunchingStock::new(settings.launch_delay, Rc::clone(&active));
        let replica_source = ReplicaSource::new(
            Rc::clone(&requests_complete),
            Rc::clone(&requests_failed),
        );
        let desired = DesiredReplicasStock::new(
            Rc::clone(&replica_source),
            Rc::clone(&launching),
            Rc::clone(&active),
            Rc::clone(&terminating),
        );
        let desired_staging = Rc::new(ThroughStock::new("DesiredSource", KIND_DESIRED));
        let desired_sink = Rc::new(SinkStock::new("DesiredSink", KIND_DESIRED));
        let routing = RequestsRoutingStock::new(Rc::clone(&active), Rc::clone(&requests_failed));
        let traffic_source = TrafficSource::new(settings.request_behavior.clone());

        let cluster = Rc::new(ClusterModel {
            desired,
            desired_staging,
            desired_sink,
            launching,
            active,
            terminating,
            terminated,
            routing,
            traffic_source,
            requests_complete,
            requests_failed,
        });

        for i in 0..settings.initial_replicas {
            // push cannot fail: kinds match by construction
            let _ = cluster
                .desired_staging
                .push(BaseEntity::new("Desired", KIND_DESIRED));
            env.add_to_schedule(Movement::new(
                INCREASE_DESIRED,
                env.start_at() + Duration::from_nanos(i as u64 + 1),
                Rc::clone(&cluster.desired_staging) as StockRef,
                Rc::clone(&cluster.desired) as StockRef,
            ));
        }
        if settings.initial_replicas > 0 {
            debug!(
                initial = settings.initial_replicas,
                "scheduled initial replica launches"
            );
        }

        cluster
    }

    pub fn desired(&self) -> &Rc<DesiredReplicasStock> {
        &self.desired
    }

    pub fn desired_staging(&self) -> &Rc<ThroughStock> {
        &self.desired_staging
    }

    pub fn desired_sink(&self) -> &Rc<SinkStock> {
        &self.desired_sink
    }

    pub fn launching(&self) -> &Rc<ReplicasLaunchingStock> {
        &self.launching
    }

    pub fn active(&self) -> &Rc<ReplicasActiveStock> {
        &self.active
    }

    pub fn terminating(&self) -> &Rc<ReplicasTerminatingStock> {
        &self.terminating
    }

    pub fn terminated(&self) -> &Rc<ReplicasTerminatedStock> {
        &self.terminated
    }

    pub fn routing(&self) -> &Rc<RequestsRoutingStock> {
        &self.routing
    }

    pub fn traffic_source(&self) -> &Rc<TrafficSource> {
        &self.traffic_source
    }

    pub fn requests_complete(&self) -> &Rc<SinkStock> {
        &self.requests_complete
    }

    pub fn requests_failed(&self) -> &Rc<SinkStock> {
        &self.requests_failed
    }

    /// Snapshot per-replica stats into the policy.
    pub fn record_to_autoscaler(
        &self,
        now: SimTime,
        policy: &mut dyn ScalingPolicy,
    ) -> Result<(), PolicyError> {
        let mut stats: Vec<Stat> = Vec::new();
        for entity in self.active.replicas() {
            if let Some(replica) = entity.as_any().downcast_ref::<ReplicaEntity>() {
                stats.extend(replica.stats(now));
            }
        }
        policy.stat(&stats)
    }

    /// Mean CPU utilization over active replicas, in percent. `None` when
    /// nothing is active.
    pub fn average_cpu_utilization(&self, now: SimTime) -> Option<f64> {
        let mut total = 0.0;
        let mut count = 0u32;
        for entity in self.active.replicas() {
            if let Some(replica) = entity.as_any().downcast_ref::<ReplicaEntity>() {
                total += replica.occupied_cpu_capacity_millis(now) * 100.0
                    / replica.total_cpu_capacity_millis();
                count += 1;
            }
        }
        (count > 0).then(|| total / f64::from(count))
    }
}
