//! The autoscaler tick loop.
//!
//! Ticks are pre-scheduled at construction as self-movements on the ticktock
//! stock, one per interval until the halt time. Each tick snapshots cluster
//! stats into the policy, asks it for a desired replica count, and issues
//! the difference as `increase_desired`/`reduce_desired` movements.

use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::model::cluster::{ClusterModel, INCREASE_DESIRED, KIND_DESIRED, REDUCE_DESIRED};
use crate::simulator::{
    BaseEntity, Entity, EntityKind, EntityRef, Environment, Movement, MovementKind, SimContext,
    Stock, StockError, StockName, StockRef,
};

pub const KIND_AUTOSCALER: EntityKind = EntityKind("Autoscaler");

pub const AUTOSCALER_TICK: MovementKind = MovementKind("autoscaler_tick");

const NANOSECOND: Duration = Duration::from_nanos(1);

/// Holds exactly one autoscaler entity; its `add` hook is the tick body.
pub struct AutoscalerTicktockStock {
    entity: EntityRef,
    cluster: Rc<ClusterModel>,
}

impl AutoscalerTicktockStock {
    pub fn new(entity: EntityRef, cluster: Rc<ClusterModel>) -> Rc<Self> {
        Rc::new(AutoscalerTicktockStock { entity, cluster })
    }
}

impl Stock for AutoscalerTicktockStock {
    fn name(&self) -> StockName {
        StockName::from("AutoscalerTicktock")
    }

    fn kind_stocked(&self) -> EntityKind {
        KIND_AUTOSCALER
    }

    fn count(&self) -> u64 {
        1
    }

    fn entities_in_stock(&self) -> Vec<EntityRef> {
        vec![Rc::clone(&self.entity)]
    }

    fn add(&self, entity: EntityRef, ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        if !Rc::ptr_eq(&entity, &self.entity) {
            return Err(StockError::Rejected {
                stock: self.name(),
                entity: entity.name().clone(),
                reason: "the ticktock only holds the entity given at creation".to_string(),
            });
        }

        let now = ctx.now();
        self.cluster.record_to_autoscaler(now, ctx.policy())?;
        let desired = ctx.policy().scale(now.nanos())?;

        let current = self.cluster.desired().count() as i64;
        let delta = i64::from(desired) - current;

        if delta > 0 {
            ctx.note(format!("scaling up from {current} to {desired}"));
            for _ in 0..delta {
                self.cluster
                    .desired_staging()
                    .push(BaseEntity::new("Desired", KIND_DESIRED))?;
                ctx.schedule_after(
                    INCREASE_DESIRED,
                    NANOSECOND,
                    Rc::clone(self.cluster.desired_staging()) as StockRef,
                    Rc::clone(self.cluster.desired()) as StockRef,
                );
            }
        } else if delta < 0 {
            ctx.note(format!("scaling down from {current} to {desired}"));
            for _ in delta..0 {
                ctx.schedule_after(
                    REDUCE_DESIRED,
                    NANOSECOND,
                    Rc::clone(self.cluster.desired()) as StockRef,
                    Rc::clone(self.cluster.desired_sink()) as StockRef,
                );
            }
        }

        if delta != 0 {
            debug!(at = %now, current, desired, "autoscaler issued a scale delta");
        }

        if let Some(average) = self.cluster.average_cpu_utilization(now) {
            ctx.record_cpu_utilization(average);
        }

        Ok(())
    }

    /// The ticktock never gives its entity up; a tick borrows it and puts it
    /// straight back.
    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        Some(Rc::clone(&self.entity))
    }
}

/// Wires the ticktock stock into an environment.
pub struct AutoscalerModel {
    ticktock: Rc<AutoscalerTicktockStock>,
}

/// Tuning for the tick loop itself; the policy carries the scaling math.
#[derive(Debug, Clone)]
pub struct AutoscalerSettings {
    pub tick_interval: Duration,
}

impl Default for AutoscalerSettings {
    fn default() -> Self {
        AutoscalerSettings {
            tick_interval: Duration::from_secs(2),
        }
    }
}

impl AutoscalerModel {
    /// Pre-schedule `autoscaler_tick` movements at
    /// `start + k·interval + 1ns` for k ≥ 1, up to the halt time.
    pub fn new(
        env: &mut Environment,
        cluster: Rc<ClusterModel>,
        settings: &AutoscalerSettings,
    ) -> Self {
        let entity = BaseEntity::new("Autoscaler", KIND_AUTOSCALER);
        let ticktock = AutoscalerTicktockStock::new(entity, cluster);

        let mut ticks = 0usize;
        let mut at = env.start_at() + settings.tick_interval + NANOSECOND;
        while at < env.halt_time() {
            env.add_to_schedule(Movement::new(
                AUTOSCALER_TICK,
                at,
                Rc::clone(&ticktock) as StockRef,
                Rc::clone(&ticktock) as StockRef,
            ));
            ticks += 1;
            at = at + settings.tick_interval;
        }
        debug!(
            ticks,
            interval_ms = settings.tick_interval.as_millis() as u64,
            "scheduled autoscaler ticks"
        );

        AutoscalerModel { ticktock }
    }

    pub fn ticktock(&self) -> &Rc<AutoscalerTicktockStock> {
        &self.ticktock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cluster::ClusterSettings;
    use crate::policy::FixedPolicy;
    use crate::simulator::SimTime;

    fn environment(target: u32, duration: Duration) -> Environment {
        Environment::new(SimTime::ORIGIN, duration, Box::new(FixedPolicy::new(target)))
    }

    #[test]
    fn pre_schedules_ticks_until_halt() {
        let mut env = environment(0, Duration::from_secs(10));
        let cluster = ClusterModel::new(&mut env, &ClusterSettings::default());
        let _autoscaler = AutoscalerModel::new(
            &mut env,
            cluster,
            &AutoscalerSettings {
                tick_interval: Duration::from_secs(2),
            },
        );

        let ticks: Vec<_> = env
            .pending_movements()
            .filter(|m| m.kind() == AUTOSCALER_TICK)
            .map(|m| m.occurs_at().nanos())
            .collect();
        // k = 1..=4: the k = 5 tick would land at the halt time + 1ns.
        assert_eq!(ticks.len(), 4);
        assert!(ticks.contains(&2_000_000_001));
        assert!(ticks.contains(&8_000_000_001));
    }

    #[test]
    fn tick_issues_increase_movements_for_scale_up() {
        let mut env = environment(3, Duration::from_secs(10));
        let cluster = ClusterModel::new(&mut env, &ClusterSettings::default());
        let autoscaler = AutoscalerModel::new(&mut env, Rc::clone(&cluster), &AutoscalerSettings::default());
        let ticktock = Rc::clone(autoscaler.ticktock());
        let entity = ticktock.entities_in_stock().remove(0);

        env.with_context(|ctx| ticktock.add(entity, ctx)).unwrap();

        let increases = env
            .pending_movements()
            .filter(|m| m.kind() == INCREASE_DESIRED)
            .count();
        assert_eq!(increases, 3);
        assert_eq!(cluster.desired_staging().count(), 3);
    }

    #[test]
    fn tick_issues_reduce_movements_for_scale_down() {
        let mut env = environment(0, Duration::from_secs(10));
        let cluster = ClusterModel::new(&mut env, &ClusterSettings::default());
        let autoscaler = AutoscalerModel::new(&mut env, Rc::clone(&cluster), &AutoscalerSettings::default());
        let ticktock = Rc::clone(autoscaler.ticktock());
        let entity = ticktock.entities_in_stock().remove(0);

        env.with_context(|ctx| {
            cluster
                .desired()
                .add(BaseEntity::new("Desired", KIND_DESIRED), ctx)
                .unwrap();
            cluster
                .desired()
                .add(BaseEntity::new("Desired", KIND_DESIRED), ctx)
                .unwrap();
            ticktock.add(entity, ctx).unwrap();
        });

        let reductions = env
            .pending_movements()
            .filter(|m| m.kind() == REDUCE_DESIRED)
            .count();
        assert_eq!(reductions, 2);
    }

    #[test]
    fn tick_rejects_a_foreign_entity() {
        let mut env = environment(0, Duration::from_secs(10));
        let cluster = ClusterModel::new(&mut env, &ClusterSettings::default());
        let autoscaler = AutoscalerModel::new(&mut env, cluster, &AutoscalerSettings::default());
        let ticktock = Rc::clone(autoscaler.ticktock());
        let imposter = BaseEntity::new("Autoscaler", KIND_AUTOSCALER);

        let err = env
            .with_context(|ctx| ticktock.add(imposter, ctx))
            .unwrap_err();
        assert!(matches!(err, StockError::Rejected { .. }));
    }
}
