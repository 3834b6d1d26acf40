//! The simulation kernel: entities, stocks, movements, and the driver loop.

mod entity;
mod environment;
mod movement;
mod queue;
mod stock;

pub use entity::{BaseEntity, Entity, EntityKind, EntityName, EntityRef, KIND_SCENARIO};
pub use environment::{CpuUtilization, Environment, RunOutcome, SimContext, SimulationError};
pub use movement::{
    CompletedMovement, IgnoreReason, IgnoredMovement, Movement, MovementKind, SimTime,
    RUNNING_TO_HALTED, START_TO_RUNNING,
};
pub use queue::{Dequeued, DuplicateTimestamp, MovementQueue};
pub use stock::{SinkStock, SourceStock, Stock, StockError, StockName, StockRef, ThroughStock};
