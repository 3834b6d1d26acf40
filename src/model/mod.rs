//! The cluster domain: requests, replicas, routing, lifecycle, autoscaling,
//! and traffic shapes. These are the stocks and entities whose hooks carry
//! the semantics the kernel drives.

pub mod autoscaler;
pub mod cluster;
pub mod processing;
pub mod replica;
pub mod request;
pub mod routing;
pub mod traffic;

pub use autoscaler::{AUTOSCALER_TICK, AutoscalerModel, AutoscalerSettings, KIND_AUTOSCALER};
pub use cluster::{ClusterModel, ClusterSettings, INCREASE_DESIRED, KIND_DESIRED, REDUCE_DESIRED};
pub use processing::{
    COMPLETE_REQUEST, CPU_QUANTUM, CPU_USAGE_WINDOW, INTERRUPT_PROCESS, RequestsProcessingStock,
    TIMEOUT_REQUEST,
};
pub use replica::{KIND_REPLICA, ReplicaEntity, ReplicaSource, ReplicasActiveStock};
pub use request::{KIND_REQUEST, RequestBehavior, RequestEntity, TrafficSource};
pub use routing::{
    ARRIVE_AT_ROUTING_STOCK, FAIL_REQUEST, RETRY_ROUTING, RequestsRoutingStock, SEND_TO_REPLICA,
};
pub use traffic::{
    Pattern, Ramp, RampConfig, Sinusoidal, SinusoidalConfig, Step, StepConfig, UniformConfig,
    UniformRandom,
};
