//! Traffic-shape generators.
//!
//! Each pattern schedules `arrive_at_routing_stock` movements from the
//! traffic source into the routing stock before the run starts. Generators
//! are seeded, so identical inputs produce identical schedules.

use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::request::TrafficSource;
use crate::model::routing::{ARRIVE_AT_ROUTING_STOCK, RequestsRoutingStock};
use crate::simulator::{Environment, Movement, SimTime, StockRef};

/// A traffic shape that can pre-schedule request arrivals.
pub trait Pattern {
    fn name(&self) -> &'static str;
    fn generate(&mut self, env: &mut Environment);
}

/// `number_of_requests` arrivals uniformly at random over the run window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformConfig {
    pub number_of_requests: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    1
}

pub struct UniformRandom {
    config: UniformConfig,
    source: Rc<TrafficSource>,
    routing: Rc<RequestsRoutingStock>,
}

impl UniformRandom {
    pub fn new(
        config: UniformConfig,
        source: Rc<TrafficSource>,
        routing: Rc<RequestsRoutingStock>,
    ) -> Self {
        UniformRandom {
            config,
            source,
            routing,
        }
    }
}

impl Pattern for UniformRandom {
    fn name(&self) -> &'static str {
        "golang_rand_uniform"
    }

    fn generate(&mut self, env: &mut Environment) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let span = env.halt_time().nanos_since(env.start_at());
        if span <= 1 {
            return;
        }
        for _ in 0..self.config.number_of_requests {
            // Redraw instead of colliding: every arrival lands on a free
            // nanosecond strictly inside the window. Bounded so a window
            // saturated with movements cannot spin forever.
            let at = (0..64)
                .map(|_| rng.random_range(1..span))
                .map(|offset| env.start_at() + Duration::from_nanos(offset as u64))
                .find(|at| !env.time_occupied(*at));
            let Some(at) = at else {
                debug!("no free nanosecond found for an arrival, dropping it");
                continue;
            };
            env.add_to_schedule(Movement::new(
                ARRIVE_AT_ROUTING_STOCK,
                at,
                Rc::clone(&self.source) as StockRef,
                Rc::clone(&self.routing) as StockRef,
            ));
        }
        debug!(
            requests = self.config.number_of_requests,
            "generated uniform random traffic"
        );
    }
}

/// Zero traffic until `step_after`, then a constant rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub rps: u32,
    /// Nanoseconds after the start before the step begins.
    #[serde(default)]
    pub step_after: u64,
}

pub struct Step {
    config: StepConfig,
    source: Rc<TrafficSource>,
    routing: Rc<RequestsRoutingStock>,
}

impl Step {
    pub fn new(
        config: StepConfig,
        source: Rc<TrafficSource>,
        routing: Rc<RequestsRoutingStock>,
    ) -> Self {
        Step {
            config,
            source,
            routing,
        }
    }
}

impl Pattern for Step {
    fn name(&self) -> &'static str {
        "step"
    }

    fn generate(&mut self, env: &mut Environment) {
        let seconds = seconds_in_window(env);
        let first = (self.config.step_after / 1_000_000_000) as u32;
        for second in first..seconds {
            schedule_second(env, &self.source, &self.routing, second, self.config.rps);
        }
    }
}

/// Rate climbing by `delta_v` per second up to `maxima`, then descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampConfig {
    pub delta_v: f64,
    pub maxima: u32,
}

pub struct Ramp {
    config: RampConfig,
    source: Rc<TrafficSource>,
    routing: Rc<RequestsRoutingStock>,
}

impl Ramp {
    pub fn new(
        config: RampConfig,
        source: Rc<TrafficSource>,
        routing: Rc<RequestsRoutingStock>,
    ) -> Self {
        Ramp {
            config,
            source,
            routing,
        }
    }
}

impl Pattern for Ramp {
    fn name(&self) -> &'static str {
        "ramp"
    }

    fn generate(&mut self, env: &mut Environment) {
        let seconds = seconds_in_window(env);
        for second in 0..seconds {
            let from_edge = second.min(seconds.saturating_sub(second + 1));
            let rate = (self.config.delta_v * f64::from(from_edge))
                .min(f64::from(self.config.maxima))
                .floor() as u32;
            schedule_second(env, &self.source, &self.routing, second, rate);
        }
    }
}

/// Rate oscillating between zero and `amplitude` with the given period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinusoidalConfig {
    pub amplitude: f64,
    /// Period of one full oscillation, in nanoseconds.
    pub period: u64,
}

pub struct Sinusoidal {
    config: SinusoidalConfig,
    source: Rc<TrafficSource>,
    routing: Rc<RequestsRoutingStock>,
}

impl Sinusoidal {
    pub fn new(
        config: SinusoidalConfig,
        source: Rc<TrafficSource>,
        routing: Rc<RequestsRoutingStock>,
    ) -> Self {
        Sinusoidal {
            config,
            source,
            routing,
        }
    }
}

impl Pattern for Sinusoidal {
    fn name(&self) -> &'static str {
        "sinusoidal"
    }

    fn generate(&mut self, env: &mut Environment) {
        let seconds = seconds_in_window(env);
        let period_secs = (self.config.period as f64 / 1e9).max(1.0);
        for second in 0..seconds {
            let phase = 2.0 * std::f64::consts::PI * f64::from(second) / period_secs;
            // Starts at zero, peaks at `amplitude` half a period in.
            let rate = (self.config.amplitude / 2.0 * (1.0 - phase.cos())).round() as u32;
            schedule_second(env, &self.source, &self.routing, second, rate);
        }
    }
}

fn seconds_in_window(env: &Environment) -> u32 {
    let span = env.halt_time().nanos_since(env.start_at());
    (span / 1_000_000_000).max(0) as u32
}

/// Spread `rate` arrivals evenly over one second, at interval midpoints so
/// they never land on second boundaries already used by other movements.
fn schedule_second(
    env: &mut Environment,
    source: &Rc<TrafficSource>,
    routing: &Rc<RequestsRoutingStock>,
    second: u32,
    rate: u32,
) {
    if rate == 0 {
        return;
    }
    let interval = 1_000_000_000u64 / u64::from(rate);
    let base = env.start_at() + Duration::from_secs(u64::from(second));
    for i in 0..rate {
        let at = base + Duration::from_nanos(u64::from(i) * interval + interval / 2);
        env.add_to_schedule(Movement::new(
            ARRIVE_AT_ROUTING_STOCK,
            at,
            Rc::clone(source) as StockRef,
            Rc::clone(routing) as StockRef,
        ));
    }
}
