//! # scalesim
//!
//! Discrete-event simulator for an autoscaled request-serving cluster.
//!
//! A scenario is a stock-and-flow graph: typed stocks hold entities
//! (requests, replicas, desired-replica tokens), and time-stamped movements
//! transfer entities between them. The kernel executes movements in strict
//! time order; stock hooks run inside the loop and schedule the follow-on
//! movements that make the cluster tick.
//!
//! ```text
//! TrafficSource ──arrive──▶ RequestsRouting ──send──▶ RequestsProcessing [n]
//!                                 │                      │        │
//!                                 ▼                      ▼        ▼
//!                           RequestsFailed      RequestsComplete  (interrupts)
//!
//! DesiredSource ──increase──▶ Desired ──▶ Launching ──▶ Active ──▶ Terminating
//!        ▲                                                            │
//!   autoscaler_tick ◀── policy (event / stat / scale)            Terminated
//! ```
//!
//! The CLI runs one scenario and prints the trace; the HTTP surface runs
//! scenarios on demand and returns derived metrics from the SQLite store.

pub mod config;
pub mod model;
pub mod policy;
pub mod report;
pub mod server;
pub mod simulator;
pub mod store;
pub mod telemetry;

pub use config::{ConfigError, PolicyConfig, ScenarioConfig};
pub use report::RunReport;
pub use server::build_router;

use std::rc::Rc;

use tracing::info;

use crate::model::traffic::{Pattern, Ramp, Sinusoidal, Step, UniformRandom};
use crate::model::{AutoscalerModel, ClusterModel};
use crate::simulator::{Environment, SimTime};

/// Build and run one scenario to completion.
///
/// Synchronous and single-threaded: callers on an async runtime should wrap
/// this in `tokio::task::spawn_blocking`. A fatal simulation error does not
/// fail the call; it is carried in [`RunReport::error`] next to the partial
/// traces.
pub fn run_scenario(config: &ScenarioConfig) -> Result<RunReport, ConfigError> {
    config.validate()?;

    let policy = config.policy.build_policy(config.concurrency_settings());
    let mut env = Environment::new(SimTime::ORIGIN, config.run_for(), policy);

    let cluster = ClusterModel::new(&mut env, &config.cluster_settings());
    let _autoscaler = AutoscalerModel::new(&mut env, Rc::clone(&cluster), &config.autoscaler_settings());

    let source = Rc::clone(cluster.traffic_source());
    let routing = Rc::clone(cluster.routing());
    let mut pattern: Box<dyn Pattern> = match config.traffic_pattern.as_str() {
        "step" => Box::new(Step::new(
            config
                .step_config
                .clone()
                .ok_or(ConfigError::MissingPatternConfig {
                    pattern: "step",
                    missing: "step_config",
                })?,
            source,
            routing,
        )),
        "ramp" => Box::new(Ramp::new(
            config
                .ramp_config
                .clone()
                .ok_or(ConfigError::MissingPatternConfig {
                    pattern: "ramp",
                    missing: "ramp_config",
                })?,
            source,
            routing,
        )),
        "sinusoidal" => Box::new(Sinusoidal::new(
            config
                .sinusoidal_config
                .clone()
                .ok_or(ConfigError::MissingPatternConfig {
                    pattern: "sinusoidal",
                    missing: "sinusoidal_config",
                })?,
            source,
            routing,
        )),
        _ => Box::new(UniformRandom::new(
            config
                .uniform_config
                .clone()
                .ok_or(ConfigError::MissingPatternConfig {
                    pattern: "golang_rand_uniform",
                    missing: "uniform_config",
                })?,
            source,
            routing,
        )),
    };
    pattern.generate(&mut env);

    info!(
        traffic_pattern = pattern.name(),
        pending = env.pending(),
        "scenario ready"
    );

    let traffic_pattern = pattern.name();
    let outcome = env.run();
    Ok(RunReport::from_outcome(
        traffic_pattern,
        config.run_for,
        outcome,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::traffic::UniformConfig;

    fn scenario() -> ScenarioConfig {
        serde_json::from_str(
            r#"{
                "run_for": 10000000000,
                "initial_number_of_replicas": 1,
                "policy": { "policy_type": "fixed", "fixed_target": 1 },
                "uniform_config": { "number_of_requests": 5 }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn runs_a_small_scenario_end_to_end() {
        // Step traffic keeps arrivals clear of the halt, so every request
        // finishes: 1 rps over seconds 2..10.
        let mut config = scenario();
        config.traffic_pattern = "step".to_string();
        config.step_config = Some(crate::model::traffic::StepConfig {
            rps: 1,
            step_after: 2_000_000_000,
        });
        let report = run_scenario(&config).unwrap();

        assert!(report.error.is_none(), "fatal: {:?}", report.error);
        assert_eq!(report.traffic_pattern, "step");
        assert!(
            report
                .completed
                .iter()
                .any(|m| m.kind == "start_to_running")
        );
        assert!(
            report
                .completed
                .iter()
                .any(|m| m.kind == "running_to_halted")
        );
        // With a warm replica every request finishes.
        let completions = report
            .completed
            .iter()
            .filter(|m| m.kind == "complete_request")
            .count();
        assert_eq!(completions, 8);
    }

    #[test]
    fn identical_scenarios_produce_identical_traces() {
        let config = scenario();
        let first = run_scenario(&config).unwrap();
        let second = run_scenario(&config).unwrap();

        let render = |report: &RunReport| {
            report
                .completed
                .iter()
                .map(|m| {
                    format!(
                        "{} {} {:?} {} {}",
                        m.occurs_at, m.kind, m.moved, m.from_stock, m.to_stock
                    )
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&first), render(&second));
    }

    #[test]
    fn invalid_scenarios_never_reach_the_kernel() {
        let mut config = scenario();
        config.uniform_config = None;
        assert!(matches!(
            run_scenario(&config),
            Err(ConfigError::MissingPatternConfig { .. })
        ));
    }

    #[test]
    fn zero_requests_generate_no_arrivals() {
        let mut config = scenario();
        config.uniform_config = Some(UniformConfig {
            number_of_requests: 0,
            seed: 1,
        });
        let report = run_scenario(&config).unwrap();
        assert_eq!(
            report
                .completed
                .iter()
                .filter(|m| m.kind == "arrive_at_routing_stock")
                .count(),
            0
        );
    }
}
