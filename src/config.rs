//! Scenario configuration.
//!
//! This is the wire format accepted by `POST /run` and assembled by the CLI.
//! Durations cross the JSON boundary as integer nanoseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::request::RequestBehavior;
use crate::model::traffic::{RampConfig, SinusoidalConfig, StepConfig, UniformConfig};
use crate::model::{AutoscalerSettings, ClusterSettings};
use crate::policy::{ConcurrencyPolicy, ConcurrencySettings, FixedPolicy, ScalingPolicy};

/// Configuration problems reported before a simulation starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("run_for must be positive")]
    ZeroRunFor,

    #[error("tick_interval must be positive")]
    ZeroTickInterval,

    #[error("unknown traffic pattern: {0}")]
    UnknownTrafficPattern(String),

    #[error("traffic pattern '{pattern}' requires {missing}")]
    MissingPatternConfig {
        pattern: &'static str,
        missing: &'static str,
    },

    #[error("unknown policy type: {0}")]
    UnknownPolicyType(String),
}

/// One simulation scenario: the run window, the cluster and autoscaler
/// knobs, the request profile, and a traffic shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Simulated duration, in nanoseconds.
    pub run_for: u64,

    #[serde(default = "default_traffic_pattern")]
    pub traffic_pattern: String,

    #[serde(default)]
    pub initial_number_of_replicas: u32,

    /// Time for a replica to go from launching to active, in nanoseconds.
    #[serde(default = "default_launch_delay")]
    pub launch_delay: u64,

    /// Time for a replica to go from terminating to terminated, in
    /// nanoseconds.
    #[serde(default = "default_terminate_delay")]
    pub terminate_delay: u64,

    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,

    #[serde(default = "default_stable_window")]
    pub stable_window: u64,

    #[serde(default = "default_panic_window")]
    pub panic_window: u64,

    #[serde(default = "default_scale_to_zero_grace_period")]
    pub scale_to_zero_grace_period: u64,

    #[serde(default = "default_target_concurrency")]
    pub target_concurrency: f64,

    #[serde(default = "default_target_concurrency_percentage")]
    pub target_concurrency_percentage: f64,

    #[serde(default = "default_max_scale_up_rate")]
    pub max_scale_up_rate: f64,

    #[serde(default = "default_request_timeout_nanos")]
    pub request_timeout_nanos: u64,

    #[serde(default = "default_request_cpu_time_millis")]
    pub request_cpu_time_millis: u64,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform_config: Option<UniformConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_config: Option<StepConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_config: Option<RampConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sinusoidal_config: Option<SinusoidalConfig>,
}

fn default_traffic_pattern() -> String {
    "golang_rand_uniform".to_string()
}

fn default_launch_delay() -> u64 {
    1_000_000_000
}

fn default_terminate_delay() -> u64 {
    1_000_000_000
}

fn default_tick_interval() -> u64 {
    2_000_000_000
}

fn default_stable_window() -> u64 {
    60_000_000_000
}

fn default_panic_window() -> u64 {
    6_000_000_000
}

fn default_scale_to_zero_grace_period() -> u64 {
    30_000_000_000
}

fn default_target_concurrency() -> f64 {
    1.0
}

fn default_target_concurrency_percentage() -> f64 {
    0.5
}

fn default_max_scale_up_rate() -> f64 {
    10.0
}

fn default_request_timeout_nanos() -> u64 {
    1_000_000_000
}

fn default_request_cpu_time_millis() -> u64 {
    100
}

impl ScenarioConfig {
    /// Check the scenario before handing it to the kernel. Invalid input
    /// never reaches the simulation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_for == 0 {
            return Err(ConfigError::ZeroRunFor);
        }
        if self.tick_interval == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        match self.traffic_pattern.as_str() {
            "golang_rand_uniform" => {
                if self.uniform_config.is_none() {
                    return Err(ConfigError::MissingPatternConfig {
                        pattern: "golang_rand_uniform",
                        missing: "uniform_config",
                    });
                }
            }
            "step" => {
                if self.step_config.is_none() {
                    return Err(ConfigError::MissingPatternConfig {
                        pattern: "step",
                        missing: "step_config",
                    });
                }
            }
            "ramp" => {
                if self.ramp_config.is_none() {
                    return Err(ConfigError::MissingPatternConfig {
                        pattern: "ramp",
                        missing: "ramp_config",
                    });
                }
            }
            "sinusoidal" => {
                if self.sinusoidal_config.is_none() {
                    return Err(ConfigError::MissingPatternConfig {
                        pattern: "sinusoidal",
                        missing: "sinusoidal_config",
                    });
                }
            }
            other => return Err(ConfigError::UnknownTrafficPattern(other.to_string())),
        }
        self.policy.validate()
    }

    pub fn run_for(&self) -> Duration {
        Duration::from_nanos(self.run_for)
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            launch_delay: Duration::from_nanos(self.launch_delay),
            terminate_delay: Duration::from_nanos(self.terminate_delay),
            initial_replicas: self.initial_number_of_replicas,
            request_behavior: self.request_behavior(),
        }
    }

    pub fn autoscaler_settings(&self) -> AutoscalerSettings {
        AutoscalerSettings {
            tick_interval: Duration::from_nanos(self.tick_interval),
        }
    }

    pub fn concurrency_settings(&self) -> ConcurrencySettings {
        ConcurrencySettings {
            stable_window: Duration::from_nanos(self.stable_window),
            panic_window: Duration::from_nanos(self.panic_window),
            scale_to_zero_grace: Duration::from_nanos(self.scale_to_zero_grace_period),
            target_concurrency_default: self.target_concurrency,
            target_concurrency_percentage: self.target_concurrency_percentage,
            max_scale_up_rate: self.max_scale_up_rate,
        }
    }

    pub fn request_behavior(&self) -> RequestBehavior {
        RequestBehavior {
            cpu_time: Duration::from_millis(self.request_cpu_time_millis),
            timeout: Duration::from_nanos(self.request_timeout_nanos),
        }
    }
}

/// Which scaling policy to run behind the C8 boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy type: "concurrency" (default) or "fixed".
    #[serde(default = "default_policy_type")]
    pub policy_type: String,

    /// (fixed) The constant replica target.
    #[serde(default = "default_fixed_target")]
    pub fixed_target: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            policy_type: default_policy_type(),
            fixed_target: default_fixed_target(),
        }
    }
}

fn default_policy_type() -> String {
    "concurrency".to_string()
}

fn default_fixed_target() -> u32 {
    1
}

impl PolicyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.policy_type.as_str() {
            "concurrency" | "fixed" => Ok(()),
            other => Err(ConfigError::UnknownPolicyType(other.to_string())),
        }
    }

    /// Build the policy behind the boundary.
    pub fn build_policy(&self, settings: ConcurrencySettings) -> Box<dyn ScalingPolicy> {
        match self.policy_type.as_str() {
            "fixed" => Box::new(FixedPolicy::new(self.fixed_target)),
            _ => Box::new(ConcurrencyPolicy::new(settings)),
        }
    }
}

/// Parse durations like "10m", "90s", "500ms", or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let parse = |digits: &str, unit: &str| -> Result<u64, String> {
        digits
            .parse::<u64>()
            .map_err(|_| format!("invalid duration '{s}': bad {unit} count"))
    };
    if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(parse(ms, "millisecond")?))
    } else if let Some(mins) = s.strip_suffix('m') {
        Ok(Duration::from_secs(parse(mins, "minute")? * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        Ok(Duration::from_secs(parse(hours, "hour")? * 3600))
    } else if let Some(secs) = s.strip_suffix('s') {
        Ok(Duration::from_secs(parse(secs, "second")?))
    } else {
        Ok(Duration::from_secs(parse(s, "second")?))
    }
}
