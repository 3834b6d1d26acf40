//! scalesim - discrete-event simulation of an autoscaled serving cluster.
//!
//! By default runs one scenario and prints the movement trace. With
//! `--listen` it serves the scenario-running HTTP API instead.

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scalesim::config::parse_duration;
use scalesim::model::traffic::UniformConfig;
use scalesim::report::{IgnoredRecord, MovementRecord, RunReport};
use scalesim::{PolicyConfig, ScenarioConfig};

#[derive(Parser, Debug)]
#[command(name = "scalesim")]
#[command(about = "Discrete-event simulation of an autoscaled serving cluster")]
struct Args {
    /// Duration of time to simulate.
    #[arg(long, default_value = "10m", value_parser = parse_duration)]
    duration: Duration,

    /// Tick interval duration of the autoscaler.
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    tick_interval: Duration,

    /// Duration of the stable window of the autoscaler.
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    stable_window: Duration,

    /// Duration of the panic window of the autoscaler.
    #[arg(long, default_value = "6s", value_parser = parse_duration)]
    panic_window: Duration,

    /// Duration of the scale-to-zero grace period of the autoscaler.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    scale_to_zero_grace: Duration,

    /// Default target concurrency of replicas.
    #[arg(long, default_value_t = 1.0)]
    target_concurrency_default: f64,

    /// Percentage adjustment of target concurrency of replicas.
    #[arg(long, default_value_t = 0.5)]
    target_concurrency_percentage: f64,

    /// Maximum rate the autoscaler can raise its desired count.
    #[arg(long, default_value_t = 10.0)]
    max_scale_up_rate: f64,

    /// Time it takes a replica to move from launching to active.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    replica_launch_delay: Duration,

    /// Time it takes a replica to move from terminating to terminated.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    replica_terminate_delay: Duration,

    /// Number of randomly-arriving requests to generate.
    #[arg(long, default_value_t = 10)]
    number_of_requests: u32,

    /// Replicas already desired when the scenario starts.
    #[arg(long, default_value_t = 0)]
    initial_replicas: u32,

    /// Seed for the traffic generator.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Scaling policy: "concurrency" or "fixed".
    #[arg(long, default_value = "concurrency")]
    policy: String,

    /// (fixed policy) Constant replica target.
    #[arg(long, default_value_t = 1)]
    fixed_target: u32,

    /// Serve the HTTP API on this address instead of running once,
    /// e.g. "0.0.0.0:3000".
    #[arg(long)]
    listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn scenario(&self) -> ScenarioConfig {
        ScenarioConfig {
            run_for: self.duration.as_nanos() as u64,
            traffic_pattern: "golang_rand_uniform".to_string(),
            initial_number_of_replicas: self.initial_replicas,
            launch_delay: self.replica_launch_delay.as_nanos() as u64,
            terminate_delay: self.replica_terminate_delay.as_nanos() as u64,
            tick_interval: self.tick_interval.as_nanos() as u64,
            stable_window: self.stable_window.as_nanos() as u64,
            panic_window: self.panic_window.as_nanos() as u64,
            scale_to_zero_grace_period: self.scale_to_zero_grace.as_nanos() as u64,
            target_concurrency: self.target_concurrency_default,
            target_concurrency_percentage: self.target_concurrency_percentage,
            max_scale_up_rate: self.max_scale_up_rate,
            request_timeout_nanos: 1_000_000_000,
            request_cpu_time_millis: 100,
            policy: PolicyConfig {
                policy_type: self.policy.clone(),
                fixed_target: self.fixed_target,
            },
            uniform_config: Some(UniformConfig {
                number_of_requests: self.number_of_requests,
                seed: self.seed,
            }),
            step_config: None,
            ramp_config: None,
            sinusoidal_config: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("scalesim=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if let Some(addr) = &args.listen {
        return serve(addr).await;
    }

    let config = args.scenario();
    config.validate().context("invalid scenario")?;

    let started = Instant::now();
    print!("Running simulation ... ");
    std::io::stdout().flush().ok();
    let report = scalesim::run_scenario(&config).context("could not run the scenario")?;

    report_run(&report, started.elapsed(), args.duration)?;

    if let Some(message) = &report.error {
        eprintln!("there was an error during simulation: {message}");
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(addr: &str) -> Result<()> {
    let metrics_handle = scalesim::telemetry::install();

    let mut app = scalesim::build_router();
    if let Some(handle) = metrics_handle {
        app = app.route(
            "/metrics",
            axum::routing::get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(addr = %addr, "listening for scenario runs");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Trace report
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const BG_GREEN: &str = "\x1b[42m";
const BG_YELLOW: &str = "\x1b[43m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";

fn report_run(report: &RunReport, wall: Duration, simulated: Duration) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(
        out,
        "{BOLD}Done.{RESET}      {BG_GREEN}Completed movements{RESET} {BOLD}{}{RESET}  \
         {BG_YELLOW}Ignored movements{RESET} {BOLD}{}{RESET}  \
         {CYAN}Running time:{RESET} {:?}    {CYAN}Simulated time:{RESET} {:?}\n",
        report.completed.len(),
        report.ignored.len(),
        wall,
        simulated,
    )?;

    writeln!(
        out,
        "{BOLD}{BG_GREEN}{:>20}  {:<24} {:<14} {:<34} ⟶   {:<34}  {:<58}{RESET}",
        "Time (ns)", "Movement Name", "Entity Name", "From Stock", "To Stock", "Notes"
    )?;
    for movement in &report.completed {
        writeln!(out, "{}", completed_line(movement))?;
    }

    writeln!(
        out,
        "\n{BOLD}{BG_YELLOW}{:>20}  {:<24} {:<14} {:<34} ⟶   {:<34}  {:<28} {:<29}{RESET}",
        "Time (ns)", "Movement Name", "Entity Name", "From Stock", "To Stock", "Notes", "Reason Ignored"
    )?;
    for movement in &report.ignored {
        writeln!(out, "{}", ignored_line(movement))?;
    }

    Ok(())
}

fn completed_line(movement: &MovementRecord) -> String {
    format!(
        "{:>20}  {:<24} {:<14} {:<34} ⟶   {:<34}  {}",
        movement.occurs_at,
        movement.kind,
        movement.moved.as_deref().unwrap_or("<nil>"),
        movement.from_stock,
        movement.to_stock,
        join_notes(&movement.notes),
    )
}

fn ignored_line(movement: &IgnoredRecord) -> String {
    let color = match movement.reason.as_str() {
        "OccursInPast" => RED,
        "OccursAfterHalt" => MAGENTA,
        "OccursSimultaneouslyWithAnotherMovement" => CYAN,
        _ => YELLOW,
    };
    format!(
        "{:>20}  {:<24} {:<14} {:<34} ⟶   {:<34}  {:<28} {color}{}{RESET}",
        movement.occurs_at,
        movement.kind,
        "-",
        movement.from_stock,
        movement.to_stock,
        join_notes(&movement.notes),
        movement.reason,
    )
}

fn join_notes(notes: &[String]) -> String {
    notes.join(&format!("\n{:137}", ""))
}
