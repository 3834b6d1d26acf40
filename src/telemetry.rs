//! Prometheus metrics setup and descriptions.
//!
//! Metrics are recorded with the `metrics` crate's macros at the call sites;
//! this module installs the Prometheus exporter and registers descriptions.
//! Only server mode installs a recorder; the one-shot CLI has nowhere to
//! scrape from.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder and register metric descriptions.
///
/// Returns `None` if a recorder is already installed (e.g. in tests where
/// several routers share a process). Recording still works; the macros
/// route to whichever recorder won.
pub fn install() -> Option<PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .ok()?;
    describe();
    Some(handle)
}

fn describe() {
    describe_counter!("scalesim_runs_total", "Simulation runs started");
    describe_counter!(
        "scalesim_runs_failed_total",
        "Simulation runs that ended on a fatal error"
    );
    describe_histogram!(
        "scalesim_run_duration_seconds",
        "Wall-clock time spent driving one simulation"
    );
    describe_histogram!(
        "scalesim_movements_completed",
        "Completed movements per run"
    );
    describe_histogram!("scalesim_movements_ignored", "Ignored movements per run");
}
