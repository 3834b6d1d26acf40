//! End-to-end tests for the HTTP surface: drive the router directly with
//! `tower::ServiceExt::oneshot`, no sockets involved.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn post_run(body: Value) -> (StatusCode, Value) {
    let app = scalesim::build_router();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/run")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn healthz_responds() {
    let app = scalesim::build_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn run_returns_derived_metrics() {
    // Step traffic: 2 rps over seconds 2..10, every arrival mid-second, so
    // all 16 requests complete well before the halt.
    let (status, body) = post_run(json!({
        "run_for": 10_000_000_000u64,
        "traffic_pattern": "step",
        "initial_number_of_replicas": 1,
        "policy": { "policy_type": "fixed", "fixed_target": 1 },
        "step_config": { "rps": 2, "step_after": 2_000_000_000u64 }
    }))
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["ran_for"], 10_000_000_000u64);
    assert_eq!(body["traffic_pattern"], "step");

    let tally_lines = body["tally_lines"].as_array().unwrap();
    assert!(!tally_lines.is_empty());
    assert!(
        tally_lines
            .iter()
            .any(|line| line["stock_name"] == "RequestsRouting")
    );

    let response_times = body["response_times"].as_array().unwrap();
    assert_eq!(response_times.len(), 16);
    assert!(
        response_times
            .iter()
            .all(|rt| rt["response_time"].as_i64().unwrap() > 0)
    );

    let rps = body["requests_per_second"].as_array().unwrap();
    let total: i64 = rps.iter().map(|r| r["requests"].as_i64().unwrap()).sum();
    assert_eq!(total, 16);
}

#[tokio::test]
async fn uniform_traffic_runs_over_http() {
    let (status, body) = post_run(json!({
        "run_for": 10_000_000_000u64,
        "traffic_pattern": "golang_rand_uniform",
        "initial_number_of_replicas": 1,
        "policy": { "policy_type": "fixed", "fixed_target": 1 },
        "uniform_config": { "number_of_requests": 3, "seed": 42 }
    }))
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["traffic_pattern"], "golang_rand_uniform");
    // Arrivals near the halt may not finish; everything that did is timed.
    let response_times = body["response_times"].as_array().unwrap();
    assert!(response_times.len() <= 3);
    assert!(!response_times.is_empty());
}

#[tokio::test]
async fn run_reports_cpu_utilization_samples() {
    let (status, body) = post_run(json!({
        "run_for": 10_000_000_000u64,
        "traffic_pattern": "step",
        "initial_number_of_replicas": 1,
        "tick_interval": 2_000_000_000u64,
        "policy": { "policy_type": "fixed", "fixed_target": 1 },
        "step_config": { "rps": 2, "step_after": 2_000_000_000u64 }
    }))
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    let samples = body["cpu_utilizations"].as_array().unwrap();
    assert!(!samples.is_empty());
    for sample in samples {
        let value = sample["cpu_utilization"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&value), "utilization {value}");
    }
}

#[tokio::test]
async fn invalid_configuration_is_a_client_error() {
    let (status, body) = post_run(json!({
        "run_for": 0
    }))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("run_for must be positive")
    );
}

#[tokio::test]
async fn unknown_traffic_pattern_is_a_client_error() {
    let (status, body) = post_run(json!({
        "run_for": 1_000_000_000u64,
        "traffic_pattern": "avalanche"
    }))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("avalanche"));
}
