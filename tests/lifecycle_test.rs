//! Tests for the model lifecycle coordinator — dedup, polling, metrics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use sleipnir::{LoadError, LoadOptions, ModelCoordinator, SleipnirError, SwitchOptions};

/// Listing that flips from empty to containing `model` once the shared
/// flag is set (by the load responder).
struct ListingResponder {
    loaded: Arc<AtomicBool>,
    model: &'static str,
    calls: Arc<AtomicU32>,
}

impl Respond for ListingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.loaded.load(Ordering::SeqCst) {
            ResponseTemplate::new(200).set_body_json(json!([{ "name": self.model }]))
        } else {
            ResponseTemplate::new(200).set_body_json(json!([]))
        }
    }
}

/// Admin load endpoint that marks the model loaded and counts calls.
struct LoadResponder {
    loaded: Arc<AtomicBool>,
    calls: Arc<AtomicU32>,
}

impl Respond for LoadResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.loaded.store(true, Ordering::SeqCst);
        ResponseTemplate::new(200)
    }
}

fn fast_opts(admin_url: Option<String>) -> LoadOptions {
    let opts = LoadOptions::new()
        .poll_interval(Duration::from_millis(5))
        .timeout(Duration::from_secs(2));
    match admin_url {
        Some(url) => opts.admin_url(url),
        None => opts,
    }
}

#[tokio::test]
async fn already_listed_model_needs_no_admin_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "name": "m1" }])))
        .mount(&server)
        .await;
    // No POST mock mounted: an admin call would 404 and fail the test.

    let coordinator = ModelCoordinator::new();
    coordinator
        .ensure_model_loaded("m1", &server.uri(), &fast_opts(Some(server.uri())))
        .await
        .unwrap();
    assert!(coordinator.is_recorded_loaded("m1", &server.uri()));
}

#[tokio::test]
async fn concurrent_callers_share_one_load() {
    let server = MockServer::start().await;
    let loaded = Arc::new(AtomicBool::new(false));
    let load_calls = Arc::new(AtomicU32::new(0));

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ListingResponder {
            loaded: loaded.clone(),
            model: "m1",
            calls: Arc::new(AtomicU32::new(0)),
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/load"))
        .and(body_json(json!({ "model": "m1" })))
        .respond_with(LoadResponder {
            loaded: loaded.clone(),
            calls: load_calls.clone(),
        })
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let opts = fast_opts(Some(server.uri()));
    let base_url = server.uri();

    let results = join_all(
        (0..5).map(|_| coordinator.ensure_model_loaded("m1", &base_url, &opts)),
    )
    .await;

    for result in results {
        result.unwrap();
    }
    // The critical guarantee: one underlying load for five callers.
    assert_eq!(load_calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.metrics().load_attempts, 1);
}

#[tokio::test]
async fn load_record_skips_network_on_second_call() {
    let server = MockServer::start().await;
    let listing_calls = Arc::new(AtomicU32::new(0));
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ListingResponder {
            loaded: Arc::new(AtomicBool::new(true)),
            model: "m1",
            calls: listing_calls.clone(),
        })
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let opts = fast_opts(None);
    coordinator
        .ensure_model_loaded("m1", &server.uri(), &opts)
        .await
        .unwrap();
    coordinator
        .ensure_model_loaded("m1", &server.uri(), &opts)
        .await
        .unwrap();

    assert_eq!(listing_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn absent_model_without_admin_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let result = coordinator
        .ensure_model_loaded("m1", &server.uri(), &fast_opts(None))
        .await;
    assert!(matches!(
        result,
        Err(SleipnirError::Load(LoadError::NoAdmin { .. }))
    ));
}

#[tokio::test]
async fn load_times_out_when_model_never_appears() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/load"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let opts = LoadOptions::new()
        .admin_url(server.uri())
        .poll_interval(Duration::from_millis(5))
        .timeout(Duration::from_millis(50));

    let result = coordinator
        .ensure_model_loaded("m1", &server.uri(), &opts)
        .await;
    match result {
        Err(SleipnirError::Load(LoadError::Timeout { model, timeout_ms, .. })) => {
            assert_eq!(model, "m1");
            assert_eq!(timeout_ms, 50);
        }
        other => panic!("expected load timeout, got {other:?}"),
    }
    assert_eq!(coordinator.metrics().load_failures, 1);
}

#[tokio::test]
async fn hung_listing_is_bounded_by_the_load_budget() {
    let server = MockServer::start().await;
    // The listing itself hangs, so the poll-loop deadline alone would
    // never be consulted.
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let opts = LoadOptions::new()
        .admin_url(server.uri())
        .poll_interval(Duration::from_millis(5))
        .timeout(Duration::from_millis(60));

    let start = Instant::now();
    let result = coordinator
        .ensure_model_loaded("m1", &server.uri(), &opts)
        .await;

    assert!(matches!(
        result,
        Err(SleipnirError::Load(LoadError::Timeout { .. }))
    ));
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "caller must not wait out the hung call"
    );
}

#[tokio::test]
async fn record_age_tracks_and_invalidate_forces_recheck() {
    let server = MockServer::start().await;
    let listing_calls = Arc::new(AtomicU32::new(0));
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ListingResponder {
            loaded: Arc::new(AtomicBool::new(true)),
            model: "m1",
            calls: listing_calls.clone(),
        })
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let opts = fast_opts(None);
    assert_eq!(coordinator.record_age("m1", &server.uri()), None);

    coordinator
        .ensure_model_loaded("m1", &server.uri(), &opts)
        .await
        .unwrap();
    let age = coordinator.record_age("m1", &server.uri()).unwrap();
    assert!(age < Duration::from_secs(5));

    coordinator.invalidate("m1", &server.uri());
    assert_eq!(coordinator.record_age("m1", &server.uri()), None);
    assert!(!coordinator.is_recorded_loaded("m1", &server.uri()));

    // With the record gone, the next ensure goes back to the listing.
    coordinator
        .ensure_model_loaded("m1", &server.uri(), &opts)
        .await
        .unwrap();
    assert_eq!(listing_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_load_is_not_cached() {
    let server = MockServer::start().await;
    let loaded = Arc::new(AtomicBool::new(false));
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ListingResponder {
            loaded: loaded.clone(),
            model: "m1",
            calls: Arc::new(AtomicU32::new(0)),
        })
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let result = coordinator
        .ensure_model_loaded("m1", &server.uri(), &fast_opts(None))
        .await;
    assert!(result.is_err());
    assert!(!coordinator.is_recorded_loaded("m1", &server.uri()));

    // Target comes up with the model; a fresh attempt starts over.
    loaded.store(true, Ordering::SeqCst);
    coordinator
        .ensure_model_loaded("m1", &server.uri(), &fast_opts(None))
        .await
        .unwrap();
}

#[tokio::test]
async fn request_load_reports_admin_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/load"))
        .and(body_json(json!({ "model": "good" })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/load"))
        .and(body_json(json!({ "model": "bad" })))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    assert!(coordinator.request_model_load("good", &server.uri()).await);
    assert!(!coordinator.request_model_load("bad", &server.uri()).await);

    let metrics = coordinator.metrics();
    assert_eq!(metrics.load_attempts, 2);
    assert_eq!(metrics.load_successes, 1);
    assert_eq!(metrics.load_failures, 1);
}

#[tokio::test]
async fn unload_invalidates_load_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "name": "m1" }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/unload"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    coordinator
        .ensure_model_loaded("m1", &server.uri(), &fast_opts(None))
        .await
        .unwrap();
    assert!(coordinator.is_recorded_loaded("m1", &server.uri()));

    assert!(coordinator.request_model_unload("m1", &server.uri()).await);
    assert!(!coordinator.is_recorded_loaded("m1", &server.uri()));

    let metrics = coordinator.metrics();
    assert_eq!(metrics.unload_attempts, 1);
    assert_eq!(metrics.unload_successes, 1);
}

#[tokio::test]
async fn switch_loads_then_unloads_previous() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "name": "new" }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/unload"))
        .and(body_json(json!({ "model": "old" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let opts = SwitchOptions::new(server.uri())
        .unload_previous("old")
        .poll_interval(Duration::from_millis(5));

    coordinator
        .request_model_switch("new", &server.uri(), &opts)
        .await
        .unwrap();

    let metrics = coordinator.metrics();
    assert_eq!(metrics.switch_attempts, 1);
    assert_eq!(metrics.switch_successes, 1);
    assert_eq!(metrics.unload_attempts, 1);
}

#[tokio::test]
async fn failed_switch_never_unloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/load"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/unload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    let opts = SwitchOptions::new(server.uri())
        .unload_previous("old")
        .poll_interval(Duration::from_millis(5))
        .timeout(Duration::from_millis(40));

    let result = coordinator
        .request_model_switch("new", &server.uri(), &opts)
        .await;
    assert!(matches!(
        result,
        Err(SleipnirError::Load(LoadError::Timeout { .. }))
    ));

    let metrics = coordinator.metrics();
    assert_eq!(metrics.switch_attempts, 1);
    assert_eq!(metrics.switch_failures, 1);
    assert_eq!(metrics.unload_attempts, 0);
}

#[tokio::test]
async fn latency_percentiles_computed_from_samples() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/load"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let coordinator = ModelCoordinator::new();
    for _ in 0..10 {
        coordinator.request_model_load("m1", &server.uri()).await;
    }

    let metrics = coordinator.metrics();
    assert_eq!(metrics.load_attempts, 10);
    let p95 = metrics.p95(sleipnir::OpClass::Load).unwrap();
    let p99 = metrics.p99(sleipnir::OpClass::Load).unwrap();
    assert!(p95 > 0.0);
    assert!(p99 >= p95);
}
