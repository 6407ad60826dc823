//! In-process API tests: the router is exercised with `tower::ServiceExt`
//! oneshot calls against seeded state, no listening socket required.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use setarb_backend::analysis::scoring::apply_strategy;
use setarb_backend::analysis::Orchestrator;
use setarb_backend::api::{create_router, AppState};
use setarb_backend::catalog::CatalogCache;
use setarb_backend::config::Config;
use setarb_backend::market::MarketClient;
use setarb_backend::models::{AnalysisResult, ExecutionMode, ScoredSet, StrategyType};
use setarb_backend::rate_limit::RateLimiter;
use setarb_backend::storage::RunStore;

struct TestApp {
    router: axum::Router,
    store: Arc<RunStore>,
    _catalog_dir: tempfile::TempDir,
}

fn build_app() -> TestApp {
    let config = Arc::new(Config::default());
    let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(1)));
    // Dead upstream: any endpoint that fetches would fail loudly.
    let client = MarketClient::new(
        limiter,
        "http://127.0.0.1:9".to_string(),
        "http://127.0.0.1:9".to_string(),
        Duration::from_millis(100),
    )
    .unwrap();

    let catalog_dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(CatalogCache::new(catalog_dir.path().join("catalog.json")));
    let store = Arc::new(RunStore::new(":memory:").unwrap());
    let orchestrator = Arc::new(Orchestrator::new(
        client,
        catalog.clone(),
        store.clone(),
        2,
        Duration::from_secs(5),
    ));

    let router = create_router(AppState {
        config,
        orchestrator,
        store: store.clone(),
        catalog,
    });

    TestApp {
        router,
        store,
        _catalog_dir: catalog_dir,
    }
}

fn scored_set(slug: &str, margin: f64, volume: f64) -> ScoredSet {
    let mut set = ScoredSet::failed(slug, slug, ExecutionMode::Instant, String::new());
    set.fetch_error = None;
    set.instant_set_price = Some(margin + 70.0);
    set.instant_part_cost = Some(70.0);
    set.instant_profit_margin = Some(margin);
    set.instant_profit_percentage = Some(margin / 70.0 * 100.0);
    set.patient_set_price = Some(margin + 69.0);
    set.patient_part_cost = Some(73.0);
    set.patient_profit_margin = Some(margin - 4.0);
    set.patient_profit_percentage = Some((margin - 4.0) / 73.0 * 100.0);
    set.volume = volume;
    set
}

fn seed_run(store: &RunStore) -> i64 {
    let mut sets = vec![scored_set("alpha_set", 80.0, 120.0), scored_set("beta_set", 15.0, 60.0)];
    let profitable = apply_strategy(&mut sets, StrategyType::Balanced, ExecutionMode::Instant);
    let result = AnalysisResult {
        run_id: None,
        timestamp: Utc::now(),
        strategy: StrategyType::Balanced,
        execution_mode: ExecutionMode::Instant,
        total_sets: sets.len(),
        profitable_sets: profitable,
        sets,
        cached: false,
    };
    store.append(&result).unwrap()
}

async fn get_json(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post_json(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_service_and_version() {
    let app = build_app();
    let (status, body) = get_json(&app.router, "/api/stats/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn strategies_enumerate_all_three_profiles() {
    let app = build_app();
    let (status, body) = get_json(&app.router, "/api/analysis/strategies").await;
    assert_eq!(status, StatusCode::OK);

    let strategies = body["strategies"].as_array().unwrap();
    assert_eq!(strategies.len(), 3);
    let types: Vec<&str> = strategies
        .iter()
        .map(|s| s["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"safe_steady"));
    assert!(types.contains(&"balanced"));
    assert!(types.contains(&"aggressive"));
    assert_eq!(body["default"], "balanced");

    let safe = strategies
        .iter()
        .find(|s| s["type"] == "safe_steady")
        .unwrap();
    assert_eq!(safe["min_volume_threshold"], 50.0);
}

#[tokio::test]
async fn status_endpoint_reports_idle() {
    let app = build_app();
    let (status, body) = get_json(&app.router, "/api/analysis/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert!(body["progress"].is_null());
}

#[tokio::test]
async fn analysis_returns_latest_run_when_present() {
    let app = build_app();
    seed_run(&app.store);

    let (status, body) = get_json(&app.router, "/api/analysis").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_sets"], 2);
    assert_eq!(body["profitable_sets"], 2);
    assert_eq!(body["strategy"], "balanced");
    assert_eq!(body["cached"], true);
    assert_eq!(body["sets"][0]["set_slug"], "alpha_set");
}

#[tokio::test]
async fn analysis_rescoring_latest_when_strategy_differs() {
    let app = build_app();
    seed_run(&app.store);

    let (status, body) = get_json(
        &app.router,
        "/api/analysis?strategy=aggressive&execution_mode=patient",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "aggressive");
    assert_eq!(body["execution_mode"], "patient");
    assert_eq!(body["sets"][0]["profit_margin"], 76.0);
}

#[tokio::test]
async fn invalid_strategy_is_a_bad_request() {
    let app = build_app();
    let (status, body) = get_json(&app.router, "/api/analysis?strategy=reckless").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("reckless"));
}

#[tokio::test]
async fn rescore_requires_existing_data() {
    let app = build_app();
    let (status, body) = post_json(&app.router, "/api/analysis/rescore?strategy=balanced").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn rescore_applies_new_strategy_and_mode() {
    let app = build_app();
    seed_run(&app.store);

    let (status, body) = post_json(
        &app.router,
        "/api/analysis/rescore?strategy=safe_steady&execution_mode=patient",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "safe_steady");
    assert_eq!(body["execution_mode"], "patient");
    // Alpha's patient margin (76 on volume 120) still outranks beta's 11.
    assert_eq!(body["sets"][0]["set_slug"], "alpha_set");
}

#[tokio::test]
async fn trigger_returns_accepted() {
    let app = build_app();
    let (status, body) = post_json(&app.router, "/api/analysis").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "started");
}

#[tokio::test]
async fn history_paginates_newest_first() {
    let app = build_app();
    let first = seed_run(&app.store);
    let second = seed_run(&app.store);

    let (status, body) = get_json(&app.router, "/api/history?page=1&page_size=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_runs"], 2);
    assert_eq!(body["runs"][0]["run_id"], second);

    let (_, page2) = get_json(&app.router, "/api/history?page=2&page_size=1").await;
    assert_eq!(page2["runs"][0]["run_id"], first);
}

#[tokio::test]
async fn run_detail_and_full_analysis_round_trip() {
    let app = build_app();
    let run_id = seed_run(&app.store);

    let (status, detail) = get_json(&app.router, &format!("/api/history/{run_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["run_id"], run_id);
    assert_eq!(detail["summary"]["total_sets"], 2);

    let (status, full) = get_json(&app.router, &format!("/api/history/{run_id}/analysis")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(full["run_id"], run_id);
    assert_eq!(full["sets"].as_array().unwrap().len(), 2);
    assert_eq!(full["sets"][0]["contributions"]["profit"], 80.0);
}

#[tokio::test]
async fn unknown_run_is_404_with_detail_body() {
    let app = build_app();
    let (status, body) = get_json(&app.router, "/api/history/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("999"));

    let (status, _) = get_json(&app.router, "/api/history/999/analysis").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sets_views_cover_list_detail_and_history() {
    let app = build_app();
    seed_run(&app.store);

    let (status, body) = get_json(&app.router, "/api/sets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_sets"], 2);

    let (status, body) = get_json(&app.router, "/api/sets?sort_by=slug&order=desc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sets"][0]["slug"], "beta_set");

    let (status, body) = get_json(&app.router, "/api/sets/alpha_set").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_profit"], 80.0);

    let (status, body) = get_json(&app.router, "/api/sets/alpha_set/history?days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data_points"], 1);

    let (status, _) = get_json(&app.router, "/api/sets/ghost_set").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_and_export_surface_store_contents() {
    let app = build_app();
    seed_run(&app.store);

    let (status, body) = get_json(&app.router, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"]["total_runs"], 1);
    assert_eq!(body["database"]["total_set_records"], 2);

    let (status, body) = get_json(&app.router, "/api/export").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["total_runs"], 1);

    let (status, body) = get_json(&app.router, "/api/export/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["export_available"], true);
    assert_eq!(body["total_records"], 2);
}

#[tokio::test]
async fn export_summary_reports_empty_store() {
    let app = build_app();
    let (status, body) = get_json(&app.router, "/api/export/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["export_available"], false);
    assert_eq!(body["total_runs"], 0);
}
