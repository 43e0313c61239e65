// tests/filters_http.rs
//
// Filter endpoints and /health, exercised in-process via tower::ServiceExt::oneshot.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt as _;

use async_trait::async_trait;
use news_router::articles::Article;
use news_router::config::Settings;
use news_router::query::fallback::FallbackClassifier;
use news_router::query::llm::{DisabledProvider, QueryAnalyzer};
use news_router::store::{InMemoryArticleStore, NewsFilters};
use news_router::{router, AppState};

fn test_router() -> Router {
    let store = InMemoryArticleStore::load_from_file("data/articles.json").expect("sample articles");
    let analyzer = QueryAnalyzer::new(
        Arc::new(DisabledProvider),
        FallbackClassifier::default(),
        Duration::from_secs(1),
    );
    router(AppState::new(Settings::default(), Arc::new(store), analyzer).expect("state"))
}

async fn get(uri: &str) -> (StatusCode, Value) {
    let resp = test_router()
        .oneshot(Request::get(uri).body(Body::empty()).expect("build GET"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.expect("read body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

fn scores(v: &Value) -> Vec<f64> {
    v["articles"]
        .as_array()
        .expect("articles")
        .iter()
        .map(|a| a["relevance_score"].as_f64().unwrap())
        .collect()
}

#[tokio::test]
async fn health_reports_status_and_version() {
    let (status, v) = get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "ok");
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(v["llm_provider"], "disabled");
    assert_eq!(v["analysis_cache"]["enabled"], true);
    assert_eq!(v["analysis_cache"]["entries"], 0);
    assert!(v["timestamp"].is_string());
}

#[tokio::test]
async fn root_lists_service_endpoints() {
    let (status, v) = get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["service"], env!("CARGO_PKG_NAME"));
    assert_eq!(v["endpoints"]["smart_query"], "POST /api/v1/news/query");
    assert_eq!(v["endpoints"].as_object().unwrap().len(), 8);
}

#[tokio::test]
async fn every_response_carries_process_time() {
    for uri in ["/health", "/api/v1/news/score?min_score=0.5", "/api/v1/news/nearby?lat=95&lon=0"] {
        let resp = test_router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let header = resp
            .headers()
            .get(news_router::api::PROCESS_TIME_HEADER)
            .unwrap_or_else(|| panic!("no process time on {uri}"));
        let secs: f64 = header.to_str().unwrap().parse().unwrap();
        assert!(secs >= 0.0, "{uri}: {secs}");
    }
}

struct PanickingStore;

#[async_trait]
impl NewsFilters for PanickingStore {
    async fn category(&self, _: &str, _: usize) -> anyhow::Result<Vec<Article>> {
        panic!("index corrupted")
    }
    async fn search(&self, _: &str, _: usize) -> anyhow::Result<Vec<Article>> {
        panic!("index corrupted")
    }
    async fn source(&self, _: &str, _: usize) -> anyhow::Result<Vec<Article>> {
        panic!("index corrupted")
    }
    async fn score(&self, _: f64, _: usize) -> anyhow::Result<Vec<Article>> {
        panic!("index corrupted")
    }
    async fn nearby(&self, _: f64, _: f64, _: f64, _: usize) -> anyhow::Result<Vec<Article>> {
        panic!("index corrupted")
    }
}

#[tokio::test]
async fn handler_panic_becomes_internal_error() {
    let analyzer = QueryAnalyzer::new(
        Arc::new(DisabledProvider),
        FallbackClassifier::default(),
        Duration::from_secs(1),
    );
    let app = router(AppState::new(Settings::default(), Arc::new(PanickingStore), analyzer).unwrap());
    let resp = app
        .oneshot(Request::get("/api/v1/news/category?category=sports").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["error"], "internal_error");
    assert!(!v["message"].as_str().unwrap().contains("corrupted"));
}

#[tokio::test]
async fn score_zero_returns_every_article() {
    let (status, v) = get("/api/v1/news/score?min_score=0.0&limit=100").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["total"], 12);
    let s = scores(&v);
    assert!(s.windows(2).all(|w| w[0] >= w[1]), "not sorted: {s:?}");
}

#[tokio::test]
async fn score_one_returns_only_perfect_articles() {
    let (status, v) = get("/api/v1/news/score?min_score=1.0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scores(&v), vec![1.0]);
    assert_eq!(v["min_score"], 1.0);
}

#[tokio::test]
async fn score_out_of_range_is_rejected() {
    for uri in [
        "/api/v1/news/score?min_score=1.5",
        "/api/v1/news/score?min_score=-0.1",
        "/api/v1/news/score?min_score=abc",
    ] {
        let (status, v) = get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(v["error"], "validation_error");
    }
}

#[tokio::test]
async fn category_is_case_insensitive_and_newest_first() {
    let (status, v) = get("/api/v1/news/category?category=Technology").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = v["articles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a1f0c2d4-0001", "a1f0c2d4-0002", "a1f0c2d4-0008", "a1f0c2d4-0010"]);
    assert_eq!(v["limit"], 20);
}

#[tokio::test]
async fn missing_required_filter_parameter_is_reported() {
    let (status, v) = get("/api/v1/news/category").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "missing_required_parameter");

    let (status, _) = get("/api/v1/news/search?query=%20%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn limit_is_clamped_into_range() {
    let (_, v) = get("/api/v1/news/score?min_score=0.0&limit=0").await;
    assert_eq!(v["limit"], 1);
    assert_eq!(v["total"], 1);

    let (_, v) = get("/api/v1/news/score?min_score=0.0&limit=5000").await;
    assert_eq!(v["limit"], 100);
}

#[tokio::test]
async fn search_matches_title_or_description() {
    let (status, v) = get("/api/v1/news/search?query=technology").await;
    assert_eq!(status, StatusCode::OK);
    for a in v["articles"].as_array().unwrap() {
        let text = format!("{} {}", a["title"], a["description"]).to_lowercase();
        assert!(text.contains("technology"));
    }
    assert_eq!(v["query"], "technology");
}

#[tokio::test]
async fn source_matches_partially() {
    let (status, v) = get("/api/v1/news/source?source=york").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["total"], 2);
    for a in v["articles"].as_array().unwrap() {
        assert_eq!(a["source_name"], "New York Times");
    }
}

#[tokio::test]
async fn nearby_validates_coordinates_and_radius() {
    let (status, v) = get("/api/v1/news/nearby?lat=40.7128&lon=-74.0060&radius_km=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["radius_km"], 5.0);
    assert_eq!(v["location"]["lat"], 40.7128);

    for uri in [
        "/api/v1/news/nearby?lat=95&lon=0",
        "/api/v1/news/nearby?lat=10&lon=0&radius_km=0",
        "/api/v1/news/nearby?lat=10&lon=0&radius_km=1500",
    ] {
        let (status, v) = get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(v["error"], "validation_error");
    }

    let (status, v) = get("/api/v1/news/nearby?lat=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "missing_required_parameter");
}
