// src/api.rs
// HTTP surface: filter endpoints, the smart-query endpoint, health and service info.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, Request, State,
    },
    http::HeaderValue,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};
use tracing::{error, info, warn};

use crate::config::{LlmConfig, Settings};
use crate::error::ApiError;
use crate::query::cache::AnalysisCache;
use crate::query::dispatch::Dispatcher;
use crate::query::fallback::{FallbackClassifier, RuleTable};
use crate::query::llm::{build_provider, QueryAnalyzer};
use crate::query::response::ResponseEnvelope;
use crate::query::service::{SmartQueryRequest, SmartQueryService};
use crate::store::{InMemoryArticleStore, NewsFilters};
use crate::telemetry::{self, Metrics};

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    filters: Arc<dyn NewsFilters>,
    service: Arc<SmartQueryService>,
    metrics: Metrics,
    analyzer_name: &'static str,
}

impl AppState {
    /// Wire the pipeline from already-built parts.
    pub fn new(
        settings: Settings,
        filters: Arc<dyn NewsFilters>,
        analyzer: QueryAnalyzer,
    ) -> anyhow::Result<Self> {
        let cache = AnalysisCache::new(settings.cache.ttl());
        let metrics = Metrics::init(cache.ttl())?;
        let dispatcher = Dispatcher::new(Arc::clone(&filters), settings.filters.call_timeout());
        let analyzer_name = analyzer.provider_name();
        let service = SmartQueryService::new(analyzer, cache, settings.routing.clone(), dispatcher);
        Ok(Self {
            settings: Arc::new(settings),
            filters,
            service: Arc::new(service),
            metrics,
            analyzer_name,
        })
    }

    /// Settings, article store, LLM provider and fallback rules from files and env.
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = Settings::from_env()?;
        let store = InMemoryArticleStore::load_from_file(&settings.data.articles_path)?;
        let llm_config = LlmConfig::from_env()?;
        let llm = build_provider(&llm_config)?;
        let fallback = FallbackClassifier::new(RuleTable::from_env()?);
        let analyzer =
            QueryAnalyzer::new(llm, fallback, Duration::from_secs(llm_config.timeout_secs));
        info!(
            articles = store.len(),
            provider = analyzer.provider_name(),
            cache_ttl_secs = settings.cache.ttl_secs,
            "news router state ready"
        );
        Self::new(settings, Arc::new(store), analyzer)
    }
}

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.router();
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/news/category", get(by_category))
        .route("/api/v1/news/search", get(by_search))
        .route("/api/v1/news/source", get(by_source))
        .route("/api/v1/news/score", get(by_score))
        .route("/api/v1/news/nearby", get(by_nearby))
        .route("/api/v1/news/query", post(smart_query))
        .merge(metrics)
        .layer(middleware::from_fn(process_time))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    error!("handler panicked");
    ApiError::Internal.into_response()
}

/// Wall-clock seconds spent handling the request, in `x-process-time`.
async fn process_time(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut resp = next.run(req).await;
    let elapsed = format!("{:.4}", started.elapsed().as_secs_f64());
    if let Ok(v) = HeaderValue::from_str(&elapsed) {
        resp.headers_mut().insert(PROCESS_TIME_HEADER, v);
    }
    resp
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "metrics": "GET /metrics",
            "category": "GET /api/v1/news/category?category=&limit=",
            "search": "GET /api/v1/news/search?query=&limit=",
            "source": "GET /api/v1/news/source?source=&limit=",
            "score": "GET /api/v1/news/score?min_score=&limit=",
            "nearby": "GET /api/v1/news/nearby?lat=&lon=&radius_km=&limit=",
            "smart_query": "POST /api/v1/news/query",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let cache = state.service.cache();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "llm_provider": state.analyzer_name,
        "analysis_cache": { "enabled": cache.is_enabled(), "entries": cache.len() },
        "timestamp": Utc::now(),
    }))
}

async fn smart_query(
    State(state): State<AppState>,
    payload: Result<Json<SmartQueryRequest>, JsonRejection>,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    let outcome = async {
        let Json(body) = payload.map_err(|e| ApiError::validation(e.body_text()))?;
        let query = body.validate(&state.settings.query)?;
        state.service.process(&query).await
    }
    .await;

    telemetry::record_query_outcome(outcome.as_ref().err().map(ApiError::kind));
    if let Err(e) = &outcome {
        if e.status().is_server_error() {
            warn!(kind = e.kind(), "smart query failed");
        }
    }
    outcome.map(Json)
}

// ------------------------------------------------------------
// Filter endpoints
// ------------------------------------------------------------

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::MissingParameter(format!("`{name}` is required")))
}

fn params<T>(q: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    q.map(|Query(t)| t)
        .map_err(|e| ApiError::validation(e.body_text()))
}

fn collaborator_failed(endpoint: &str, e: anyhow::Error) -> ApiError {
    warn!(endpoint, error = %e, "filter collaborator failed");
    telemetry::record_collaborator_error(endpoint);
    ApiError::Unavailable
}

#[derive(Debug, Deserialize)]
struct CategoryParams {
    category: Option<String>,
    limit: Option<usize>,
}

async fn by_category(
    State(state): State<AppState>,
    q: Result<Query<CategoryParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let p = params(q)?;
    let category = required(p.category, "category")?;
    let limit = state.settings.filters.clamp_limit(p.limit);
    let articles = state
        .filters
        .category(&category, limit)
        .await
        .map_err(|e| collaborator_failed("category", e))?;
    Ok(Json(json!({
        "total": articles.len(),
        "articles": articles,
        "category": category,
        "limit": limit,
    })))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
    limit: Option<usize>,
}

async fn by_search(
    State(state): State<AppState>,
    q: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let p = params(q)?;
    let query = required(p.query, "query")?;
    let limit = state.settings.filters.clamp_limit(p.limit);
    let articles = state
        .filters
        .search(&query, limit)
        .await
        .map_err(|e| collaborator_failed("search", e))?;
    Ok(Json(json!({
        "total": articles.len(),
        "articles": articles,
        "query": query,
        "limit": limit,
    })))
}

#[derive(Debug, Deserialize)]
struct SourceParams {
    source: Option<String>,
    limit: Option<usize>,
}

async fn by_source(
    State(state): State<AppState>,
    q: Result<Query<SourceParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let p = params(q)?;
    let source = required(p.source, "source")?;
    let limit = state.settings.filters.clamp_limit(p.limit);
    let articles = state
        .filters
        .source(&source, limit)
        .await
        .map_err(|e| collaborator_failed("source", e))?;
    Ok(Json(json!({
        "total": articles.len(),
        "articles": articles,
        "source": source,
        "limit": limit,
    })))
}

#[derive(Debug, Deserialize)]
struct ScoreParams {
    min_score: Option<f64>,
    limit: Option<usize>,
}

async fn by_score(
    State(state): State<AppState>,
    q: Result<Query<ScoreParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let p = params(q)?;
    let min_score = p.min_score.unwrap_or(state.settings.routing.default_min_score);
    if !(0.0..=1.0).contains(&min_score) {
        return Err(ApiError::validation(format!(
            "min_score must be between 0.0 and 1.0, got {min_score}"
        )));
    }
    let limit = state.settings.filters.clamp_limit(p.limit);
    let articles = state
        .filters
        .score(min_score, limit)
        .await
        .map_err(|e| collaborator_failed("score", e))?;
    Ok(Json(json!({
        "total": articles.len(),
        "articles": articles,
        "min_score": min_score,
        "limit": limit,
    })))
}

#[derive(Debug, Deserialize)]
struct NearbyParams {
    lat: Option<f64>,
    lon: Option<f64>,
    radius_km: Option<f64>,
    limit: Option<usize>,
}

async fn by_nearby(
    State(state): State<AppState>,
    q: Result<Query<NearbyParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let p = params(q)?;
    let (Some(lat), Some(lon)) = (p.lat, p.lon) else {
        return Err(ApiError::MissingParameter("`lat` and `lon` are required".into()));
    };
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(ApiError::validation("Invalid latitude or longitude values"));
    }
    let routing = &state.settings.routing;
    let radius_km = p.radius_km.unwrap_or(routing.default_radius_km);
    if !(radius_km > 0.0 && radius_km <= routing.max_radius_km) {
        return Err(ApiError::validation(format!(
            "radius_km must be in (0, {}], got {radius_km}",
            routing.max_radius_km
        )));
    }
    let limit = state.settings.filters.clamp_limit(p.limit);
    let articles = state
        .filters
        .nearby(lat, lon, radius_km, limit)
        .await
        .map_err(|e| collaborator_failed("nearby", e))?;
    Ok(Json(json!({
        "total": articles.len(),
        "articles": articles,
        "location": { "lat": lat, "lon": lon },
        "radius_km": radius_km,
        "limit": limit,
    })))
}
