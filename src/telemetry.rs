// src/telemetry.rs
//! Logging setup, anonymized query ids and Prometheus counters.

use std::time::Duration;

use axum::{routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
const DEFAULT_FILTER: &str = "news_router=info,warn";

/// Short stable id for a query so logs never carry the raw text.
pub fn query_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter and
/// `LOG_FORMAT=json` switches to JSON lines. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

pub fn record_llm_fallback(kind: &str) {
    counter!("llm_fallback_total", "reason" => kind.to_string()).increment(1);
}

pub fn record_collaborator_error(endpoint: &str) {
    counter!("dispatch_collaborator_errors_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_cache(hit: bool) {
    if hit {
        counter!("analysis_cache_hits_total").increment(1);
    } else {
        counter!("analysis_cache_misses_total").increment(1);
    }
}

pub fn record_query_outcome(error_kind: Option<&str>) {
    counter!("smart_query_total").increment(1);
    if let Some(kind) = error_kind {
        counter!("smart_query_errors_total", "kind" => kind.to_string()).increment(1);
    }
}

pub fn record_query_duration(elapsed: Duration) {
    histogram!("smart_query_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder on first use and publish the cache TTL gauge.
    /// Later calls reuse the same recorder.
    pub fn init(cache_ttl: Duration) -> anyhow::Result<Self> {
        let handle = PROMETHEUS
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())?
            .clone();
        gauge!("analysis_cache_ttl_secs").set(cache_ttl.as_secs_f64());
        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus text format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_id_is_short_and_stable() {
        let a = query_id("technology news");
        assert_eq!(a.len(), 12);
        assert_eq!(a, query_id("technology news"));
        assert_ne!(a, query_id("sports news"));
        assert!(!a.contains("technology"));
    }

    #[test]
    fn metrics_init_is_idempotent() {
        let first = Metrics::init(Duration::from_secs(60)).unwrap();
        let second = Metrics::init(Duration::from_secs(60)).unwrap();
        record_cache(true);
        record_llm_fallback("timeout");
        let text = second.handle.render();
        assert!(text.contains("analysis_cache_ttl_secs"), "{text}");
        assert!(text.contains("analysis_cache_hits_total"), "{text}");
        assert!(text.contains("llm_fallback_total"), "{text}");
        drop(first);
    }
}
