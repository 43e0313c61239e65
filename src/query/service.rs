// src/query/service.rs
//! Smart-query orchestration:
//! validate → analyze (cache, LLM, keyword fallback) → route → dispatch → assemble.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::articles::Article;
use crate::config::settings::{QueryLimits, RoutingDefaults};
use crate::error::ApiError;
use crate::query::cache::{cache_key, AnalysisCache};
use crate::query::dispatch::Dispatcher;
use crate::query::llm::QueryAnalyzer;
use crate::query::model::{Analysis, AnalysisSource, GeoPoint, Query};
use crate::query::response::{assemble, Assembly, ResponseEnvelope};
use crate::query::routing::{RoutingBuilder, RoutingError};
use crate::telemetry::{self, query_id};

#[derive(Debug, Deserialize)]
pub struct RawLocation {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Wire shape of `POST /api/v1/news/query`. Everything is optional here so that
/// validation can answer with our own error envelope.
#[derive(Debug, Default, Deserialize)]
pub struct SmartQueryRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub location: Option<RawLocation>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub include_summary: Option<bool>,
    #[serde(default)]
    pub include_analysis: Option<bool>,
}

impl SmartQueryRequest {
    pub fn validate(self, limits: &QueryLimits) -> Result<Query, ApiError> {
        let text = self
            .query
            .ok_or_else(|| ApiError::validation("Query is required"))?
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(ApiError::validation("Query cannot be empty"));
        }
        if text.chars().count() > limits.max_query_chars {
            return Err(ApiError::validation(format!(
                "Query must be at most {} characters",
                limits.max_query_chars
            )));
        }

        let location = match self.location {
            None => None,
            Some(RawLocation {
                lat: Some(lat),
                lon: Some(lon),
            }) => {
                let point = GeoPoint { lat, lon };
                if !point.is_valid() {
                    return Err(ApiError::validation("Invalid latitude or longitude values"));
                }
                Some(point)
            }
            Some(_) => return Err(ApiError::validation("Location must include lat and lon")),
        };

        let limit = match self.limit {
            None => limits.default_limit,
            Some(n) if n >= 1 && (n as u64) <= limits.max_limit as u64 => n as usize,
            Some(n) => {
                return Err(ApiError::validation(format!(
                    "limit must be between 1 and {}, got {n}",
                    limits.max_limit
                )))
            }
        };

        Ok(Query {
            text,
            location,
            limit,
            include_summary: self.include_summary.unwrap_or(false),
            include_analysis: self.include_analysis.unwrap_or(false),
        })
    }
}

pub struct SmartQueryService {
    analyzer: Arc<QueryAnalyzer>,
    cache: AnalysisCache,
    router: RoutingBuilder,
    dispatcher: Dispatcher,
}

impl SmartQueryService {
    pub fn new(
        analyzer: QueryAnalyzer,
        cache: AnalysisCache,
        defaults: RoutingDefaults,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            cache,
            router: RoutingBuilder::new(defaults),
            dispatcher,
        }
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Cached analysis if warm, else a fresh one.
    async fn analysis_for(&self, query: &Query, key: &str) -> (Analysis, bool) {
        if let Some(hit) = self.cache.get(key) {
            telemetry::record_cache(true);
            return (hit, true);
        }
        telemetry::record_cache(false);
        let analysis = self.analyzer.analyze(&query.text, query.location).await;
        (analysis, false)
    }

    pub async fn process(&self, query: &Query) -> Result<ResponseEnvelope, ApiError> {
        let started = Instant::now();
        let id = query_id(&query.text);
        let key = cache_key(&query.text, query.location);

        let (mut analysis, cache_hit) = self.analysis_for(query, &key).await;
        debug!(%id, intent = %analysis.intent, source = ?analysis.source, cache_hit, "analysis ready");

        let strategy = match self.router.build(&analysis) {
            Ok(strategy) => strategy,
            // Out-of-range values from the LLM are its failure, not the caller's.
            Err(RoutingError::InvalidParameter(reason)) if analysis.source == AnalysisSource::Llm => {
                warn!(%id, %reason, "llm parameters rejected by routing; using keyword fallback");
                telemetry::record_llm_fallback("invalid_parameters");
                analysis = self.analyzer.fallback(&query.text, query.location);
                self.router.build(&analysis).map_err(|e| self.unroutable(&id, e))?
            }
            Err(e) => return Err(self.unroutable(&id, e)),
        };
        // Only LLM analyses that routed cleanly are worth caching.
        if !cache_hit && analysis.source == AnalysisSource::Llm {
            self.cache.insert(key, analysis.clone());
        }

        let mut articles = self.dispatcher.dispatch(&strategy, query.limit).await?;

        if query.include_summary {
            articles = self.with_summaries(articles).await;
        }

        let elapsed = started.elapsed();
        let envelope = assemble(Assembly {
            query,
            articles,
            analysis: &analysis,
            strategy: &strategy,
            elapsed,
            cache_hit,
            now: Utc::now(),
        });
        telemetry::record_query_duration(elapsed);
        info!(
            %id,
            intent = %analysis.intent,
            source = ?analysis.source,
            primary = %strategy.primary_endpoint,
            strategy = ?strategy.strategy_type,
            total = envelope.total,
            cache_hit,
            ms = envelope.processing_time_ms,
            "smart query served"
        );
        Ok(envelope)
    }

    fn unroutable(&self, id: &str, e: RoutingError) -> ApiError {
        info!(%id, error = %e, "query could not be routed");
        ApiError::from(e)
    }

    /// Summaries are generated concurrently; a failed one leaves `llm_summary` unset.
    async fn with_summaries(&self, mut articles: Vec<Article>) -> Vec<Article> {
        let mut set = JoinSet::new();
        for (idx, a) in articles.iter().enumerate() {
            let analyzer = Arc::clone(&self.analyzer);
            let (title, description) = (a.title.clone(), a.description.clone());
            set.spawn(async move { (idx, analyzer.summarize(&title, &description).await) });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, summary)) => articles[idx].llm_summary = summary,
                Err(e) => warn!(error = %e, "summary task did not complete"),
            }
        }
        articles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(json: &str) -> Result<Query, ApiError> {
        serde_json::from_str::<SmartQueryRequest>(json)
            .unwrap()
            .validate(&QueryLimits::default())
    }

    #[test]
    fn valid_request_gets_defaults() {
        let q = req(r#"{"query": "  tech news  "}"#).unwrap();
        assert_eq!(q.text, "tech news");
        assert_eq!(q.limit, 5);
        assert!(!q.include_analysis);
        assert!(!q.include_summary);
        assert!(q.location.is_none());
    }

    #[test]
    fn rejects_bad_input_before_any_call() {
        for bad in [
            r#"{}"#,
            r#"{"query": ""}"#,
            r#"{"query": "   "}"#,
            r#"{"query": "x", "limit": 0}"#,
            r#"{"query": "x", "limit": 21}"#,
            r#"{"query": "x", "location": {"lat": 91.0, "lon": 0.0}}"#,
            r#"{"query": "x", "location": {"lat": 10.0}}"#,
        ] {
            let err = req(bad).unwrap_err();
            assert_eq!(err.kind(), "validation_error", "for {bad}");
        }
        let long = format!(r#"{{"query": "{}"}}"#, "a".repeat(501));
        assert!(req(&long).is_err());
    }
}
