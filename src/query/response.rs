// src/query/response.rs
//! Response envelope for the smart-query endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::articles::Article;
use crate::query::model::{Analysis, Query};
use crate::query::routing::RoutingStrategy;

#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub articles: Vec<Article>,
    /// Length of `articles` (after dedup and truncation).
    pub total: usize,
    pub query: String,
    pub processing_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    /// Whether the analysis came from the query-analysis cache.
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_strategy: Option<RoutingStrategy>,
}

/// Everything the envelope is built from.
pub struct Assembly<'a> {
    pub query: &'a Query,
    pub articles: Vec<Article>,
    pub analysis: &'a Analysis,
    pub strategy: &'a RoutingStrategy,
    pub elapsed: Duration,
    pub cache_hit: bool,
    pub now: DateTime<Utc>,
}

pub fn assemble(parts: Assembly<'_>) -> ResponseEnvelope {
    let ms = parts.elapsed.as_secs_f64() * 1000.0;
    let include = parts.query.include_analysis;
    ResponseEnvelope {
        total: parts.articles.len(),
        articles: parts.articles,
        query: parts.query.text.clone(),
        processing_time_ms: (ms * 100.0).round() / 100.0,
        timestamp: parts.now,
        cache_hit: parts.cache_hit,
        analysis: include.then(|| parts.analysis.clone()),
        routing_strategy: include.then(|| parts.strategy.clone()),
    }
}
