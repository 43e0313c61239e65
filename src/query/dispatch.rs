// src/query/dispatch.rs
//! Retrieval dispatcher: executes a routing strategy against the filter collaborators.
//!
//! Composite strategies fan out concurrently and join before merging. A failing
//! secondary is logged and dropped; a failing primary fails the request. Dropping the
//! dispatch future aborts every in-flight call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::articles::Article;
use crate::query::model::Endpoint;
use crate::query::routing::{EndpointParams, RoutingStrategy, StrategyType};
use crate::store::NewsFilters;
use crate::telemetry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("primary endpoint `{endpoint}` failed: {reason}")]
    PrimaryUnavailable { endpoint: Endpoint, reason: String },
}

#[derive(Clone)]
pub struct Dispatcher {
    filters: Arc<dyn NewsFilters>,
    call_timeout: Duration,
}

async fn fetch(
    filters: &dyn NewsFilters,
    params: &EndpointParams,
    limit: usize,
    call_timeout: Duration,
) -> anyhow::Result<Vec<Article>> {
    let call = async {
        match params {
            EndpointParams::Category { category } => filters.category(category, limit).await,
            EndpointParams::Search { query } => filters.search(query, limit).await,
            EndpointParams::Source { source } => filters.source(source, limit).await,
            EndpointParams::Score { min_score } => filters.score(*min_score, limit).await,
            EndpointParams::Nearby { lat, lon, radius_km } => {
                filters.nearby(*lat, *lon, *radius_km, limit).await
            }
        }
    };
    tokio::time::timeout(call_timeout, call)
        .await
        .map_err(|_| anyhow!("timed out after {call_timeout:?}"))?
}

/// Concatenate batches in order, keep the first occurrence of each id, cap at `limit`.
pub fn merge_unique(batches: Vec<Vec<Article>>, limit: usize) -> Vec<Article> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|a| seen.insert(a.id.clone()))
        .take(limit)
        .collect()
}

impl Dispatcher {
    pub fn new(filters: Arc<dyn NewsFilters>, call_timeout: Duration) -> Self {
        Self {
            filters,
            call_timeout,
        }
    }

    pub async fn dispatch(
        &self,
        strategy: &RoutingStrategy,
        limit: usize,
    ) -> Result<Vec<Article>, DispatchError> {
        match strategy.strategy_type {
            StrategyType::Single => {
                fetch(self.filters.as_ref(), &strategy.parameters, limit, self.call_timeout)
                    .await
                    .map_err(|e| self.primary_failed(strategy.primary_endpoint, e))
            }
            StrategyType::Composite => self.dispatch_composite(strategy, limit).await,
        }
    }

    async fn dispatch_composite(
        &self,
        strategy: &RoutingStrategy,
        limit: usize,
    ) -> Result<Vec<Article>, DispatchError> {
        let calls = strategy.calls();
        let mut set = JoinSet::new();
        for (idx, call) in calls.iter().enumerate() {
            let filters = Arc::clone(&self.filters);
            let params = call.parameters.clone();
            let timeout = self.call_timeout;
            set.spawn(async move {
                (idx, fetch(filters.as_ref(), &params, limit, timeout).await)
            });
        }

        let mut results: Vec<Option<anyhow::Result<Vec<Article>>>> =
            (0..calls.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, res)) => results[idx] = Some(res),
                Err(e) => warn!(error = %e, "dispatch task did not complete"),
            }
        }

        let mut batches = Vec::with_capacity(calls.len());
        for (idx, (call, res)) in calls.iter().zip(results).enumerate() {
            let res = res.unwrap_or_else(|| Err(anyhow!("task aborted")));
            match res {
                Ok(articles) => {
                    debug!(endpoint = %call.endpoint, count = articles.len(), "collaborator ok");
                    batches.push(articles);
                }
                Err(e) if idx == 0 => return Err(self.primary_failed(call.endpoint, e)),
                Err(e) => {
                    warn!(endpoint = %call.endpoint, error = %e, "secondary collaborator failed; dropping its results");
                    telemetry::record_collaborator_error(call.endpoint.as_str());
                }
            }
        }
        Ok(merge_unique(batches, limit))
    }

    fn primary_failed(&self, endpoint: Endpoint, e: anyhow::Error) -> DispatchError {
        warn!(endpoint = %endpoint, error = %e, "primary collaborator failed");
        telemetry::record_collaborator_error(endpoint.as_str());
        DispatchError::PrimaryUnavailable {
            endpoint,
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::routing::EndpointCall;
    use crate::store::tests::article;
    use anyhow::{bail, Result};

    /// Returns canned results per endpoint; `source` always fails.
    struct Canned {
        slow_score: bool,
    }

    fn a(id: &str) -> Article {
        article(id, id, "", "2025-01-01T00:00:00", "src", &["x"], 0.5, (0.0, 0.0))
    }

    #[async_trait::async_trait]
    impl NewsFilters for Canned {
        async fn category(&self, _c: &str, limit: usize) -> Result<Vec<Article>> {
            Ok(vec![a("X"), a("A"), a("B")].into_iter().take(limit).collect())
        }
        async fn search(&self, _q: &str, limit: usize) -> Result<Vec<Article>> {
            Ok(vec![a("C"), a("X"), a("A")].into_iter().take(limit).collect())
        }
        async fn source(&self, _s: &str, _limit: usize) -> Result<Vec<Article>> {
            bail!("connection refused")
        }
        async fn score(&self, _m: f64, _limit: usize) -> Result<Vec<Article>> {
            if self.slow_score {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(vec![a("S")])
        }
        async fn nearby(&self, _lat: f64, _lon: f64, _r: f64, _limit: usize) -> Result<Vec<Article>> {
            Ok(vec![])
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Canned { slow_score: true }), Duration::from_millis(50))
    }

    fn composite(primary: EndpointParams, secondary: Vec<EndpointParams>) -> RoutingStrategy {
        RoutingStrategy {
            primary_endpoint: primary.endpoint(),
            secondary_endpoints: secondary.into_iter().map(EndpointCall::from).collect(),
            parameters: primary,
            strategy_type: StrategyType::Composite,
            confidence: 0.9,
        }
    }

    fn ids(v: &[Article]) -> Vec<&str> {
        v.iter().map(|a| a.id.as_str()).collect()
    }

    #[tokio::test]
    async fn composite_dedups_keeping_primary_position() {
        let s = composite(
            EndpointParams::Category { category: "tech".into() },
            vec![EndpointParams::Search { query: "q".into() }],
        );
        let out = dispatcher().dispatch(&s, 10).await.unwrap();
        assert_eq!(ids(&out), vec!["X", "A", "B", "C"]);
    }

    #[tokio::test]
    async fn composite_truncates_after_dedup() {
        let s = composite(
            EndpointParams::Category { category: "tech".into() },
            vec![EndpointParams::Search { query: "q".into() }],
        );
        let out = dispatcher().dispatch(&s, 4).await.unwrap();
        assert_eq!(out.len(), 4);
        let out = dispatcher().dispatch(&s, 2).await.unwrap();
        assert_eq!(ids(&out), vec!["X", "A"]);
    }

    #[tokio::test]
    async fn failing_or_slow_secondaries_are_dropped() {
        let s = composite(
            EndpointParams::Search { query: "q".into() },
            vec![
                EndpointParams::Source { source: "r".into() },
                EndpointParams::Score { min_score: 0.5 },
            ],
        );
        let out = dispatcher().dispatch(&s, 10).await.unwrap();
        assert_eq!(ids(&out), vec!["C", "X", "A"]);
    }

    #[tokio::test]
    async fn failing_primary_escalates() {
        let s = composite(
            EndpointParams::Source { source: "r".into() },
            vec![EndpointParams::Search { query: "q".into() }],
        );
        let err = dispatcher().dispatch(&s, 10).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::PrimaryUnavailable { endpoint: Endpoint::Source, .. }
        ));

        let single = RoutingStrategy {
            secondary_endpoints: vec![],
            strategy_type: StrategyType::Single,
            ..s
        };
        assert!(dispatcher().dispatch(&single, 10).await.is_err());
    }

    #[tokio::test]
    async fn single_returns_collaborator_order_verbatim() {
        let s = RoutingStrategy {
            primary_endpoint: Endpoint::Search,
            secondary_endpoints: vec![],
            parameters: EndpointParams::Search { query: "q".into() },
            strategy_type: StrategyType::Single,
            confidence: 0.5,
        };
        let d = Dispatcher::new(Arc::new(Canned { slow_score: false }), Duration::from_secs(1));
        assert_eq!(ids(&d.dispatch(&s, 10).await.unwrap()), vec!["C", "X", "A"]);
    }
}
