// src/store.rs
//! Filter collaborators: the narrow read interface the router dispatches to, and the
//! in-memory article store that backs it.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::articles::Article;

/// Read-only article filters. Every method returns at most `limit` articles in the
/// filter's own ranking order.
#[async_trait::async_trait]
pub trait NewsFilters: Send + Sync {
    /// Tag membership, newest first.
    async fn category(&self, category: &str, limit: usize) -> Result<Vec<Article>>;
    /// Case-insensitive text match; title hits weigh 2, description hits 1.
    /// Ordered by (text score, relevance, publication time), all descending.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Article>>;
    /// Case-insensitive partial match on the source name, newest first.
    async fn source(&self, source: &str, limit: usize) -> Result<Vec<Article>>;
    /// `relevance_score >= min_score`, highest relevance first.
    async fn score(&self, min_score: f64, limit: usize) -> Result<Vec<Article>>;
    /// Great-circle distance within `radius_km`, nearest first.
    async fn nearby(&self, lat: f64, lon: f64, radius_km: f64, limit: usize)
        -> Result<Vec<Article>>;
}

/// All articles held in memory, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArticleStore {
    articles: Vec<Article>,
}

impl InMemoryArticleStore {
    pub fn new(articles: Vec<Article>) -> Self {
        Self { articles }
    }

    /// Load a JSON array of articles.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading articles from {}", path.display()))?;
        let store = Self::from_json_str(&data)
            .with_context(|| format!("parsing articles from {}", path.display()))?;
        info!(path = %path.display(), count = store.len(), "article store loaded");
        Ok(store)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let articles: Vec<Article> = serde_json::from_str(data)?;
        Ok(Self::new(articles))
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    fn newest_first(mut hits: Vec<Article>, limit: usize) -> Vec<Article> {
        hits.sort_by(|a, b| b.publication_date.cmp(&a.publication_date));
        hits.truncate(limit);
        hits
    }
}

fn desc_f64(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// 2 for a title hit, 1 for a description hit.
fn text_score(article: &Article, needle_lower: &str) -> u8 {
    let mut score = 0;
    if article.title.to_lowercase().contains(needle_lower) {
        score += 2;
    }
    if article.description.to_lowercase().contains(needle_lower) {
        score += 1;
    }
    score
}

#[async_trait::async_trait]
impl NewsFilters for InMemoryArticleStore {
    async fn category(&self, category: &str, limit: usize) -> Result<Vec<Article>> {
        let hits = self
            .articles
            .iter()
            .filter(|a| a.has_category(category))
            .cloned()
            .collect();
        Ok(Self::newest_first(hits, limit))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Article>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(u8, &Article)> = self
            .articles
            .iter()
            .map(|a| (text_score(a, &needle), a))
            .filter(|(s, _)| *s > 0)
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| desc_f64(a.relevance_score, b.relevance_score))
                .then_with(|| b.publication_date.cmp(&a.publication_date))
        });
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn source(&self, source: &str, limit: usize) -> Result<Vec<Article>> {
        let needle = source.trim().to_lowercase();
        let hits = self
            .articles
            .iter()
            .filter(|a| a.source_name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        Ok(Self::newest_first(hits, limit))
    }

    async fn score(&self, min_score: f64, limit: usize) -> Result<Vec<Article>> {
        let mut hits: Vec<Article> = self
            .articles
            .iter()
            .filter(|a| a.relevance_score >= min_score)
            .cloned()
            .collect();
        hits.sort_by(|a, b| desc_f64(a.relevance_score, b.relevance_score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn nearby(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let mut hits: Vec<(f64, Article)> = self
            .articles
            .iter()
            .map(|a| (a.distance_to(lat, lon), a))
            .filter(|(d, _)| *d <= radius_km)
            .map(|(d, a)| {
                let mut a = a.clone();
                a.distance_km = Some((d * 100.0).round() / 100.0);
                (d, a)
            })
            .collect();
        hits.sort_by(|(da, _), (db, _)| da.partial_cmp(db).unwrap_or(Ordering::Equal));
        Ok(hits.into_iter().take(limit).map(|(_, a)| a).collect())
    }
}
