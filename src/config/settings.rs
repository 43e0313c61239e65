// src/config/settings.rs
//! Service settings from `config/news.toml`, with env overrides.
//!
//! Every section is optional; a missing file yields the built-in defaults.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SETTINGS_PATH: &str = "config/news.toml";

pub const ENV_SETTINGS_PATH: &str = "NEWS_CONFIG_PATH";
pub const ENV_ARTICLES_PATH: &str = "NEWS_ARTICLES_PATH";
pub const ENV_CACHE_TTL_SECS: &str = "ANALYSIS_CACHE_TTL_SECS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub cache: CacheSettings,
    pub routing: RoutingDefaults,
    pub query: QueryLimits,
    pub filters: FilterSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub articles_path: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            articles_path: PathBuf::from("data/articles.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Absolute TTL of a cached analysis (no sliding refresh).
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Values the routing builder fills in when the analysis leaves them open.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingDefaults {
    pub default_min_score: f64,
    pub default_radius_km: f64,
    pub max_radius_km: f64,
}

impl Default for RoutingDefaults {
    fn default() -> Self {
        Self {
            default_min_score: 0.7,
            default_radius_km: 10.0,
            max_radius_km: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_query_chars: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 20,
            max_query_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Upper bound for one collaborator call during dispatch.
    pub call_timeout_ms: u64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
            call_timeout_ms: 5_000,
        }
    }
}

impl FilterSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

impl Settings {
    /// Resolve the path from `NEWS_CONFIG_PATH` (or the default), load it if present,
    /// then apply env overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_SETTINGS_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_PATH));

        let mut settings = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(p) = std::env::var(ENV_ARTICLES_PATH) {
            if !p.trim().is_empty() {
                settings.data.articles_path = PathBuf::from(p.trim());
            }
        }
        if let Some(ttl) = std::env::var(ENV_CACHE_TTL_SECS)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            settings.cache.ttl_secs = ttl;
        }
        Ok(settings.sanitized())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing settings from {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(s)?;
        Ok(settings.sanitized())
    }

    /// Replace out-of-range values with defaults instead of failing startup.
    fn sanitized(mut self) -> Self {
        let d = RoutingDefaults::default();
        if !(0.0..=1.0).contains(&self.routing.default_min_score) {
            self.routing.default_min_score = d.default_min_score;
        }
        if !(self.routing.max_radius_km.is_finite() && self.routing.max_radius_km > 0.0) {
            self.routing.max_radius_km = d.max_radius_km;
        }
        if !(self.routing.default_radius_km > 0.0
            && self.routing.default_radius_km <= self.routing.max_radius_km)
        {
            self.routing.default_radius_km = d.default_radius_km.min(self.routing.max_radius_km);
        }
        if self.query.max_limit == 0 {
            self.query.max_limit = QueryLimits::default().max_limit;
        }
        self.query.default_limit = self.query.default_limit.clamp(1, self.query.max_limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn partial_toml_keeps_defaults() {
        let s = Settings::from_toml_str(
            r#"
[cache]
ttl_secs = 60

[routing]
default_radius_km = 25.0
"#,
        )
        .unwrap();
        assert_eq!(s.cache.ttl_secs, 60);
        assert_eq!(s.routing.default_radius_km, 25.0);
        assert_eq!(s.routing.default_min_score, 0.7);
        assert_eq!(s.query.max_limit, 20);
        assert_eq!(s.filters.max_limit, 100);
    }

    #[test]
    fn out_of_range_values_fall_back() {
        let s = Settings::from_toml_str(
            r#"
[routing]
default_min_score = 1.5
default_radius_km = -3.0
"#,
        )
        .unwrap();
        assert_eq!(s.routing.default_min_score, 0.7);
        assert_eq!(s.routing.default_radius_km, 10.0);
    }

    #[test]
    fn filter_limit_is_clamped() {
        let f = FilterSettings::default();
        assert_eq!(f.clamp_limit(None), 20);
        assert_eq!(f.clamp_limit(Some(0)), 1);
        assert_eq!(f.clamp_limit(Some(500)), 100);
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_apply_over_file() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("news.toml");
        fs::write(&p, "[cache]\nttl_secs = 10\n").unwrap();

        env::set_var(ENV_SETTINGS_PATH, p.display().to_string());
        env::set_var(ENV_CACHE_TTL_SECS, "42");
        env::set_var(ENV_ARTICLES_PATH, "fixtures/a.json");
        let s = Settings::from_env().unwrap();
        env::remove_var(ENV_SETTINGS_PATH);
        env::remove_var(ENV_CACHE_TTL_SECS);
        env::remove_var(ENV_ARTICLES_PATH);

        assert_eq!(s.cache.ttl_secs, 42);
        assert_eq!(s.data.articles_path, PathBuf::from("fixtures/a.json"));
    }
}
