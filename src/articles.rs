// src/articles.rs
//! Article records as served by the filter endpoints, plus the great-circle helper
//! used by proximity filtering.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Mean earth radius (km) used by the proximity filter.
pub const EARTH_RADIUS_KM: f64 = 6378.1;

/// A news article. Read-only to the routing core; only the store creates these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(deserialize_with = "de_publication_date")]
    pub publication_date: DateTime<Utc>,
    pub source_name: String,
    #[serde(default, deserialize_with = "de_categories")]
    pub category: Vec<String>,
    pub relevance_score: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Distance from the caller's point; only set on proximity results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_summary: Option<String>,
}

impl Article {
    pub fn has_category(&self, category: &str) -> bool {
        self.category
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }

    pub fn distance_to(&self, lat: f64, lon: f64) -> f64 {
        haversine_km(self.latitude, self.longitude, lat, lon)
    }
}

/// Great-circle distance between two points in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Accepts RFC 3339 timestamps and the naive `YYYY-MM-DDTHH:MM:SS` form (read as UTC).
fn de_publication_date<'de, D>(de: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(de)?;
    parse_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("unsupported publication_date `{raw}`"))
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Ingested data carries either a single tag or a list.
fn de_categories<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(de)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}
