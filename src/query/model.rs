// src/query/model.rs
//! Request-scoped values of the smart-query pipeline: the validated query, the
//! analysis produced for it, and the intent/endpoint vocabulary shared by routing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A point on the globe in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A validated smart query. Built once per request, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub location: Option<GeoPoint>,
    pub limit: usize,
    pub include_summary: bool,
    pub include_analysis: bool,
}

/// Classified purpose of a query.
///
/// Anything the analyzer could not map onto a known kind is kept as
/// `Unrecognized` so routing can reject it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    Category,
    Search,
    Source,
    Score,
    Nearby,
    Mixed,
    Unrecognized(String),
}

impl From<String> for Intent {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "category" => Intent::Category,
            "search" => Intent::Search,
            "source" => Intent::Source,
            "score" => Intent::Score,
            "nearby" | "location" => Intent::Nearby,
            "mixed" | "composite" | "multiple" => Intent::Mixed,
            _ => Intent::Unrecognized(s),
        }
    }
}

impl From<Intent> for String {
    fn from(i: Intent) -> Self {
        i.to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Category => "category",
            Intent::Search => "search",
            Intent::Source => "source",
            Intent::Score => "score",
            Intent::Nearby => "nearby",
            Intent::Mixed => "mixed",
            Intent::Unrecognized(raw) => raw.as_str(),
        };
        f.write_str(s)
    }
}

/// Filter collaborators the router can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Category,
    Search,
    Source,
    Score,
    Nearby,
}

impl Endpoint {
    /// Fixed tie-break rank for composite routing; lower wins.
    /// category > source > score > nearby > search
    pub fn tie_break_rank(self) -> u8 {
        match self {
            Endpoint::Category => 0,
            Endpoint::Source => 1,
            Endpoint::Score => 2,
            Endpoint::Nearby => 3,
            Endpoint::Search => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Category => "category",
            Endpoint::Search => "search",
            Endpoint::Source => "source",
            Endpoint::Score => "score",
            Endpoint::Nearby => "nearby",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Llm,
    Fallback,
}

/// Location parameters as extracted from the query text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationParam {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
}

/// Endpoint parameters resolved during analysis. All optional; routing decides which
/// ones an intent needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_terms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationParam>,
}

pub type Entities = BTreeMap<String, Vec<String>>;

/// Intent, entities and parameters extracted from one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub intent: Intent,
    pub entities: Entities,
    pub parameters: AnalysisParameters,
    pub confidence: f64,
    pub reasoning: String,
    pub source: AnalysisSource,
    /// Per-endpoint confidence for composite intents, when the analyzer provides it.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub intent_confidences: BTreeMap<Endpoint, f64>,
    /// Caller's location hint, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// The query text this analysis was produced for.
    #[serde(skip)]
    pub query: String,
}

impl Analysis {
    /// First value of an entity kind, e.g. `first_entity("topics")`.
    pub fn first_entity(&self, kind: &str) -> Option<&str> {
        self.entities
            .get(kind)
            .and_then(|v| v.iter().map(|s| s.trim()).find(|s| !s.is_empty()))
    }

    pub fn with_location(mut self, location: Option<GeoPoint>) -> Self {
        self.location = location;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_round_trips_known_and_unknown_values() {
        assert_eq!(Intent::from("Composite".to_string()), Intent::Mixed);
        assert_eq!(Intent::from("nearby".to_string()), Intent::Nearby);
        let weird = Intent::from("weather".to_string());
        assert_eq!(weird, Intent::Unrecognized("weather".to_string()));
        assert_eq!(String::from(weird), "weather");
    }

    #[test]
    fn tie_break_order_is_total() {
        let mut all = vec![
            Endpoint::Search,
            Endpoint::Nearby,
            Endpoint::Score,
            Endpoint::Source,
            Endpoint::Category,
        ];
        all.sort_by_key(|e| e.tie_break_rank());
        assert_eq!(
            all,
            vec![
                Endpoint::Category,
                Endpoint::Source,
                Endpoint::Score,
                Endpoint::Nearby,
                Endpoint::Search
            ]
        );
    }
}
