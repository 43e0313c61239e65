// src/query/fallback.rs
//! Deterministic keyword classifier used whenever the LLM analysis is unavailable.
//!
//! The rule table is plain data (`config/fallback_rules.json` or the built-in
//! default). Rules are evaluated in table order and the first match wins:
//!
//! ```json
//! { "version": 1,
//!   "rules": [ { "name": "technology",
//!                "keywords": ["technology", "tech", "ai", "software"],
//!                "intent": "category",
//!                "parameters": { "category": "technology" },
//!                "topics": ["technology"],
//!                "confidence": 0.6 } ] }
//! ```
//!
//! Keywords match as substrings of the lower-cased query, so "markets" and "fintech"
//! hit "market" and "tech". Keywords of at most two characters ("ai") must match a
//! whole word. Rules with the `nearby` intent only fire when the caller sent a
//! location. No match yields a full-text search at confidence 0.3.

use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::query::model::{Analysis, AnalysisParameters, AnalysisSource, GeoPoint, Intent};

pub const DEFAULT_RULES_PATH: &str = "config/fallback_rules.json";
pub const ENV_RULES_PATH: &str = "FALLBACK_RULES_PATH";

/// Confidence of the no-match default.
pub const DEFAULT_SEARCH_CONFIDENCE: f64 = 0.3;

/// Keywords up to this many characters need a whole-word match.
const WHOLE_WORD_MAX_CHARS: usize = 2;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("word regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub intent: Intent,
    #[serde(default)]
    pub parameters: AnalysisParameters,
    #[serde(default)]
    pub topics: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    pub version: u32,
    pub rules: Vec<FallbackRule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        let category = |name: &str, keywords: &[&str]| FallbackRule {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            intent: Intent::Category,
            parameters: AnalysisParameters {
                category: Some(name.to_string()),
                ..AnalysisParameters::default()
            },
            topics: vec![name.to_string()],
            confidence: 0.6,
        };
        Self {
            version: 1,
            rules: vec![
                FallbackRule {
                    name: "proximity".to_string(),
                    keywords: ["near", "nearby", "around", "close to", "near me"]
                        .iter()
                        .map(|k| k.to_string())
                        .collect(),
                    intent: Intent::Nearby,
                    parameters: AnalysisParameters::default(),
                    topics: Vec::new(),
                    confidence: 0.5,
                },
                category("technology", &["technology", "tech", "ai", "software"]),
                category("business", &["business", "economy", "finance", "market"]),
                category("sports", &["sports", "football", "cricket", "game"]),
                category("world", &["world", "international", "global"]),
                category("entertainment", &["entertainment", "movie", "music", "celebrity"]),
            ],
        }
    }
}

impl RuleTable {
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let table: RuleTable = serde_json::from_str(s)?;
        table.validate()?;
        Ok(table)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading fallback rules from {}", path.display()))?;
        Self::from_json_str(&data)
            .with_context(|| format!("parsing fallback rules from {}", path.display()))
    }

    /// `$FALLBACK_RULES_PATH`, then `config/fallback_rules.json`, then the built-in table.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(p) = std::env::var(ENV_RULES_PATH) {
            return Self::load_from_file(PathBuf::from(p));
        }
        let default_path = Path::new(DEFAULT_RULES_PATH);
        if default_path.exists() {
            return Self::load_from_file(default_path);
        }
        Ok(Self::default())
    }

    fn validate(&self) -> anyhow::Result<()> {
        for rule in &self.rules {
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                bail!("fallback rule `{}` has no keywords", rule.name);
            }
            if !(0.0..=1.0).contains(&rule.confidence) {
                bail!("fallback rule `{}` confidence out of [0,1]", rule.name);
            }
            if let Intent::Unrecognized(raw) = &rule.intent {
                bail!("fallback rule `{}` has unknown intent `{raw}`", rule.name);
            }
        }
        Ok(())
    }
}

/// Compiled keyword classifier. Never fails and performs no I/O.
#[derive(Debug, Clone)]
pub struct FallbackClassifier {
    table: RuleTable,
}

impl Default for FallbackClassifier {
    fn default() -> Self {
        Self::new(RuleTable::default())
    }
}

impl FallbackClassifier {
    pub fn new(table: RuleTable) -> Self {
        info!(version = table.version, rules = table.rules.len(), "fallback rule table ready");
        Self { table }
    }

    pub fn version(&self) -> u32 {
        self.table.version
    }

    /// Classify `query`. Matching runs on the lower-cased text; the search default
    /// echoes the original (trimmed) text. `location` is attached to the result.
    pub fn classify(&self, query: &str, location: Option<GeoPoint>) -> Analysis {
        let original = query.trim();
        let lowered = original.to_lowercase();
        let words: HashSet<&str> = WORD_RE.find_iter(&lowered).map(|m| m.as_str()).collect();

        let hit = self
            .table
            .rules
            .iter()
            .filter(|rule| rule.intent != Intent::Nearby || location.is_some())
            .find(|rule| {
                rule.keywords.iter().any(|kw| {
                    let kw = kw.trim().to_lowercase();
                    match kw.chars().count() {
                        0 => false,
                        n if n <= WHOLE_WORD_MAX_CHARS => words.contains(kw.as_str()),
                        _ => lowered.contains(&kw),
                    }
                })
            });

        match hit {
            Some(rule) => {
                let mut entities = BTreeMap::new();
                if !rule.topics.is_empty() {
                    entities.insert("topics".to_string(), rule.topics.clone());
                }
                Analysis {
                    intent: rule.intent.clone(),
                    entities,
                    parameters: rule.parameters.clone(),
                    confidence: rule.confidence,
                    reasoning: format!("Fallback analysis: matched {} keywords", rule.name),
                    source: AnalysisSource::Fallback,
                    intent_confidences: BTreeMap::new(),
                    location,
                    query: original.to_string(),
                }
            }
            None => Analysis {
                intent: Intent::Search,
                entities: BTreeMap::new(),
                parameters: AnalysisParameters {
                    query: Some(original.to_string()),
                    ..AnalysisParameters::default()
                },
                confidence: DEFAULT_SEARCH_CONFIDENCE,
                reasoning: "Unable to classify - defaulting to full-text search".to_string(),
                source: AnalysisSource::Fallback,
                intent_confidences: BTreeMap::new(),
                location,
                query: original.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technology_news_maps_to_technology_category() {
        let a = FallbackClassifier::default().classify("technology news", None);
        assert_eq!(a.intent, Intent::Category);
        assert_eq!(a.parameters.category.as_deref(), Some("technology"));
        assert_eq!(a.confidence, 0.6);
        assert_eq!(a.source, AnalysisSource::Fallback);
        assert_eq!(a.first_entity("topics"), Some("technology"));
    }

    #[test]
    fn plurals_and_compounds_match_by_substring() {
        let c = FallbackClassifier::default();
        for (query, category) in [
            ("stock markets today", "business"),
            ("video games review", "sports"),
            ("movies this week", "entertainment"),
            ("fintech funding", "technology"),
        ] {
            let a = c.classify(query, None);
            assert_eq!(a.intent, Intent::Category, "{query}");
            assert_eq!(a.parameters.category.as_deref(), Some(category), "{query}");
        }
    }

    #[test]
    fn two_letter_keywords_need_a_whole_word() {
        let c = FallbackClassifier::default();
        // "said" contains "ai" but is not the word "ai"
        let a = c.classify("What the minister said today", None);
        assert_eq!(a.intent, Intent::Search);
        let b = c.classify("New AI chips", None);
        assert_eq!(b.parameters.category.as_deref(), Some("technology"));
    }

    #[test]
    fn first_rule_in_table_order_wins() {
        // both "tech" and "market" present; technology precedes business
        let a = FallbackClassifier::default().classify("tech market update", None);
        assert_eq!(a.parameters.category.as_deref(), Some("technology"));
        let here = GeoPoint { lat: 40.7, lon: -74.0 };
        let n = FallbackClassifier::default().classify("football news near me", Some(here));
        assert_eq!(n.intent, Intent::Nearby);
        assert_eq!(n.location, Some(here));
    }

    #[test]
    fn proximity_rule_needs_a_location() {
        let c = FallbackClassifier::default();
        let a = c.classify("technology news around the world", None);
        assert_eq!(a.intent, Intent::Category);
        assert_eq!(a.parameters.category.as_deref(), Some("technology"));

        let b = c.classify("events near me", None);
        assert_eq!(b.intent, Intent::Search);
        assert!(b.location.is_none());
    }

    #[test]
    fn no_match_defaults_to_search_on_original_text() {
        let a = FallbackClassifier::default().classify("  Elon Musk Twitter  ", None);
        assert_eq!(a.intent, Intent::Search);
        assert_eq!(a.parameters.query.as_deref(), Some("Elon Musk Twitter"));
        assert_eq!(a.confidence, DEFAULT_SEARCH_CONFIDENCE);
    }

    #[test]
    fn classification_is_stable_across_calls() {
        let c = FallbackClassifier::default();
        assert_eq!(c.classify("Cricket scores", None), c.classify("Cricket scores", None));
    }

    #[test]
    fn table_loads_from_json_and_validates() {
        let t = RuleTable::from_json_str(
            r#"{"version": 7, "rules": [
                {"name": "reuters", "keywords": ["reuters"], "intent": "source",
                 "parameters": {"source": "Reuters"}, "confidence": 0.55}
            ]}"#,
        )
        .unwrap();
        let c = FallbackClassifier::new(t);
        assert_eq!(c.version(), 7);
        let a = c.classify("latest from Reuters", None);
        assert_eq!(a.intent, Intent::Source);
        assert_eq!(a.parameters.source.as_deref(), Some("Reuters"));
        assert_eq!(a.confidence, 0.55);

        let bad = r#"{"version": 1, "rules": [
            {"name": "x", "keywords": ["x"], "intent": "weather", "confidence": 0.5}
        ]}"#;
        assert!(RuleTable::from_json_str(bad).is_err());
    }
}
