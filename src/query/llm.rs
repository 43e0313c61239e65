// src/query/llm.rs
//! LLM collaborator: provider abstraction, reply validation and the query analyzer
//! that falls back to keyword rules on any failure.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::query::fallback::FallbackClassifier;
use crate::query::model::{Analysis, AnalysisParameters, AnalysisSource, Endpoint, GeoPoint, Intent};
use crate::telemetry::{self, query_id};

/// Forces a deterministic provider regardless of config: `mock`, `error` or `timeout`.
pub const ENV_LLM_TEST_MODE: &str = "LLM_TEST_MODE";

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a news query analyzer. Analyze user queries and extract structured information.

Return ONLY a JSON object with the following structure:
{
    "intent": "category|search|source|score|nearby|mixed",
    "entities": {
        "people": ["person1"],
        "organizations": ["org1"],
        "locations": ["location1"],
        "topics": ["topic1"]
    },
    "parameters": {
        "category": "technology|business|sports|world|entertainment|national",
        "search_terms": ["term1", "term2"],
        "source": "source_name",
        "min_score": 0.0,
        "location": {"lat": 0.0, "lon": 0.0, "radius_km": 10.0}
    },
    "intent_confidences": {"category": 0.0, "source": 0.0, "search": 0.0, "score": 0.0, "nearby": 0.0},
    "confidence": 0.0,
    "reasoning": "explanation of analysis"
}

Guidelines:
- intent: the primary intent; use "mixed" when several filters apply together
- entities: key entities mentioned in the query
- parameters: only the values needed for the chosen filters
- intent_confidences: only for "mixed", one score per applicable filter
- location: geocode places when possible, or use the provided user location
- confidence: your confidence in the analysis (0.0-1.0)"#;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a news article summarizer. Summarize in 2-3 sentences, under 150 words, focusing on key facts, impact and main stakeholders. Return only the summary text, no formatting.";

/// Why an LLM call produced no usable result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmFailure {
    #[error("llm disabled")]
    Disabled,
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm returned status {0}")]
    Status(u16),
    #[error("malformed llm reply: {0}")]
    Malformed(String),
}

impl LlmFailure {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmFailure::Disabled => "disabled",
            LlmFailure::Timeout(_) => "timeout",
            LlmFailure::Transport(_) => "transport",
            LlmFailure::Status(_) => "status",
            LlmFailure::Malformed(_) => "malformed",
        }
    }
}

pub type LlmFuture<'a> = Pin<Box<dyn Future<Output = Result<String, LlmFailure>> + Send + 'a>>;

/// Text-in/text-out language model. One call per invocation, no retries.
pub trait LlmProvider: Send + Sync {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> LlmFuture<'a>;
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynLlm = Arc<dyn LlmProvider>;

/// Factory: build a provider according to config and environment.
///
/// * `LLM_TEST_MODE=mock|error|timeout` returns a deterministic scripted provider.
/// * Else if `config.enabled == false`, returns a disabled provider.
/// * Else builds the configured provider.
pub fn build_provider(config: &LlmConfig) -> anyhow::Result<DynLlm> {
    match std::env::var(ENV_LLM_TEST_MODE).ok().as_deref() {
        Some("mock") => return Ok(Arc::new(ScriptedProvider::mock())),
        Some("error") => {
            return Ok(Arc::new(ScriptedProvider::failing(LlmFailure::Status(500))))
        }
        Some("timeout") => {
            return Ok(Arc::new(
                ScriptedProvider::mock().with_delay(Duration::from_secs(config.timeout_secs + 5)),
            ))
        }
        _ => {}
    }

    if !config.enabled {
        return Ok(Arc::new(DisabledProvider));
    }
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(ScriptedProvider::mock())),
        _ => Ok(Arc::new(OpenAiProvider::new(config)?)),
    }
}

// ------------------------------------------------------------
// Providers
// ------------------------------------------------------------

/// OpenAI-compatible chat completions endpoint.
pub struct OpenAiProvider {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("news-router/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/chat/completions", config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> LlmFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(LlmFailure::Disabled);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: String,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: system,
                    },
                    Msg {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let resp = self
                .http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LlmFailure::Timeout(Duration::ZERO)
                    } else {
                        LlmFailure::Transport(e.to_string())
                    }
                })?;

            if !resp.status().is_success() {
                return Err(LlmFailure::Status(resp.status().as_u16()));
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| LlmFailure::Malformed(e.to_string()))?;
            body.choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| LlmFailure::Malformed("no choices in reply".to_string()))
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Always fails with `Disabled`; used when the LLM is turned off.
pub struct DisabledProvider;

impl LlmProvider for DisabledProvider {
    fn complete<'a>(&'a self, _system: &'a str, _user: &'a str) -> LlmFuture<'a> {
        Box::pin(async { Err(LlmFailure::Disabled) })
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

type Script = dyn Fn(&str, &str) -> Result<String, LlmFailure> + Send + Sync;

/// Deterministic provider for tests and local runs. Counts its invocations.
pub struct ScriptedProvider {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, LlmFailure> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Same reply to every prompt.
    pub fn replying(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    pub fn failing(failure: LlmFailure) -> Self {
        Self::new(move |_, _| Err(failure.clone()))
    }

    /// Generic search analysis for analysis prompts, a fixed sentence for summaries.
    pub fn mock() -> Self {
        Self::new(|system, _| {
            if system == ANALYSIS_SYSTEM_PROMPT {
                Ok(r#"{"intent":"search","entities":{},"parameters":{},"confidence":0.5,"reasoning":"mock analysis"}"#.to_string())
            } else {
                Ok("Mock summary of the article.".to_string())
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for ScriptedProvider {
    fn complete<'a>(&'a self, system: &'a str, user: &'a str) -> LlmFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            (self.script)(system, user)
        })
    }
    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ------------------------------------------------------------
// Reply validation
// ------------------------------------------------------------

/// Entity values arrive either as a list or a single string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntityValue {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawReply {
    intent: Option<String>,
    #[serde(default)]
    entities: BTreeMap<String, EntityValue>,
    #[serde(default)]
    parameters: AnalysisParameters,
    confidence: Option<f64>,
    reasoning: Option<String>,
    #[serde(default)]
    intent_confidences: BTreeMap<String, f64>,
}

/// A reply that passed validation. Nothing partially validated leaves this module.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReply {
    pub intent: Intent,
    pub entities: BTreeMap<String, Vec<String>>,
    pub parameters: AnalysisParameters,
    pub confidence: f64,
    pub reasoning: String,
    pub intent_confidences: BTreeMap<Endpoint, f64>,
}

/// Pull the JSON object out of a reply that may be wrapped in prose or code fences.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn in_unit_range(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

pub fn parse_reply(text: &str) -> Result<ValidatedReply, LlmFailure> {
    let json = extract_json(text)
        .ok_or_else(|| LlmFailure::Malformed("no JSON object in reply".to_string()))?;
    let raw: RawReply =
        serde_json::from_str(json).map_err(|e| LlmFailure::Malformed(e.to_string()))?;

    let intent = raw
        .intent
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LlmFailure::Malformed("missing intent".to_string()))?;
    let confidence = raw
        .confidence
        .ok_or_else(|| LlmFailure::Malformed("missing confidence".to_string()))?;
    if !in_unit_range(confidence) {
        return Err(LlmFailure::Malformed(format!(
            "confidence {confidence} outside [0,1]"
        )));
    }
    let reasoning = raw
        .reasoning
        .ok_or_else(|| LlmFailure::Malformed("missing reasoning".to_string()))?;
    let params = &raw.parameters;
    if let Some(loc) = &params.location {
        if !(GeoPoint { lat: loc.lat, lon: loc.lon }).is_valid() {
            return Err(LlmFailure::Malformed("location out of range".to_string()));
        }
    }
    if let Some(s) = params.min_score {
        if !in_unit_range(s) {
            return Err(LlmFailure::Malformed(format!("min_score {s} outside [0,1]")));
        }
    }
    let radii = [params.radius_km, params.location.and_then(|l| l.radius_km)];
    if let Some(r) = radii.into_iter().flatten().find(|r| !(r.is_finite() && *r > 0.0)) {
        return Err(LlmFailure::Malformed(format!("radius_km {r} is not positive")));
    }

    let entities = raw
        .entities
        .into_iter()
        .map(|(k, v)| {
            let values = match v {
                EntityValue::One(s) => vec![s],
                EntityValue::Many(v) => v,
            };
            (k, values)
        })
        .filter(|(_, v)| !v.is_empty())
        .collect();

    // Unknown endpoint names and out-of-range scores are dropped, not fatal.
    let intent_confidences = raw
        .intent_confidences
        .into_iter()
        .filter(|(_, c)| in_unit_range(*c))
        .filter_map(|(k, c)| {
            serde_json::from_value::<Endpoint>(serde_json::Value::String(k.to_ascii_lowercase()))
                .ok()
                .map(|e| (e, c))
        })
        .collect();

    Ok(ValidatedReply {
        intent: Intent::from(intent),
        entities,
        parameters: raw.parameters,
        confidence,
        reasoning,
        intent_confidences,
    })
}

fn user_prompt(query: &str, location: Option<GeoPoint>) -> String {
    let mut prompt = format!("Analyze this news query: '{query}'");
    if let Some(loc) = location {
        prompt.push_str(&format!(
            "\nUser location: {{\"lat\": {}, \"lon\": {}}}",
            loc.lat, loc.lon
        ));
    }
    prompt.push_str("\n\nProvide the JSON analysis as specified in the system prompt.");
    prompt
}

// ------------------------------------------------------------
// Analyzer
// ------------------------------------------------------------

/// Turns a query into an [`Analysis`], via the LLM when it answers properly and via
/// the keyword classifier otherwise. Never returns an error.
#[derive(Clone)]
pub struct QueryAnalyzer {
    llm: DynLlm,
    fallback: FallbackClassifier,
    timeout: Duration,
}

impl QueryAnalyzer {
    pub fn new(llm: DynLlm, fallback: FallbackClassifier, timeout: Duration) -> Self {
        Self {
            llm,
            fallback,
            timeout,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.llm.name()
    }

    pub async fn analyze(&self, query: &str, location: Option<GeoPoint>) -> Analysis {
        match self.analyze_with_llm(query, location).await {
            Ok(analysis) => analysis,
            Err(failure) => {
                if failure != LlmFailure::Disabled {
                    warn!(
                        id = %query_id(query),
                        provider = self.llm.name(),
                        reason = %failure,
                        "llm analysis failed; using keyword fallback"
                    );
                } else {
                    debug!(id = %query_id(query), "llm disabled; using keyword fallback");
                }
                telemetry::record_llm_fallback(failure.kind());
                self.fallback(query, location)
            }
        }
    }

    /// Keyword classification only, for when an LLM analysis cannot be used.
    pub fn fallback(&self, query: &str, location: Option<GeoPoint>) -> Analysis {
        self.fallback.classify(query, location)
    }

    async fn analyze_with_llm(
        &self,
        query: &str,
        location: Option<GeoPoint>,
    ) -> Result<Analysis, LlmFailure> {
        let prompt = user_prompt(query, location);
        let text = tokio::time::timeout(self.timeout, self.llm.complete(ANALYSIS_SYSTEM_PROMPT, &prompt))
            .await
            .map_err(|_| LlmFailure::Timeout(self.timeout))??;
        let reply = parse_reply(&text)?;
        debug!(id = %query_id(query), intent = %reply.intent, confidence = reply.confidence, "llm analysis ok");
        Ok(Analysis {
            intent: reply.intent,
            entities: reply.entities,
            parameters: reply.parameters,
            confidence: reply.confidence,
            reasoning: reply.reasoning,
            source: AnalysisSource::Llm,
            intent_confidences: reply.intent_confidences,
            location,
            query: query.trim().to_string(),
        })
    }

    /// Short article summary, or `None` when the LLM cannot provide one.
    pub async fn summarize(&self, title: &str, description: &str) -> Option<String> {
        let prompt = format!("Title: {title}\nDescription: {description}");
        let out = tokio::time::timeout(self.timeout, self.llm.complete(SUMMARY_SYSTEM_PROMPT, &prompt))
            .await
            .map_err(|_| LlmFailure::Timeout(self.timeout))
            .and_then(|r| r);
        match out {
            Ok(text) => {
                let cleaned = clean_summary(&text);
                (!cleaned.is_empty()).then_some(cleaned)
            }
            Err(LlmFailure::Disabled) => None,
            Err(e) => {
                debug!(reason = %e, "summary unavailable");
                None
            }
        }
    }
}

/// Drop code fences and collapse whitespace.
fn clean_summary(text: &str) -> String {
    text.lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .flat_map(|l| l.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}
