// src/query/routing.rs
//! Routing strategy builder: maps an [`Analysis`] onto the filter endpoint(s) to call.
//!
//! Pure and deterministic: the same analysis always yields the same strategy.
//!
//! | intent   | primary  | parameters                                         |
//! |----------|----------|----------------------------------------------------|
//! | category | category | `topics[0]`, else `parameters.category`            |
//! | search   | search   | `parameters.query`, else `search_terms`, else text |
//! | source   | source   | `parameters.source`, else `organizations[0]`       |
//! | score    | score    | `min_score` (default 0.7)                          |
//! | nearby   | nearby   | location + `radius_km` (default 10.0), required    |
//! | mixed    | best sub-confidence; the rest become secondaries           |
//!
//! Equal sub-confidences are broken by category > source > score > nearby > search.

use serde::Serialize;
use tracing::debug;

use crate::config::settings::RoutingDefaults;
use crate::query::model::{Analysis, Endpoint, Intent};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("unrecognized intent `{0}`")]
    Classification(String),
    #[error("{endpoint} routing requires `{parameter}`")]
    MissingParameter {
        endpoint: Endpoint,
        parameter: &'static str,
    },
    #[error("{0}")]
    InvalidParameter(String),
}

/// Resolved parameters for one filter call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EndpointParams {
    Category { category: String },
    Search { query: String },
    Source { source: String },
    Score { min_score: f64 },
    Nearby { lat: f64, lon: f64, radius_km: f64 },
}

impl EndpointParams {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            EndpointParams::Category { .. } => Endpoint::Category,
            EndpointParams::Search { .. } => Endpoint::Search,
            EndpointParams::Source { .. } => Endpoint::Source,
            EndpointParams::Score { .. } => Endpoint::Score,
            EndpointParams::Nearby { .. } => Endpoint::Nearby,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointCall {
    pub endpoint: Endpoint,
    pub parameters: EndpointParams,
}

impl From<EndpointParams> for EndpointCall {
    fn from(parameters: EndpointParams) -> Self {
        Self {
            endpoint: parameters.endpoint(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Single,
    Composite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingStrategy {
    pub primary_endpoint: Endpoint,
    pub secondary_endpoints: Vec<EndpointCall>,
    pub parameters: EndpointParams,
    pub strategy_type: StrategyType,
    /// Carried over verbatim from the analysis.
    pub confidence: f64,
}

impl RoutingStrategy {
    fn single(parameters: EndpointParams, confidence: f64) -> Self {
        Self {
            primary_endpoint: parameters.endpoint(),
            secondary_endpoints: Vec::new(),
            parameters,
            strategy_type: StrategyType::Single,
            confidence,
        }
    }

    pub fn primary(&self) -> EndpointCall {
        EndpointCall::from(self.parameters.clone())
    }

    /// Primary first, then secondaries in order.
    pub fn calls(&self) -> Vec<EndpointCall> {
        std::iter::once(self.primary())
            .chain(self.secondary_endpoints.iter().cloned())
            .collect()
    }
}

/// How hard a resolver tries: `Required` applies defaults and fallbacks,
/// `Explicit` only accepts parameters the analysis spelled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Required,
    Explicit,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingBuilder {
    defaults: RoutingDefaults,
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl RoutingBuilder {
    pub fn new(defaults: RoutingDefaults) -> Self {
        Self { defaults }
    }

    pub fn build(&self, analysis: &Analysis) -> Result<RoutingStrategy, RoutingError> {
        let endpoint = match &analysis.intent {
            Intent::Category => Endpoint::Category,
            Intent::Search => Endpoint::Search,
            Intent::Source => Endpoint::Source,
            Intent::Score => Endpoint::Score,
            Intent::Nearby => Endpoint::Nearby,
            Intent::Mixed => return self.build_composite(analysis),
            Intent::Unrecognized(raw) => return Err(RoutingError::Classification(raw.clone())),
        };
        let params = self
            .resolve(endpoint, analysis, Mode::Required)?
            .ok_or(RoutingError::MissingParameter {
                endpoint,
                parameter: required_parameter(endpoint),
            })?;
        Ok(RoutingStrategy::single(params, analysis.confidence))
    }

    fn build_composite(&self, analysis: &Analysis) -> Result<RoutingStrategy, RoutingError> {
        let mut candidates: Vec<(f64, EndpointParams)> = Vec::new();
        for endpoint in [
            Endpoint::Category,
            Endpoint::Source,
            Endpoint::Score,
            Endpoint::Nearby,
            Endpoint::Search,
        ] {
            let named = analysis.intent_confidences.contains_key(&endpoint);
            let params = match self.resolve(endpoint, analysis, Mode::Explicit)? {
                Some(p) => Some(p),
                None if named => match self.resolve(endpoint, analysis, Mode::Required) {
                    Ok(p) => p,
                    Err(RoutingError::MissingParameter { .. }) => None,
                    Err(e) => return Err(e),
                },
                None => None,
            };
            if let Some(p) = params {
                let sub = analysis
                    .intent_confidences
                    .get(&endpoint)
                    .copied()
                    .unwrap_or(analysis.confidence);
                candidates.push((sub, p));
            }
        }

        candidates.sort_by(|(ca, pa), (cb, pb)| {
            cb.total_cmp(ca).then_with(|| {
                pa.endpoint()
                    .tie_break_rank()
                    .cmp(&pb.endpoint().tie_break_rank())
            })
        });

        let mut it = candidates.into_iter().map(|(_, p)| p);
        let primary = it.next().ok_or_else(|| {
            RoutingError::Classification("mixed intent without any routable parameters".into())
        })?;
        let secondary: Vec<EndpointCall> = it.map(EndpointCall::from).collect();
        debug!(
            primary = %primary.endpoint(),
            secondaries = secondary.len(),
            "composite routing resolved"
        );

        let strategy_type = if secondary.is_empty() {
            StrategyType::Single
        } else {
            StrategyType::Composite
        };
        Ok(RoutingStrategy {
            primary_endpoint: primary.endpoint(),
            secondary_endpoints: secondary,
            parameters: primary,
            strategy_type,
            confidence: analysis.confidence,
        })
    }

    fn resolve(
        &self,
        endpoint: Endpoint,
        a: &Analysis,
        mode: Mode,
    ) -> Result<Option<EndpointParams>, RoutingError> {
        let p = &a.parameters;
        let required = mode == Mode::Required;
        Ok(match endpoint {
            Endpoint::Category => {
                let topic = if required { a.first_entity("topics") } else { None };
                non_empty(topic)
                    .or_else(|| non_empty(p.category.as_deref()))
                    .map(|category| EndpointParams::Category { category })
            }
            Endpoint::Search => non_empty(p.query.as_deref())
                .or_else(|| non_empty(Some(p.search_terms.join(" ").as_str())))
                .or_else(|| if required { non_empty(Some(a.query.as_str())) } else { None })
                .map(|query| EndpointParams::Search { query }),
            Endpoint::Source => {
                let org = if required { a.first_entity("organizations") } else { None };
                non_empty(p.source.as_deref())
                    .or_else(|| non_empty(org))
                    .map(|source| EndpointParams::Source { source })
            }
            Endpoint::Score => {
                let min_score = match (p.min_score, required) {
                    (Some(s), _) => Some(s),
                    (None, true) => Some(self.defaults.default_min_score),
                    (None, false) => None,
                };
                match min_score {
                    Some(s) if !(s.is_finite() && (0.0..=1.0).contains(&s)) => {
                        return Err(RoutingError::InvalidParameter(format!(
                            "min_score must be between 0 and 1, got {s}"
                        )))
                    }
                    other => other.map(|min_score| EndpointParams::Score { min_score }),
                }
            }
            Endpoint::Nearby => {
                let point = p
                    .location
                    .map(|l| (l.lat, l.lon, l.radius_km))
                    .or_else(|| {
                        if required {
                            a.location.map(|g| (g.lat, g.lon, None))
                        } else {
                            None
                        }
                    });
                match point {
                    None => None,
                    Some((lat, lon, radius)) => {
                        let radius_km = radius
                            .or(p.radius_km)
                            .unwrap_or(self.defaults.default_radius_km);
                        if !(radius_km > 0.0 && radius_km <= self.defaults.max_radius_km) {
                            return Err(RoutingError::InvalidParameter(format!(
                                "radius_km must be in (0, {}], got {radius_km}",
                                self.defaults.max_radius_km
                            )));
                        }
                        Some(EndpointParams::Nearby { lat, lon, radius_km })
                    }
                }
            }
        })
    }
}

fn required_parameter(endpoint: Endpoint) -> &'static str {
    match endpoint {
        Endpoint::Category => "category",
        Endpoint::Search => "query",
        Endpoint::Source => "source",
        Endpoint::Score => "min_score",
        Endpoint::Nearby => "location",
    }
}
