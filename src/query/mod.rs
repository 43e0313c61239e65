// src/query/mod.rs
// Smart-query pipeline: intent analysis, routing, dispatch and response assembly.

pub mod cache;
pub mod dispatch;
pub mod fallback;
pub mod llm;
pub mod model;
pub mod response;
pub mod routing;
pub mod service;

pub use llm::{LlmProvider, QueryAnalyzer};
pub use model::{Analysis, Intent, Query};
pub use service::SmartQueryService;
