// src/lib.rs
// Public library surface for integration tests and the Shuttle entrypoint.

pub mod api;
pub mod articles;
pub mod config;
pub mod error;
pub mod query;
pub mod store;
pub mod telemetry;

// `news_router::router` as well as `news_router::api::router`
pub use crate::api::{router, AppState};
pub use crate::error::ApiError;

use tracing::info;

/// Build the full application from config files and environment.
pub async fn app() -> anyhow::Result<axum::Router> {
    let state = AppState::from_env()?;
    info!("router assembled");
    Ok(router(state))
}
