//! News Router: binary entrypoint
//! Boots the Axum HTTP server with the smart-query pipeline and filter endpoints.
//!
//! See `README.md` for configuration and endpoints.

use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    // Picks up LLM_API_KEY, NEWS_CONFIG_PATH and friends.
    let _ = dotenvy::dotenv();

    news_router::telemetry::init_tracing();

    let router = news_router::app().await?;
    Ok(router.into())
}
