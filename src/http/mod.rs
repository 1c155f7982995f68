pub mod adaptive;

use crate::config::HttpConfig;
use adaptive::{AdaptiveRateLimitMiddleware, AdaptiveRateLimiter};
use reqwest_middleware::ClientBuilder;
use std::sync::Arc;

/// Builds the shared HTTP client used by `SourceRegistry` and `SlotFetcher`, wrapped
/// in the adaptive rate limit middleware.
pub fn build_client(cfg: &HttpConfig) -> anyhow::Result<reqwest_middleware::ClientWithMiddleware> {
    let limiter = Arc::new(AdaptiveRateLimiter::new(cfg));

    let inner = reqwest::Client::builder()
        .timeout(cfg.timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;

    Ok(ClientBuilder::new(inner)
        .with(AdaptiveRateLimitMiddleware::new(limiter))
        .build())
}
