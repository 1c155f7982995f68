//! Adaptive, rate-limited HTTP fetching.
//!
//! A token bucket gates outbound requests; the bucket's refill rate shrinks on HTTP
//! error responses and grows on success, bounded by `[min_rate, max_rate]`. Transport
//! failures never touch the rate - only observed status codes do.

use crate::config::HttpConfig;
use async_trait::async_trait;
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Returned when a token wait or the request itself is aborted by cancellation.
#[derive(Debug, Error)]
#[error("request cancelled")]
pub struct Cancelled;

/// Token-bucket rate state, shared by all requests issued through one `AdaptiveFetcher`.
///
/// Rate updates race harmlessly across concurrent completions: last writer wins, per
/// the spec's explicit "no coordination" design note.
struct Bucket {
    rate: f64,
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate,
            tokens: capacity,
            capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

pub struct AdaptiveRateLimiter {
    bucket: Mutex<Bucket>,
    min_rate: f64,
    max_rate: f64,
    increase: f64,
    decrease: f64,
}

impl AdaptiveRateLimiter {
    pub fn new(cfg: &HttpConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket::new(cfg.min_rate, cfg.burst.max(1) as f64)),
            min_rate: cfg.min_rate,
            max_rate: cfg.max_rate,
            increase: cfg.increase,
            decrease: cfg.decrease,
        }
    }

    /// Blocks until a token is available, then consumes one. Returns `Err(Cancelled)`
    /// promptly if `cancel` fires while waiting on a refill.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().unwrap();
                bucket.refill();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / bucket.rate.max(f64::MIN_POSITIVE)))
                }
            };

            match wait {
                None => return Ok(()),
                Some(d) => {
                    tokio::select! {
                        _ = tokio::time::sleep(d) => {}
                        _ = cancel.cancelled() => return Err(Cancelled),
                    }
                }
            }
        }
    }

    /// Applies the grow/shrink rule for an observed response status.
    pub fn observe_status(&self, status: u16) {
        let mut bucket = self.bucket.lock().unwrap();
        bucket.refill();
        if status >= 400 {
            bucket.rate = (bucket.rate * self.decrease).max(self.min_rate);
        } else {
            bucket.rate = (bucket.rate * self.increase).min(self.max_rate);
        }
        trace!(rate = bucket.rate, status, "adaptive rate updated");
    }

    pub fn current_rate(&self) -> f64 {
        self.bucket.lock().unwrap().rate
    }
}

/// `reqwest_middleware::Middleware` wrapping a shared `AdaptiveRateLimiter`.
pub struct AdaptiveRateLimitMiddleware {
    limiter: std::sync::Arc<AdaptiveRateLimiter>,
}

impl AdaptiveRateLimitMiddleware {
    pub fn new(limiter: std::sync::Arc<AdaptiveRateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for AdaptiveRateLimitMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let cancel = extensions.get::<CancellationToken>().cloned().unwrap_or_default();

        if self.limiter.acquire(&cancel).await.is_err() {
            return Err(reqwest_middleware::Error::Middleware(anyhow::Error::new(
                Cancelled,
            )));
        }
        if cancel.is_cancelled() {
            return Err(reqwest_middleware::Error::Middleware(anyhow::Error::new(
                Cancelled,
            )));
        }

        let result = next.run(req, extensions).await;
        if let Ok(response) = &result {
            self.limiter.observe_status(response.status().as_u16());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min: f64, max: f64, inc: f64, dec: f64, start: f64) -> (HttpConfig, AdaptiveRateLimiter) {
        let cfg = HttpConfig {
            timeout: Duration::from_secs(10),
            min_rate: min,
            max_rate: max,
            burst: 1,
            increase: inc,
            decrease: dec,
        };
        let limiter = AdaptiveRateLimiter::new(&cfg);
        limiter.bucket.lock().unwrap().rate = start;
        (cfg, limiter)
    }

    #[test]
    fn rate_grows_on_success_and_caps_at_max() {
        let (_, limiter) = cfg(1.0, 10.0, 2.0, 0.5, 4.0);
        limiter.observe_status(200);
        assert_eq!(limiter.current_rate(), 8.0);
        limiter.observe_status(200);
        assert_eq!(limiter.current_rate(), 10.0);
        limiter.observe_status(200);
        assert_eq!(limiter.current_rate(), 10.0);
    }

    #[test]
    fn rate_shrinks_on_error_and_floors_at_min() {
        let (_, limiter) = cfg(1.0, 10.0, 2.0, 0.5, 10.0);
        limiter.observe_status(500);
        assert_eq!(limiter.current_rate(), 5.0);
        limiter.observe_status(429);
        assert_eq!(limiter.current_rate(), 2.5);
        for _ in 0..10 {
            limiter.observe_status(500);
        }
        assert_eq!(limiter.current_rate(), 1.0);
    }

    #[test]
    fn literal_scenario_rate_adapts_down_then_up() {
        let (_, limiter) = cfg(1.0, 10.0, 2.0, 0.5, 4.0);
        limiter.observe_status(200);
        assert_eq!(limiter.current_rate(), 8.0);
        limiter.observe_status(200);
        assert_eq!(limiter.current_rate(), 10.0);
        limiter.observe_status(200);
        assert_eq!(limiter.current_rate(), 10.0);
        limiter.observe_status(500);
        assert_eq!(limiter.current_rate(), 5.0);
        limiter.observe_status(429);
        assert_eq!(limiter.current_rate(), 2.5);
        limiter.observe_status(200);
        assert_eq!(limiter.current_rate(), 5.0);
    }

    #[test]
    fn rate_never_leaves_bounds() {
        let (_, limiter) = cfg(2.0, 20.0, 3.0, 0.1, 2.0);
        for _ in 0..50 {
            limiter.observe_status(200);
        }
        assert!(limiter.current_rate() <= 20.0);
        for _ in 0..50 {
            limiter.observe_status(500);
        }
        assert!(limiter.current_rate() >= 2.0);
    }

    #[tokio::test]
    async fn acquire_returns_immediately_when_tokens_available() {
        let (_, limiter) = cfg(1.0, 1.0, 1.0, 1.0, 1.0);
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn acquire_returns_cancelled_promptly_instead_of_waiting_out_the_refill() {
        let (_, limiter) = cfg(0.001, 1.0, 1.0, 1.0, 0.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), limiter.acquire(&cancel))
            .await
            .expect("acquire did not return promptly after cancellation");
        assert!(result.is_err());
    }
}
