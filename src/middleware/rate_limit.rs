//! Per-IP sliding-window-with-burst rate limiting for the push API (spec §6
//! ambient stack: the operator surface gets the same edge protection the
//! teacher puts in front of its public HTTP API).

use crate::config::RateLimitConfig;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    fn check(&self, ip: IpAddr) -> RateLimitResult {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.window();

        let entry = state.entry(ip).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        let limit = self.config.max_requests + self.config.burst;
        let remaining = limit.saturating_sub(entry.count);
        let reset_at = entry.window_start + window;

        if entry.count > limit {
            RateLimitResult::Exceeded {
                retry_after: reset_at.duration_since(now),
            }
        } else if entry.count > self.config.max_requests {
            RateLimitResult::BurstUsed { remaining }
        } else {
            RateLimitResult::Allowed { remaining }
        }
    }

    /// Periodic cleanup of stale entries; call from a background task.
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.window();
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

enum RateLimitResult {
    Allowed { remaining: u32 },
    BurstUsed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();

    match limiter.check(ip) {
        RateLimitResult::Allowed { .. } | RateLimitResult::BurstUsed { .. } => next.run(request).await,
        RateLimitResult::Exceeded { retry_after } => {
            warn!(ip = %ip, retry_after_secs = retry_after.as_secs(), "rate limit exceeded");
            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": "too many requests",
                "retry_after_seconds": retry_after.as_secs(),
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: max,
            window_secs: 60,
            burst,
        }
    }

    #[test]
    fn allows_requests_under_the_limit() {
        let limiter = RateLimitLayer::new(config(10, 5));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..10 {
            assert!(matches!(limiter.check(ip), RateLimitResult::Allowed { .. }));
        }
    }

    #[test]
    fn burst_then_hard_reject() {
        let limiter = RateLimitLayer::new(config(5, 3));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..5 {
            assert!(matches!(limiter.check(ip), RateLimitResult::Allowed { .. }));
        }
        for _ in 0..3 {
            assert!(matches!(limiter.check(ip), RateLimitResult::BurstUsed { .. }));
        }
        assert!(matches!(limiter.check(ip), RateLimitResult::Exceeded { .. }));
    }
}
