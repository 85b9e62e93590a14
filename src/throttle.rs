//! Rate limiting for login submissions.
//!
//! Keeps a fixed window counter per client address so confirmation codes
//! cannot be guessed by brute force.

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::session::client_addr;
use crate::state::AppState;

/// Rate limiter state
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Map of key to (request count, window start)
    requests: Arc<RwLock<HashMap<String, (u32, Instant)>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Returns true if the request is allowed
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        match requests.get_mut(key) {
            Some((count, window_start)) => {
                if now.duration_since(*window_start) >= self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_requests {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                requests.insert(key.to_string(), (1, now));
                true
            }
        }
    }

    /// Drop entries whose window has long passed
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, (_, window_start)| now.duration_since(*window_start) < self.window * 2);
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn rate_limited(retry_after: Duration) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (header::RETRY_AFTER, retry_after.as_secs().max(1).to_string()),
        ],
        "Too many login attempts. Please wait and try again.",
    )
        .into_response()
}

/// Middleware limiting `POST /login` per client address
pub async fn login_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let Some(limiter) = &state.login_limiter else {
        return next.run(request).await;
    };
    if request.method() != Method::POST || request.uri().path() != "/login" {
        return next.run(request).await;
    }

    if let Some(addr) = client_addr(&request, state.config.trust_proxy) {
        if !limiter.check(&addr).await {
            tracing::warn!(addr, "Login rate limited");
            return rate_limited(limiter.window());
        }
    }

    next.run(request).await
}

/// Spawn a background task that periodically prunes the limiter
pub fn spawn_limiter_cleanup(limiter: RateLimiter) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(limiter.window() * 2).await;
            limiter.cleanup().await;
        }
    });
}
