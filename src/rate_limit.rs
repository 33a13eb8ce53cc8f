// =============================================================================
// RATE LIMITING
// =============================================================================
// Fixed one-minute windows per client and per route class.
//
//   client key : user:<id>  (valid bearer token)
//                ip:<addr>  (X-Forwarded-For, then the socket peer)
//   counter    : rate_limit:<class>:<client>:<window>  in Redis, INCR + EXPIRE
//
// LEARNING NOTES:
// - When Redis errors the limiter keeps working from an in-process map, so
//   limits still hold per instance
// - Requests over the limit get 429 with a Retry-After header
// =============================================================================

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::warn;

use crate::auth::bearer_token;
use crate::clock::Clock;
use crate::error::AppError;
use crate::metrics;
use crate::AppState;

/// Length of one counting window
pub const WINDOW_SECS: u64 = 60;

/// Stale in-memory windows are swept once the map grows past this
const MEMORY_SWEEP_THRESHOLD: usize = 10_000;

// -----------------------------------------------------------------------------
// ROUTE CLASSES
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitClass {
    Auth,
    Admin,
    Health,
    Read,
    Write,
    Other,
}

impl LimitClass {
    pub fn classify(method: &Method, path: &str) -> Self {
        if path.contains("/auth/") {
            LimitClass::Auth
        } else if path.contains("/admin/") {
            LimitClass::Admin
        } else if path.starts_with("/health") || path.starts_with("/ready") || path.starts_with("/metrics")
        {
            LimitClass::Health
        } else if method == Method::GET || method == Method::HEAD {
            LimitClass::Read
        } else if method == Method::POST
            || method == Method::PUT
            || method == Method::PATCH
            || method == Method::DELETE
        {
            LimitClass::Write
        } else {
            LimitClass::Other
        }
    }

    /// Requests allowed per window
    pub fn limit(&self) -> u64 {
        match self {
            LimitClass::Auth => 5,
            LimitClass::Admin => 10,
            LimitClass::Health => 1000,
            LimitClass::Read => 200,
            LimitClass::Write => 50,
            LimitClass::Other => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Auth => "auth",
            LimitClass::Admin => "admin",
            LimitClass::Health => "health",
            LimitClass::Read => "read",
            LimitClass::Write => "write",
            LimitClass::Other => "other",
        }
    }
}

/// Result of counting one request (or peeking at the counter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the current window closes
    pub reset_after: u64,
}

impl Decision {
    fn from_count(count: u64, limit: u64, now_secs: u64) -> Self {
        Self {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_after: WINDOW_SECS - now_secs % WINDOW_SECS,
        }
    }
}

fn window_index(now_secs: u64) -> u64 {
    now_secs / WINDOW_SECS
}

// -----------------------------------------------------------------------------
// IN-PROCESS FALLBACK
// -----------------------------------------------------------------------------
#[derive(Default)]
pub struct MemoryWindows {
    /// counter key -> (window index, count)
    windows: Mutex<HashMap<String, (u64, u64)>>,
}

impl MemoryWindows {
    pub fn hit(&self, key: &str, limit: u64, now_secs: u64) -> Decision {
        let window = window_index(now_secs);
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if windows.len() > MEMORY_SWEEP_THRESHOLD {
            windows.retain(|_, (w, _)| *w == window);
        }
        let slot = windows.entry(key.to_string()).or_insert((window, 0));
        if slot.0 != window {
            *slot = (window, 0);
        }
        slot.1 += 1;
        Decision::from_count(slot.1, limit, now_secs)
    }

    pub fn peek(&self, key: &str, limit: u64, now_secs: u64) -> Decision {
        let window = window_index(now_secs);
        let count = match self.windows.lock() {
            Ok(guard) => guard.get(key).filter(|(w, _)| *w == window).map(|(_, c)| *c),
            Err(poisoned) => poisoned
                .into_inner()
                .get(key)
                .filter(|(w, _)| *w == window)
                .map(|(_, c)| *c),
        };
        Decision::from_count(count.unwrap_or(0), limit, now_secs)
    }
}

// -----------------------------------------------------------------------------
// LIMITER
// -----------------------------------------------------------------------------
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    fallback: MemoryWindows,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(redis: Option<ConnectionManager>, enabled: bool) -> Self {
        Self {
            redis,
            fallback: MemoryWindows::default(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn counter_key(client: &str, class: LimitClass, now_secs: u64) -> String {
        format!(
            "rate_limit:{}:{client}:{}",
            class.as_str(),
            window_index(now_secs)
        )
    }

    /// Count one request for `client` against its class limit
    pub async fn check(&self, client: &str, class: LimitClass, now_secs: u64) -> Decision {
        let key = Self::counter_key(client, class, now_secs);
        let limit = class.limit();

        if let Some(redis) = &self.redis {
            let start = Instant::now();
            let counted: redis::RedisResult<(u64,)> = redis::pipe()
                .atomic()
                .cmd("INCR")
                .arg(&key)
                .cmd("EXPIRE")
                .arg(&key)
                .arg(WINDOW_SECS)
                .ignore()
                .query_async(&mut redis.clone())
                .await;
            metrics::record_redis_operation("incr", start.elapsed().as_secs_f64());
            match counted {
                Ok((count,)) => return Decision::from_count(count, limit, now_secs),
                Err(e) => warn!(error = %e, "Rate limit counter unavailable, using local window"),
            }
        }
        self.fallback.hit(&key, limit, now_secs)
    }

    /// Current standing without counting a request
    pub async fn status(&self, client: &str, class: LimitClass, now_secs: u64) -> Decision {
        let key = Self::counter_key(client, class, now_secs);
        let limit = class.limit();

        if let Some(redis) = &self.redis {
            let count: redis::RedisResult<Option<u64>> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut redis.clone())
                .await;
            if let Ok(count) = count {
                return Decision::from_count(count.unwrap_or(0), limit, now_secs);
            }
        }
        self.fallback.peek(&key, limit, now_secs)
    }
}

// -----------------------------------------------------------------------------
// CLIENT IDENTIFICATION
// -----------------------------------------------------------------------------

/// First address of X-Forwarded-For, else the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// `user:<id>` for a valid bearer token, `ip:<addr>` otherwise
pub fn client_key(state: &AppState, request: &Request) -> String {
    let user_id = bearer_token(request.headers())
        .and_then(|token| state.jwt.validate_token(token).ok())
        .map(|claims| claims.sub);
    match user_id {
        Some(id) => format!("user:{id}"),
        None => {
            let peer = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0);
            format!("ip:{}", client_ip(request.headers(), peer))
        }
    }
}

// -----------------------------------------------------------------------------
// MIDDLEWARE
// -----------------------------------------------------------------------------
pub async fn enforce(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(request).await;
    }

    let class = LimitClass::classify(request.method(), request.uri().path());
    let client = client_key(&state, &request);
    let now_secs = state.clock.now().timestamp().max(0) as u64;
    let decision = state.limiter.check(&client, class, now_secs).await;

    if !decision.allowed {
        metrics::record_rate_limit_rejection(class.as_str());
        warn!(
            client = %client,
            class = class.as_str(),
            path = %request.uri().path(),
            retry_after = decision.reset_after,
            "Rate limit exceeded"
        );
        return AppError::RateLimited {
            retry_after_secs: decision.reset_after,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_fall_into_classes() {
        let cases = [
            (Method::POST, "/api/v1/auth/login", LimitClass::Auth),
            (Method::GET, "/api/v1/orders/admin/all", LimitClass::Admin),
            (Method::GET, "/health", LimitClass::Health),
            (Method::GET, "/metrics", LimitClass::Health),
            (Method::GET, "/api/v1/products", LimitClass::Read),
            (Method::HEAD, "/api/v1/products", LimitClass::Read),
            (Method::POST, "/api/v1/cart/add", LimitClass::Write),
            (Method::DELETE, "/api/v1/cart/clear", LimitClass::Write),
            (Method::OPTIONS, "/api/v1/products", LimitClass::Other),
        ];
        for (method, path, expected) in cases {
            assert_eq!(LimitClass::classify(&method, path), expected, "{method} {path}");
        }
    }

    #[test]
    fn memory_window_blocks_after_limit_and_resets() {
        let windows = MemoryWindows::default();
        let now = 1_700_000_000 - 1_700_000_000 % WINDOW_SECS;

        for i in 1..=5 {
            let decision = windows.hit("ip:10.0.0.1", 5, now + 10);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 5 - i);
        }
        let blocked = windows.hit("ip:10.0.0.1", 5, now + 20);
        assert!(!blocked.allowed);
        assert_eq!(blocked.reset_after, WINDOW_SECS - 20);

        // Other clients have their own counter
        assert!(windows.hit("ip:10.0.0.2", 5, now + 20).allowed);

        // Next window starts from zero
        let fresh = windows.hit("ip:10.0.0.1", 5, now + WINDOW_SECS);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
    }

    #[test]
    fn peek_does_not_count() {
        let windows = MemoryWindows::default();
        windows.hit("k", 10, 120);
        assert_eq!(windows.peek("k", 10, 125).remaining, 9);
        assert_eq!(windows.peek("k", 10, 125).remaining, 9);
        assert_eq!(windows.peek("k", 10, 185).remaining, 10);
    }

    #[tokio::test]
    async fn limiter_without_redis_uses_local_windows() {
        let limiter = RateLimiter::new(None, true);
        for _ in 0..LimitClass::Auth.limit() {
            assert!(limiter.check("ip:1.2.3.4", LimitClass::Auth, 600).await.allowed);
        }
        assert!(!limiter.check("ip:1.2.3.4", LimitClass::Auth, 601).await.allowed);
        // Classes are counted separately
        assert!(limiter.check("ip:1.2.3.4", LimitClass::Read, 601).await.allowed);
        assert_eq!(
            limiter.status("ip:1.2.3.4", LimitClass::Read, 602).await.remaining,
            199
        );
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let peer: SocketAddr = "192.168.1.5:40000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "192.168.1.5");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }
}
