//! Per-client token-bucket request limiter for `/offer`

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum spacing between idle-bucket sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Token bucket refilled continuously at `rate` tokens per second
///
/// The bucket starts full. Its capacity is `max(1, ceil(rate))`, so short
/// bursts up to one second's worth of requests are admitted.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket admitting `rate` requests per second.
    ///
    /// `rate` must be positive.
    pub fn new(rate: f64) -> Self {
        Self::new_at(rate, Instant::now())
    }

    fn new_at(rate: f64, now: Instant) -> Self {
        let capacity = rate.ceil().max(1.0);
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Take one token if available
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// A bucket that would be full again is indistinguishable from a new one
    fn is_idle_at(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * self.rate >= self.capacity
    }
}

/// One [`TokenBucket`] per client address
///
/// Buckets that have refilled completely are evicted, so the table only
/// holds clients that are currently being throttled.
#[derive(Debug)]
pub struct ClientRateLimiter {
    rate: f64,
    state: Mutex<ClientBuckets>,
}

#[derive(Debug)]
struct ClientBuckets {
    buckets: HashMap<IpAddr, TokenBucket>,
    last_sweep: Instant,
}

impl ClientRateLimiter {
    /// Admit `rate` requests per second from each client
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            state: Mutex::new(ClientBuckets {
                buckets: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Take one token from `client`'s bucket if available
    pub fn try_acquire(&self, client: IpAddr) -> bool {
        self.try_acquire_at(client, Instant::now())
    }

    fn try_acquire_at(&self, client: IpAddr, now: Instant) -> bool {
        let mut state = self.state.lock();

        if now.saturating_duration_since(state.last_sweep) >= SWEEP_INTERVAL {
            state.buckets.retain(|_, bucket| !bucket.is_idle_at(now));
            state.last_sweep = now;
        }

        let rate = self.rate;
        state
            .buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new_at(rate, now))
            .try_acquire_at(now)
    }
}

/// Resolve the client address: the connection peer first, then the
/// `X-Forwarded-For` and `X-Real-IP` headers.
///
/// Requests with no usable address share one bucket.
pub fn client_ip(connect_info: Option<SocketAddr>, headers: &HeaderMap) -> IpAddr {
    if let Some(addr) = connect_info {
        return addr.ip();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Middleware rejecting requests with `429` once the client's bucket is empty
pub async fn limit_requests(
    State(limiter): State<Arc<ClientRateLimiter>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(connect_info.map(|ConnectInfo(addr)| addr), request.headers());

    if !limiter.try_acquire(client) {
        debug!(client = %client, uri = %request.uri(), "Request rate exceeded");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    next.run(request).await
}
