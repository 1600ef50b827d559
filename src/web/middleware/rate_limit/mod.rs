//! Inbound HTTP rate limiting with per-IP token buckets.
//!
//! Three layers are evaluated for every request and the longest wait wins:
//!
//! 1. **Global per-IP** -- burst (5s) + sustained (1min)
//! 2. **Route-group** -- sustained (1min) + long-term (30min) for API/admin
//! 3. **Endpoint-specific** -- tight budgets on the one-time-code endpoints
//!
//! The OTP buckets sit in front of the per-phone limits enforced in the
//! database, so a single address cannot spray codes at many numbers.

use crate::web::middleware::client_ip;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::Response;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter, clock::Clock};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RouteGroup {
    Api,
    Admin,
    /// Health/status probes -- no route-group limiting.
    Internal,
}

/// Endpoints with their own tight limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TrackedEndpoint {
    OtpRequest,
    OtpVerify,
    Checkout,
}

fn classify_route(path: &str) -> RouteGroup {
    if path.starts_with("/api/admin/") {
        RouteGroup::Admin
    } else if path == "/api/health" || path == "/api/status" {
        RouteGroup::Internal
    } else {
        RouteGroup::Api
    }
}

fn classify_endpoint(method: &Method, path: &str) -> Option<TrackedEndpoint> {
    if *method != Method::POST {
        return None;
    }
    match path {
        "/api/auth/otp/request" => Some(TrackedEndpoint::OtpRequest),
        "/api/auth/otp/verify" => Some(TrackedEndpoint::OtpVerify),
        "/api/orders" => Some(TrackedEndpoint::Checkout),
        _ => None,
    }
}

const fn nz(n: u32) -> NonZeroU32 {
    match NonZeroU32::new(n) {
        Some(v) => v,
        None => panic!("rate limit counts must be non-zero"),
    }
}

/// `count` requests per `period`, with burst = count.
fn quota(count: NonZeroU32, period: Duration) -> Quota {
    match Quota::with_period(period / count.get()) {
        Some(q) => q.allow_burst(count),
        None => Quota::per_second(count),
    }
}

fn keyed(count: u32, period: Duration) -> DefaultKeyedRateLimiter<IpAddr> {
    RateLimiter::keyed(quota(nz(count), period))
}

const FIVE_SECS: Duration = Duration::from_secs(5);
const MINUTE: Duration = Duration::from_secs(60);
const HALF_HOUR: Duration = Duration::from_secs(30 * 60);

/// All keyed limiters, shared by every clone of the layer.
pub struct RateLimitState {
    global_burst: DefaultKeyedRateLimiter<IpAddr>,
    global_sustained: DefaultKeyedRateLimiter<IpAddr>,

    api_sustained: DefaultKeyedRateLimiter<IpAddr>,
    api_long: DefaultKeyedRateLimiter<IpAddr>,
    admin_sustained: DefaultKeyedRateLimiter<IpAddr>,
    admin_long: DefaultKeyedRateLimiter<IpAddr>,

    otp_request_sustained: DefaultKeyedRateLimiter<IpAddr>,
    otp_request_long: DefaultKeyedRateLimiter<IpAddr>,
    otp_verify_sustained: DefaultKeyedRateLimiter<IpAddr>,
    checkout_sustained: DefaultKeyedRateLimiter<IpAddr>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            global_burst: keyed(20, FIVE_SECS),
            global_sustained: keyed(180, MINUTE),

            api_sustained: keyed(90, MINUTE),
            api_long: keyed(900, HALF_HOUR),
            admin_sustained: keyed(60, MINUTE),
            admin_long: keyed(600, HALF_HOUR),

            otp_request_sustained: keyed(5, MINUTE),
            otp_request_long: keyed(20, HALF_HOUR),
            otp_verify_sustained: keyed(10, MINUTE),
            checkout_sustained: keyed(10, MINUTE),
        }
    }

    fn limiters_for(&self, method: &Method, path: &str) -> Vec<&DefaultKeyedRateLimiter<IpAddr>> {
        let mut limiters = vec![&self.global_burst, &self.global_sustained];

        match classify_route(path) {
            RouteGroup::Api => limiters.extend([&self.api_sustained, &self.api_long]),
            RouteGroup::Admin => limiters.extend([&self.admin_sustained, &self.admin_long]),
            RouteGroup::Internal => {}
        }

        match classify_endpoint(method, path) {
            Some(TrackedEndpoint::OtpRequest) => {
                limiters.extend([&self.otp_request_sustained, &self.otp_request_long])
            }
            Some(TrackedEndpoint::OtpVerify) => limiters.push(&self.otp_verify_sustained),
            Some(TrackedEndpoint::Checkout) => limiters.push(&self.checkout_sustained),
            None => {}
        }

        limiters
    }

    /// Check every applicable bucket. Returns `Err(retry_after_secs)` with
    /// the longest wait when any of them rejects.
    fn check(&self, ip: IpAddr, method: &Method, path: &str) -> Result<(), u64> {
        let clock = governor::clock::DefaultClock::default();
        let mut max_wait: Option<Duration> = None;

        // Every bucket is charged even after a rejection, like a real client would be.
        for limiter in self.limiters_for(method, path) {
            if let Err(not_until) = limiter.check_key(&ip) {
                let wait = not_until.wait_time_from(clock.now());
                max_wait = Some(max_wait.map_or(wait, |m| m.max(wait)));
            }
        }

        match max_wait {
            Some(wait) => Err(wait.as_secs().max(1)),
            None => Ok(()),
        }
    }
}

pub type SharedRateLimitState = Arc<RateLimitState>;

#[derive(Clone)]
pub struct RateLimitLayer {
    state: SharedRateLimitState,
    trust_proxy: bool,
}

impl RateLimitLayer {
    pub fn new(state: SharedRateLimitState, trust_proxy: bool) -> Self {
        Self { state, trust_proxy }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
            trust_proxy: self.trust_proxy,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: SharedRateLimitState,
    trust_proxy: bool,
}

impl<S, ResBody> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response<ResBody>> + Send + Clone + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug + Send,
    ResBody: Send + 'static,
    Body: Into<ResBody>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let Some(ip) = client_ip::resolve(req.headers(), req.extensions(), self.trust_proxy) else {
            return Box::pin(self.inner.call(req));
        };

        let path = req.uri().path();
        match self.state.check(ip, req.method(), path) {
            Ok(()) => Box::pin(self.inner.call(req)),
            Err(retry_after) => {
                warn!(
                    client_ip = %ip,
                    path = %path,
                    retry_after_secs = retry_after,
                    "Rate limit exceeded"
                );
                let resp = rate_limit_response(retry_after).map(Into::into);
                Box::pin(async move { Ok(resp) })
            }
        }
    }
}

fn rate_limit_response(retry_after: u64) -> Response<Body> {
    let body = serde_json::json!({
        "code": "RATE_LIMITED",
        "message": format!("Too many requests. Retry after {retry_after} seconds."),
        "details": { "retryAfter": retry_after },
    });
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("retry-after", HeaderValue::from(retry_after));
    response
}
