use anyhow::Context;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        header::{RETRY_AFTER, USER_AGENT},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::analytics::{extract_client_address, GeoResolver, VisitorEvent};
use crate::config::{ClientIpConfig, Config};
use crate::notify::NotificationDispatcher;
use crate::rate_limit::{Admission, RateLimiter};
use crate::storage::{CsvEventLog, EventStore};

/// Body of every rate-limited response
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Slow down.";

/// Everything the interceptor needs, shared across requests
pub struct InterceptorState {
    pub geo: GeoResolver,
    pub limiter: RateLimiter,
    pub event_log: Arc<dyn EventStore>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub client_ip: ClientIpConfig,
    pub bot_trap_param: String,
}

impl InterceptorState {
    /// Open the log, the GeoIP database and the notification channel described by `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let event_log = CsvEventLog::open(&config.event_log.path)
            .await
            .with_context(|| format!("Failed to open visitor log at {}", config.event_log.path))?;

        let geo = GeoResolver::new(config.geoip.city_db_path.as_deref())?;
        let dispatcher = NotificationDispatcher::from_config(&config.notify)?;

        Ok(Self {
            geo,
            limiter: RateLimiter::from_config(&config.rate_limit),
            event_log: Arc::new(event_log),
            dispatcher: Arc::new(dispatcher),
            client_ip: config.client_ip.clone(),
            bot_trap_param: config.bot_trap_param.clone(),
        })
    }

    /// Build the event describing `request`.
    pub fn capture<B>(&self, request: &axum::http::Request<B>, peer: Option<IpAddr>) -> VisitorEvent {
        let headers = request.headers();
        let client_address = extract_client_address(headers, peer, &self.client_ip);
        let geo = self.geo.resolve(&client_address);

        let user_agent: Option<Cow<'_, str>> = headers
            .get(USER_AGENT)
            .map(|value| String::from_utf8_lossy(value.as_bytes()));

        let uri = request.uri();
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        let bot_trap = has_query_param(uri.query(), &self.bot_trap_param);

        VisitorEvent::new(
            Utc::now(),
            client_address,
            geo,
            request.method().as_str(),
            path,
            user_agent.as_deref(),
            bot_trap,
        )
    }

    /// Persist and notify. Failures are logged and never reach the caller.
    pub async fn record(&self, event: VisitorEvent) {
        if let Err(err) = self.event_log.append(&event).await {
            warn!(client = %event.client_address, error = %err, "Failed to record visitor event");
        }
        self.dispatcher.submit(event);
    }
}

/// Per-request telemetry and throttling.
///
/// Every request is recorded and notified, rejected ones included; the
/// admission decision is taken before recording so the log sees the request
/// regardless of outcome. Once admitted or rejected, a request is recorded
/// even if the caller drops the response future.
pub async fn intercept(
    State(state): State<Arc<InterceptorState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let event = state.capture(&request, peer);
    let admission = state.limiter.admit(&event.client_address);

    if let Admission::Reject { .. } = admission {
        debug!(client = %event.client_address, path = %event.path, "Rate limit exceeded");
    }

    // Recording runs on its own task so a client hanging up mid-request
    // cannot cancel the append; a dropped JoinHandle leaves the task running.
    let recorder = Arc::clone(&state);
    if let Err(err) = tokio::spawn(async move { recorder.record(event).await }).await {
        warn!(error = %err, "Visitor recording task failed");
    }

    match admission {
        Admission::Allow { .. } => next.run(request).await,
        Admission::Reject { retry_after } => too_many_requests(retry_after),
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let secs = (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);

    let mut response = (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE).into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(secs));
    response
}

fn has_query_param(query: Option<&str>, name: &str) -> bool {
    query.is_some_and(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(key, _)| key == name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_has_query_param() {
        assert!(has_query_param(Some("_trap=1"), "_trap"));
        assert!(has_query_param(Some("a=b&_trap"), "_trap"));
        assert!(has_query_param(Some("a=b&%5Ftrap=x"), "_trap"));
        assert!(!has_query_param(Some("trap=1&x_trap=2"), "_trap"));
        assert!(!has_query_param(None, "_trap"));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = too_many_requests(Duration::from_millis(1500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");

        let response = too_many_requests(Duration::ZERO);
        assert_eq!(response.headers()[RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn test_capture_extracts_request_facts() {
        let dir = tempfile::tempdir().unwrap();
        let log = CsvEventLog::open(dir.path().join("v.csv")).await.unwrap();
        let state = InterceptorState {
            geo: GeoResolver::disabled(),
            limiter: RateLimiter::new(Duration::from_secs(15), 20),
            event_log: Arc::new(log),
            dispatcher: Arc::new(NotificationDispatcher::disabled()),
            client_ip: ClientIpConfig::default(),
            bot_trap_param: "_trap".to_string(),
        };

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/login?next=%2Fhome&_trap=1")
            .header("x-forwarded-for", "203.0.113.50")
            .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)")
            .body(Body::empty())
            .unwrap();

        let event = state.capture(&request, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(event.client_address, "203.0.113.50");
        assert_eq!(event.method, "POST");
        assert_eq!(event.path, "/login?next=%2Fhome&_trap=1");
        assert_eq!(event.user_agent, "Mozilla/5.0 (X11; Linux x86_64)");
        assert!(event.bot_trap);
        assert!(event.city.is_empty() && event.region.is_empty() && event.country.is_empty());

        let bare = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let event = state.capture(&bare, None);
        assert_eq!(event.client_address, "unknown");
        assert_eq!(event.user_agent, "unknown");
        assert!(!event.bot_trap);
    }
}
