//! Fan-out of one envelope to its matched routes.
//!
//! Every matched route gets exactly one `POST` carrying the envelope payload
//! verbatim and the original request headers. Routes are attempted
//! concurrently and independently: one route failing never affects another,
//! and no outcome is retried.

use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use tracing::{error, info, info_span, warn, Instrument};

use crate::queue::WebhookEnvelope;
use crate::routing::RouteConfig;
use crate::shutdown::Cancellation;

/// Headers describing the inbound connection rather than the webhook. The
/// outbound client sets its own.
const CONNECTION_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

/// Outcome of the single attempt made for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// 2xx response
    Delivered { status: u16, body: String },
    /// Non-2xx response
    HttpError { status: u16, body: String },
    /// No response: connect, TLS or I/O failure
    TransportError(String),
    /// Shutdown aborted the request
    Cancelled,
}

impl RouteOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RouteOutcome::Delivered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResult {
    pub route: String,
    pub outcome: RouteOutcome,
}

/// Per-message summary of every route attempted, in route order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub results: Vec<RouteResult>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_delivered()).count()
    }

    /// Routes that were attempted but not delivered, excluding cancellations.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    RouteOutcome::HttpError { .. } | RouteOutcome::TransportError(_)
                )
            })
            .count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.outcome == RouteOutcome::Cancelled)
    }
}

/// Sends envelopes to routes over one shared, pooled HTTP client.
#[derive(Clone)]
pub struct Dispatcher {
    client: Client,
}

impl Dispatcher {
    /// Build a dispatcher with a fresh client using default timeouts.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().pool_max_idle_per_host(16).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Send `envelope` to every route, waiting for all attempts to finish.
    pub async fn dispatch(
        &self,
        routes: &[&RouteConfig],
        envelope: &WebhookEnvelope,
        sequence: u64,
        cancel: &Cancellation,
    ) -> DispatchReport {
        let attempts = routes.iter().map(|route| {
            let span = info_span!("route", route = %route.name, host = %route.host);
            self.send(route, envelope, sequence, cancel).instrument(span)
        });

        DispatchReport {
            results: join_all(attempts).await,
        }
    }

    async fn send(
        &self,
        route: &RouteConfig,
        envelope: &WebhookEnvelope,
        sequence: u64,
        cancel: &Cancellation,
    ) -> RouteResult {
        info!(
            sequence = sequence,
            route = %route.name,
            host = %route.host,
            has_auth = route.auth.is_some(),
            payload_length = envelope.payload.len(),
            "route_dispatch_starting"
        );

        let request = self
            .client
            .post(route.destination.clone())
            .headers(outbound_headers(envelope, route))
            .body(envelope.payload.clone());

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RouteOutcome::Cancelled,
            outcome = async {
                match request.send().await {
                    Ok(response) => {
                        let status = response.status();
                        let body = match response.text().await {
                            Ok(body) => body,
                            Err(e) => format!("<unreadable body: {}>", e),
                        };
                        if status.is_success() {
                            RouteOutcome::Delivered { status: status.as_u16(), body }
                        } else {
                            RouteOutcome::HttpError { status: status.as_u16(), body }
                        }
                    }
                    Err(e) => RouteOutcome::TransportError(e.to_string()),
                }
            } => outcome,
        };

        match &outcome {
            RouteOutcome::Delivered { status, body } => info!(
                sequence = sequence,
                route = %route.name,
                host = %route.host,
                status_code = status,
                response = %body,
                "route_dispatch_delivered"
            ),
            RouteOutcome::HttpError { status, body } => error!(
                sequence = sequence,
                route = %route.name,
                host = %route.host,
                status_code = status,
                response = %body,
                "route_dispatch_http_error"
            ),
            RouteOutcome::TransportError(cause) => error!(
                sequence = sequence,
                route = %route.name,
                host = %route.host,
                error = %cause,
                "route_dispatch_failed"
            ),
            RouteOutcome::Cancelled => warn!(
                sequence = sequence,
                route = %route.name,
                host = %route.host,
                "route_dispatch_cancelled"
            ),
        }

        RouteResult {
            route: route.name.clone(),
            outcome,
        }
    }
}

/// Replay the envelope's original headers, then apply the route's credentials.
fn outbound_headers(envelope: &WebhookEnvelope, route: &RouteConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, values) in &envelope.headers {
        if CONNECTION_HEADERS
            .iter()
            .any(|skip| name.eq_ignore_ascii_case(skip))
        {
            continue;
        }

        let header_name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header_name) => header_name,
            Err(_) => {
                warn!(route = %route.name, header = %name, "header_name_invalid_skipped");
                continue;
            }
        };

        for value in values {
            match HeaderValue::from_str(value) {
                Ok(header_value) => {
                    headers.append(header_name.clone(), header_value);
                }
                Err(_) => warn!(
                    route = %route.name,
                    header = %name,
                    "header_value_invalid_skipped"
                ),
            }
        }
    }

    if let Some(auth) = &route.auth {
        match HeaderValue::from_str(&auth.header_value()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!(
                route = %route.name,
                scheme = %auth.scheme(),
                "route_auth_header_invalid"
            ),
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::{
        body::Bytes,
        extract::State,
        http::{HeaderMap as AxumHeaders, StatusCode},
        routing::post,
        Router,
    };
    use tokio::net::TcpListener;

    use super::*;
    use crate::routing::RouteAuth;
    use crate::shutdown::Shutdown;

    #[derive(Debug, Clone)]
    struct Captured {
        path: String,
        headers: AxumHeaders,
        body: Bytes,
    }

    type Log = Arc<Mutex<Vec<Captured>>>;

    async fn record(
        State(log): State<Log>,
        uri: axum::http::Uri,
        headers: AxumHeaders,
        body: Bytes,
    ) -> (StatusCode, &'static str) {
        let path = uri.path().to_string();
        log.lock().unwrap().push(Captured {
            path: path.clone(),
            headers,
            body,
        });
        match path.as_str() {
            "/fail" => (StatusCode::INTERNAL_SERVER_ERROR, "downstream broke"),
            "/slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                (StatusCode::OK, "late")
            }
            _ => (StatusCode::OK, "accepted"),
        }
    }

    async fn spawn_downstream() -> (SocketAddr, Log) {
        let log = Log::default();
        let app = Router::new()
            .route("/*path", post(record))
            .with_state(log.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, log)
    }

    fn route(name: &str, destination: &str) -> RouteConfig {
        RouteConfig::new(name, "GitHub", None, destination).unwrap()
    }

    fn envelope() -> WebhookEnvelope {
        let mut envelope =
            WebhookEnvelope::new("GitHub", "push", r#"{"ref":"refs/heads/main","n":1}"#);
        envelope.push_header("X-GitHub-Event", "push");
        envelope.push_header("Content-Type", "application/json");
        envelope.push_header("Accept", "text/plain");
        envelope.push_header("Accept", "application/json");
        envelope.push_header("Host", "receiver.example.com");
        envelope.push_header("Content-Length", "999");
        envelope.push_header("Authorization", "Basic original");
        envelope
    }

    #[tokio::test]
    async fn test_posts_payload_verbatim_with_replayed_headers() {
        let (addr, log) = spawn_downstream().await;
        let target = route("ci", &format!("http://{}/x", addr));
        let dispatcher = Dispatcher::new().unwrap();

        let report = dispatcher
            .dispatch(&[&target], &envelope(), 1, &Cancellation::never())
            .await;

        assert_eq!(
            report.results,
            vec![RouteResult {
                route: "ci".to_string(),
                outcome: RouteOutcome::Delivered {
                    status: 200,
                    body: "accepted".to_string()
                }
            }]
        );

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.path, "/x");
        assert_eq!(&call.body[..], br#"{"ref":"refs/heads/main","n":1}"#);
        assert_eq!(call.headers["x-github-event"], "push");
        assert_eq!(call.headers["content-type"], "application/json");
        let accept: Vec<_> = call.headers.get_all("accept").iter().collect();
        assert_eq!(accept, vec!["text/plain", "application/json"]);
        assert_eq!(call.headers["host"], addr.to_string().as_str());
        assert_eq!(call.headers["content-length"], call.body.len().to_string().as_str());
        assert_eq!(call.headers["authorization"], "Basic original");
    }

    #[tokio::test]
    async fn test_route_auth_replaces_original_authorization() {
        let (addr, log) = spawn_downstream().await;
        let target = route("ci", &format!("http://{}/x", addr))
            .with_auth(RouteAuth::from_parts(Some("Bearer"), Some("t0ken")));

        let report = Dispatcher::new()
            .unwrap()
            .dispatch(&[&target], &envelope(), 1, &Cancellation::never())
            .await;
        assert_eq!(report.delivered(), 1);

        let calls = log.lock().unwrap().clone();
        let auth: Vec<_> = calls[0].headers.get_all("authorization").iter().collect();
        assert_eq!(auth, vec!["Bearer t0ken"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_route() {
        let (addr, log) = spawn_downstream().await;
        let unreachable = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let dead = route("dead", &format!("http://{}/x", unreachable));
        let failing = route("failing", &format!("http://{}/fail", addr));
        let healthy = route("healthy", &format!("http://{}/ok", addr));

        let report = Dispatcher::new()
            .unwrap()
            .dispatch(&[&dead, &failing, &healthy], &envelope(), 3, &Cancellation::never())
            .await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[0].route, "dead");
        assert!(matches!(report.results[0].outcome, RouteOutcome::TransportError(_)));
        assert_eq!(
            report.results[1].outcome,
            RouteOutcome::HttpError {
                status: 500,
                body: "downstream broke".to_string()
            }
        );
        assert!(report.results[2].outcome.is_delivered());
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failed(), 2);
        assert!(!report.was_cancelled());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_request() {
        let (addr, _log) = spawn_downstream().await;
        let slow = route("slow", &format!("http://{}/slow", addr));
        let shutdown = Shutdown::new();
        let token = shutdown.token();

        let dispatcher = Dispatcher::new().unwrap();
        let envelope = envelope();
        let routes = [&slow];
        let attempt = dispatcher.dispatch(&routes, &envelope, 1, &token);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.trigger();
        };

        let (report, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(attempt, trigger)
        })
        .await
        .expect("cancellation should end the request promptly");

        assert_eq!(report.results[0].outcome, RouteOutcome::Cancelled);
        assert!(report.was_cancelled());
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test]
    async fn test_no_routes_no_requests() {
        let report = Dispatcher::new()
            .unwrap()
            .dispatch(&[], &envelope(), 1, &Cancellation::never())
            .await;
        assert_eq!(report, DispatchReport::default());
    }

    #[test]
    fn test_invalid_headers_are_skipped() {
        let mut envelope = WebhookEnvelope::new("GitHub", "push", "{}");
        envelope.push_header("Bad Header", "x");
        envelope.push_header("X-Ok", "fine");
        envelope.push_header("X-Ok", "line\nbreak");
        envelope.push_header("Transfer-Encoding", "chunked");

        let headers = outbound_headers(&envelope, &route("ci", "https://a/x"));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-ok"], "fine");
    }
}
