//! Webhook endpoint handlers.
//!
//! These handlers are designed to be fast - they only:
//! 1. Validate the `tenant` and `subType` query parameters
//! 2. Wrap the raw body and headers in an envelope
//! 3. Enqueue it onto the tenant's queue and return
//!
//! Routing and delivery happen in the distributor.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::queue::{tenant_queue, EnvelopePublisher, WebhookEnvelope};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub valid_tenants: Arc<Vec<String>>,
    pub publisher: Arc<dyn EnvelopePublisher>,
}

impl AppState {
    pub fn new(valid_tenants: Vec<String>, publisher: Arc<dyn EnvelopePublisher>) -> Self {
        Self {
            valid_tenants: Arc::new(valid_tenants),
            publisher,
        }
    }

    fn is_valid_tenant(&self, tenant: &str) -> bool {
        let tenant = tenant.to_lowercase();
        self.valid_tenants
            .iter()
            .any(|valid| valid.to_lowercase() == tenant)
    }
}

/// Webhook providers with an ingestion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    Slack,
    Generic,
}

impl Provider {
    /// Envelope type for this provider.
    pub fn kind(self) -> &'static str {
        match self {
            Provider::GitHub => "GitHub",
            Provider::Slack => "Slack",
            Provider::Generic => "Generic",
        }
    }
}

// =============================================================================
// Status
// =============================================================================

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// Liveness endpoint.
pub async fn status() -> Json<StatusResponse> {
    info!("status_requested");
    Json(StatusResponse { status: "ok" })
}

// =============================================================================
// Webhooks
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct HookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

type HookReply = (StatusCode, Json<HookResponse>);

fn reply(code: StatusCode, status: &'static str, message: Option<&str>) -> HookReply {
    (
        code,
        Json(HookResponse {
            status,
            message: message.map(str::to_string),
        }),
    )
}

pub async fn github_hook(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> HookReply {
    receive_hook(Provider::GitHub, state, query, headers, body).await
}

pub async fn slack_hook(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> HookReply {
    receive_hook(Provider::Slack, state, query, headers, body).await
}

pub async fn generic_hook(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> HookReply {
    receive_hook(Provider::Generic, state, query, headers, body).await
}

/// Validate, wrap and enqueue one webhook.
async fn receive_hook(
    provider: Provider,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> HookReply {
    let kind = provider.kind();
    info!(hook_type = kind, body_length = body.len(), "webhook_received");

    let Some(tenant) = query_param(&query, "tenant") else {
        warn!(hook_type = kind, "webhook_missing_tenant");
        return reply(
            StatusCode::BAD_REQUEST,
            "bad_request",
            Some("Please provide tenant parameter"),
        );
    };

    if !state.is_valid_tenant(tenant) {
        warn!(hook_type = kind, tenant = %tenant, "webhook_tenant_not_allowed");
        return reply(
            StatusCode::FORBIDDEN,
            "forbidden",
            Some("Please provide valid tenant parameter"),
        );
    }

    let Some(subtype) = query_param(&query, "subType") else {
        warn!(hook_type = kind, tenant = %tenant, "webhook_missing_subtype");
        return reply(
            StatusCode::BAD_REQUEST,
            "bad_request",
            Some("Please provide subType parameter"),
        );
    };

    let mut envelope = WebhookEnvelope::new(kind, subtype, body);
    for name in headers.keys() {
        for value in headers.get_all(name) {
            envelope.push_header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
    }

    let queue = tenant_queue(tenant);
    if let Err(e) = state.publisher.publish(&queue, &envelope).await {
        error!(hook_type = kind, queue = %queue, error = %e, "webhook_publish_failed");
        return reply(StatusCode::INTERNAL_SERVER_ERROR, "error", None);
    }

    info!(
        hook_type = kind,
        hook_subtype = %subtype,
        queue = %queue,
        "webhook_enqueued"
    );

    reply(StatusCode::OK, "enqueued", None)
}

/// First non-blank value of a query parameter, matching the key
/// case-insensitively.
fn query_param<'a>(query: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}
