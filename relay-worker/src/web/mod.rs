//! Web server module for receiving webhooks.
//!
//! A thin edge in front of the queue that:
//! - Accepts GitHub, Slack and generic JSON webhooks
//! - Checks the tenant against the allow-list
//! - Enqueues the raw body and headers onto `hooks_{tenant}`
//!
//! All routing and delivery happens in the distributor.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    generic_hook, github_hook, slack_hook, status, AppState, HookResponse, Provider,
    StatusResponse,
};

/// Build the receiver's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/hooks/github", post(github_hook))
        .route("/hooks/slack", post(slack_hook))
        .route("/hooks/generic", post(generic_hook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
