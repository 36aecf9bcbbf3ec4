//! WebhookRelay - queue-backed webhook fan-out.
//!
//! This library provides shared modules for the two binaries:
//! - `relay-receiver`: Thin web server that enqueues inbound webhooks per tenant
//! - `relay-distributor`: Worker that relays each queued webhook to every
//!   matching configured route
//!
//! ## Architecture
//!
//! ```text
//! Webhooks → Receiver → hooks_{tenant} → Distributor → downstream endpoints
//! ```
//!
//! Inside the distributor each message goes through
//! debug capture → route matching → dispatch → acknowledgement.

pub mod capture;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod processor;
pub mod queue;
pub mod routing;
pub mod shutdown;
pub mod web;

// Re-export commonly used types
pub use capture::DebugCapture;
pub use config::{Config, ConfigError, Settings};
pub use dispatcher::{DispatchReport, Dispatcher, RouteOutcome, RouteResult};
pub use processor::{MessageProcessor, MessageReport, ProcessError};
pub use queue::{
    AmqpSource, DeliveryHandle, MessageSource, Publisher, QueueError, QueueMessage,
    WebhookEnvelope,
};
pub use routing::{RouteConfig, RouteTable};
pub use shutdown::{Cancellation, Shutdown};
pub use web::AppState;
