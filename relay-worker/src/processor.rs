//! Per-message pipeline: decode, capture, match, dispatch.
//!
//! Processing never retries anything. Whatever happens here, the consumer
//! acknowledges the delivery afterwards.

use std::io;

use thiserror::Error;
use tracing::{info, warn};

use crate::capture::DebugCapture;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::queue::{QueueMessage, WebhookEnvelope};
use crate::routing::{matching_routes, RouteTable};
use crate::shutdown::Cancellation;

/// Failures that end processing of one message before dispatch.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("message body is not a valid envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("debug capture failed: {0}")]
    Capture(#[from] io::Error),
}

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReport {
    pub sequence: u64,
    /// Routes that matched the envelope
    pub matched: usize,
    pub dispatch: DispatchReport,
}

/// Everything needed to process a message. Immutable once built.
#[derive(Clone)]
pub struct MessageProcessor {
    routes: RouteTable,
    capture: DebugCapture,
    dispatcher: Dispatcher,
}

impl MessageProcessor {
    pub fn new(routes: RouteTable, capture: DebugCapture, dispatcher: Dispatcher) -> Self {
        Self {
            routes,
            capture,
            dispatcher,
        }
    }

    /// Run the pipeline for one message.
    ///
    /// A capture failure stops the message before routing.
    pub async fn process(
        &self,
        message: &QueueMessage,
        cancel: &Cancellation,
    ) -> Result<MessageReport, ProcessError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(&message.body)?;

        info!(
            sequence = message.sequence,
            hook_type = %envelope.kind,
            hook_subtype = %envelope.subtype,
            payload_length = envelope.payload.len(),
            header_count = envelope.headers.len(),
            "message_decoded"
        );

        self.capture
            .write(&envelope, message.sequence, &message.body)
            .await?;

        let matched = matching_routes(&self.routes, &envelope, message.sequence);

        if matched.is_empty() {
            warn!(
                sequence = message.sequence,
                hook_type = %envelope.kind,
                hook_subtype = %envelope.subtype,
                "no_matching_routes"
            );
            return Ok(MessageReport {
                sequence: message.sequence,
                matched: 0,
                dispatch: DispatchReport::default(),
            });
        }

        info!(
            sequence = message.sequence,
            matched_routes = matched.len(),
            "routes_matched"
        );

        let dispatch = self
            .dispatcher
            .dispatch(&matched, &envelope, message.sequence, cancel)
            .await;

        Ok(MessageReport {
            sequence: message.sequence,
            matched: matched.len(),
            dispatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::queue::DeliveryHandle;
    use crate::routing::RouteConfig;

    fn message(sequence: u64, body: &str) -> QueueMessage {
        QueueMessage {
            sequence,
            message_id: None,
            body: body.as_bytes().to_vec(),
            handle: DeliveryHandle(sequence),
        }
    }

    fn processor(routes: Vec<RouteConfig>, capture: DebugCapture) -> MessageProcessor {
        MessageProcessor::new(RouteTable::new(routes), capture, Dispatcher::new().unwrap())
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("relay-processor-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_undecodable_body_is_an_error() {
        let processor = processor(vec![], DebugCapture::disabled());
        let result = processor
            .process(&message(1, "not json"), &Cancellation::never())
            .await;
        assert!(matches!(result, Err(ProcessError::Decode(_))));
    }

    #[tokio::test]
    async fn test_no_match_reports_zero_routes() {
        let routes = vec![RouteConfig::new(
            "cmd",
            "slack",
            Some("command"),
            "http://127.0.0.1:9/x",
        )
        .unwrap()];
        let processor = processor(routes, DebugCapture::disabled());
        let body = r#"{"Type":"Slack","SubType":"message","JsonData":"{}","RequestHeaders":[]}"#;

        let report = processor
            .process(&message(4, body), &Cancellation::never())
            .await
            .unwrap();

        assert_eq!(
            report,
            MessageReport {
                sequence: 4,
                matched: 0,
                dispatch: DispatchReport::default()
            }
        );
    }

    #[tokio::test]
    async fn test_capture_failure_stops_before_routing() {
        let root = scratch_dir("blocked");
        std::fs::write(&root, b"file in the way").unwrap();

        let routes = vec![RouteConfig::new("gh", "GitHub", None, "http://127.0.0.1:9/x").unwrap()];
        let processor = processor(routes, DebugCapture::new(&root));
        let body = r#"{"Type":"GitHub","SubType":"push","JsonData":"{}"}"#;

        let result = processor
            .process(&message(2, body), &Cancellation::never())
            .await;
        assert!(matches!(result, Err(ProcessError::Capture(_))));

        std::fs::remove_file(&root).ok();
    }

    #[tokio::test]
    async fn test_capture_written_before_dispatch() {
        let root = scratch_dir("written");
        let processor = processor(vec![], DebugCapture::new(&root));
        let body = r#"{"Type":"Generic","SubType":"deploy","JsonData":"{\"a\":1}"}"#;

        processor
            .process(&message(11, body), &Cancellation::never())
            .await
            .unwrap();

        let bucket = std::fs::read_dir(&root).unwrap().next().unwrap().unwrap().path();
        let written = std::fs::read(bucket.join("Generic_deploy_11.json")).unwrap();
        assert_eq!(written, body.as_bytes());

        std::fs::remove_dir_all(&root).ok();
    }
}
