//! Queue message types shared by the receiver and the distributor.
//!
//! The receiver serializes one [`WebhookEnvelope`] per inbound webhook onto a
//! tenant queue; the distributor reads it back wrapped in a [`QueueMessage`].

use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of the per-tenant queue names the receiver publishes to.
pub const TENANT_QUEUE_PREFIX: &str = "hooks_";

/// Queue name for a tenant's webhooks.
pub fn tenant_queue(tenant: &str) -> String {
    format!("{}{}", TENANT_QUEUE_PREFIX, tenant)
}

/// Original request headers: name followed by every value, in arrival order.
pub type HeaderList = Vec<(String, Vec<String>)>;

// =============================================================================
// Webhook Envelope
// =============================================================================

/// One inbound webhook event, as queued for distribution.
///
/// Wire format:
///
/// ```text
/// {"Type": "GitHub", "SubType": "push", "JsonData": "{...}",
///  "RequestHeaders": [["X-GitHub-Event", ["push"]], ...]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Provider class (GitHub, Slack, Generic)
    #[serde(rename = "Type")]
    pub kind: String,
    /// Caller-supplied subtype from the ingestion query string
    #[serde(rename = "SubType", default, deserialize_with = "null_as_empty")]
    pub subtype: String,
    /// Raw request body, forwarded unmodified
    #[serde(rename = "JsonData", default, deserialize_with = "null_as_empty")]
    pub payload: String,
    /// Original request headers, replayed on every outbound call
    #[serde(
        rename = "RequestHeaders",
        default,
        deserialize_with = "deserialize_headers"
    )]
    pub headers: HeaderList,
}

impl WebhookEnvelope {
    /// Create an envelope with no headers.
    pub fn new(
        kind: impl Into<String>,
        subtype: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            subtype: subtype.into(),
            payload: payload.into(),
            headers: Vec::new(),
        }
    }

    /// Append a header value, grouping repeated names under one entry.
    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.headers.push((name, vec![value])),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Header entries arrive either as `[name, [values]]` pairs or as
/// `{"Key": name, "Value": [values]}` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderEntry {
    Pair(String, Vec<String>),
    KeyValue {
        #[serde(rename = "Key")]
        key: String,
        #[serde(rename = "Value", default)]
        value: Vec<String>,
    },
}

fn deserialize_headers<'de, D>(deserializer: D) -> Result<HeaderList, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<HeaderEntry>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            HeaderEntry::Pair(key, values) => (key, values),
            HeaderEntry::KeyValue { key, value } => (key, value),
        })
        .collect())
}

// =============================================================================
// Queue Message
// =============================================================================

/// Transport token used to acknowledge one delivery (AMQP delivery tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(pub u64);

/// One delivery pulled off the queue.
///
/// The body is kept as raw bytes so debug capture can persist exactly what
/// was received, before any decoding.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Monotonic per-consumer sequence number, used in logs and capture names
    pub sequence: u64,
    /// Transport message id, when the publisher set one
    pub message_id: Option<String>,
    /// Raw JSON envelope
    pub body: Vec<u8>,
    /// Acknowledgement token
    pub handle: DeliveryHandle,
}
