//! Route matching.
//!
//! A route matches when its type equals the envelope type and its subtype is
//! either the wildcard or equal to the envelope subtype, both compared
//! case-insensitively. Every matching route fires; there is no priority.

use thiserror::Error;
use tracing::{debug, error};

use super::{RouteConfig, RouteTable};
use crate::queue::WebhookEnvelope;

/// A route that cannot be evaluated against any envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("route has no type")]
    MissingType,
}

impl RouteConfig {
    /// Check this route against an envelope.
    pub fn matches(&self, envelope: &WebhookEnvelope) -> Result<bool, MatchError> {
        if self.kind.trim().is_empty() {
            return Err(MatchError::MissingType);
        }

        if !eq_ignore_case(&self.kind, &envelope.kind) {
            return Ok(false);
        }

        Ok(match &self.subtype {
            None => true,
            Some(subtype) => eq_ignore_case(subtype, &envelope.subtype),
        })
    }
}

/// Routes matching `envelope`, in table order.
///
/// A route that fails to evaluate is logged and skipped; the remaining routes
/// are still checked.
pub fn matching_routes<'a>(
    table: &'a RouteTable,
    envelope: &WebhookEnvelope,
    sequence: u64,
) -> Vec<&'a RouteConfig> {
    table
        .iter()
        .filter(|route| match route.matches(envelope) {
            Ok(matched) => {
                if matched {
                    debug!(
                        sequence = sequence,
                        route = %route.name,
                        host = %route.host,
                        "route_matched"
                    );
                }
                matched
            }
            Err(e) => {
                error!(
                    sequence = sequence,
                    route = %route.name,
                    error = %e,
                    "route_match_failed"
                );
                false
            }
        })
        .collect()
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}
