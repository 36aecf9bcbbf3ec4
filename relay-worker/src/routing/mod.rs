//! Route table: the ordered list of destinations webhooks are relayed to.
//!
//! Built once from the config file at startup and never mutated afterwards.

pub mod matcher;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

pub use matcher::{matching_routes, MatchError};

/// Errors building a route from its configured fields.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("destination {destination:?} is not a valid URL: {source}")]
    InvalidUrl {
        destination: String,
        #[source]
        source: url::ParseError,
    },

    #[error("destination {0:?} must be an http or https URL with a host")]
    UnsupportedDestination(String),
}

/// Credentials sent as `Authorization: {scheme} {token}`.
#[derive(Clone, PartialEq, Eq)]
pub struct RouteAuth {
    scheme: String,
    token: String,
}

impl RouteAuth {
    /// Build credentials when both parts are present and non-blank.
    pub fn from_parts(scheme: Option<&str>, token: Option<&str>) -> Option<Self> {
        let scheme = scheme.map(str::trim).filter(|s| !s.is_empty())?;
        let token = token.map(str::trim).filter(|t| !t.is_empty())?;
        Some(Self {
            scheme: scheme.to_string(),
            token: token.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Full `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }
}

impl fmt::Debug for RouteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteAuth")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// One configured route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    /// Operator-facing name, used in logs
    pub name: String,
    /// Webhook type to match (case-insensitive)
    pub kind: String,
    /// Subtype to match; `None` matches every subtype
    pub subtype: Option<String>,
    /// POST target
    pub destination: Url,
    /// Destination host, for logging only
    pub host: String,
    pub auth: Option<RouteAuth>,
}

impl RouteConfig {
    /// Build a route without credentials.
    ///
    /// A blank subtype becomes the wildcard.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        subtype: Option<&str>,
        destination: &str,
    ) -> Result<Self, RouteError> {
        let url = Url::parse(destination).map_err(|source| RouteError::InvalidUrl {
            destination: destination.to_string(),
            source,
        })?;

        let host = match (url.scheme(), url.host_str()) {
            ("http" | "https", Some(host)) => host.to_string(),
            _ => return Err(RouteError::UnsupportedDestination(destination.to_string())),
        };

        Ok(Self {
            name: name.into(),
            kind: kind.into(),
            subtype: subtype
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            destination: url,
            host,
            auth: None,
        })
    }

    pub fn with_auth(mut self, auth: Option<RouteAuth>) -> Self {
        self.auth = auth;
        self
    }
}

/// Immutable, ordered route list. Cloning shares the underlying routes.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Arc<[RouteConfig]>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RouteTable {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self {
            routes: routes.into(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteConfig> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
