//! REST executor
//!
//! Attaches the session's auth headers to a call, hands it to a [`Transport`]
//! and returns a normalized [`HttpOutcome`]. Calls are synchronous on the
//! calling thread; there are no automatic retries.

pub mod memory;
mod query;
mod transport;

pub use memory::InMemoryBackend;
pub use query::Query;
pub use transport::UreqTransport;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::Configuration;
use crate::constants::{endpoints, headers, http};
use crate::error::SyncError;
use crate::session::Session;

/// Logical HTTP verb requested by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    /// Sent on the wire as POST with `X-HTTP-Method-Override: PATCH`
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

/// Whether the backend should echo affected rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefer {
    Representation,
    Minimal,
}

impl Prefer {
    fn header_value(self) -> &'static str {
        match self {
            Prefer::Representation => headers::RETURN_REPRESENTATION,
            Prefer::Minimal => headers::RETURN_MINIMAL,
        }
    }
}

/// A fully prepared request as handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Normalized result of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOutcome {
    /// 0 when no HTTP response was received
    pub status: u16,
    /// Raw response body, or the transport error text
    pub body: String,
    /// status in [200, 300)
    pub ok: bool,
}

impl HttpOutcome {
    pub fn new(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            ok: (200..300).contains(&status),
        }
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            status: http::TRANSPORT_FAILURE_STATUS,
            body: message.into(),
            ok: false,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == http::TRANSPORT_FAILURE_STATUS
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        serde_json::from_str(&self.body).map_err(SyncError::from)
    }
}

/// Blocking HTTP seam. Implementations never fail: transport problems are
/// reported as an outcome with status 0.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> HttpOutcome;
}

/// Issues authenticated calls against the table endpoint
#[derive(Clone)]
pub struct RestExecutor {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: String,
    bearer: String,
}

impl fmt::Debug for RestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestExecutor")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestExecutor {
    /// Snapshot the auth material of an authenticated session
    pub fn new(transport: Arc<dyn Transport>, config: &Configuration, session: &Session) -> Self {
        Self {
            transport,
            base_url: config.service_base_url.clone(),
            api_key: config.static_api_key.clone(),
            bearer: session.bearer_token.clone(),
        }
    }

    /// `/rest/v1/<table>` plus an optional query string
    pub fn table_path(table: &str, query: &Query) -> String {
        let query = query.to_string();
        if query.is_empty() {
            format!("{}/{}", endpoints::REST_PREFIX, table)
        } else {
            format!("{}/{}?{}", endpoints::REST_PREFIX, table, query)
        }
    }

    /// Execute with the default `Prefer` policy: minimal for deletes,
    /// representation otherwise
    pub fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> HttpOutcome {
        let prefer = match method {
            Method::Delete => Prefer::Minimal,
            _ => Prefer::Representation,
        };
        self.execute_with(method, path, body, prefer)
    }

    pub fn execute_with(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        prefer: Prefer,
    ) -> HttpOutcome {
        let request = self.prepare(method, path, body, prefer);
        debug!(method = %method, url = %request.url, "REST call");

        let outcome = self.transport.send(&request);
        if outcome.ok {
            debug!(method = %method, status = outcome.status, "REST call succeeded");
        } else {
            debug!(method = %method, status = outcome.status, body = %outcome.body, "REST call failed");
        }
        outcome
    }

    fn prepare(&self, method: Method, path: &str, body: Option<&Value>, prefer: Prefer) -> HttpRequest {
        // PATCH is only guaranteed through the override header
        let wire_method = match method {
            Method::Patch => Method::Post,
            other => other,
        };

        let mut request = HttpRequest::new(wire_method, format!("{}{}", self.base_url, path))
            .header(headers::API_KEY, self.api_key.as_str())
            .header(headers::AUTHORIZATION, format!("Bearer {}", self.bearer))
            .header(headers::CONTENT_TYPE, headers::JSON)
            .header(headers::PREFER, prefer.header_value());

        if method == Method::Patch {
            request = request.header(headers::METHOD_OVERRIDE, "PATCH");
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        request
    }
}
