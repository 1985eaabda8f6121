use std::time::Duration;
use tracing::{debug, warn};

use super::{HttpOutcome, HttpRequest, Method, Transport};

/// Blocking HTTP transport backed by a shared `ureq` agent
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// Every call is bounded by `timeout` end to end
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            // Non-2xx responses are outcomes, not errors
            .http_status_as_error(false)
            .build();
        Self {
            agent: config.into(),
        }
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> HttpOutcome {
        let url = request.url.as_str();
        let body = request.body.as_deref().unwrap_or("");

        let result = match request.method {
            Method::Get => with_headers(self.agent.get(url), &request.headers).call(),
            Method::Delete => with_headers(self.agent.delete(url), &request.headers).call(),
            Method::Post => with_headers(self.agent.post(url), &request.headers).send(body),
            Method::Patch => with_headers(self.agent.patch(url), &request.headers).send(body),
        };

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.into_body().read_to_string() {
                    Ok(text) => {
                        debug!(status, bytes = text.len(), "HTTP response");
                        HttpOutcome::new(status, text)
                    }
                    Err(e) => {
                        warn!(status, error = %e, "Failed to read response body");
                        HttpOutcome::transport_failure(format!("Failed to read response body: {e}"))
                    }
                }
            }
            Err(e) => {
                warn!(method = %request.method, url = %url, error = %e, "HTTP request failed");
                HttpOutcome::transport_failure(format!("Connection error: {e}"))
            }
        }
    }
}
