//! Blocking HTTP client for the `/process` backend.
//!
//! The base URL comes from the `ATTNFLOW_BACKEND_URL` environment variable
//! when not given explicitly, falling back to localhost. Connectivity
//! failures and 5xx responses are the caller's cue to fall back to sample
//! data; 4xx responses carry actionable messages and are surfaced verbatim.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::wire::{HealthResponse, ProcessRequest, ProcessResponse};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const BACKEND_URL_ENV: &str = "ATTNFLOW_BACKEND_URL";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP boundary failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to backend: {0}")]
    Connection(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("backend error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the caller should fall back to sample data instead of
    /// surfacing this error: connectivity problems and backend-side
    /// execution failures qualify, bad requests (4xx) do not.
    pub fn is_fallback(&self) -> bool {
        match self {
            ClientError::Connection(_) | ClientError::Timeout => true,
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::Decode(_) => false,
        }
    }
}

/// Split transport failures into timeouts and other connectivity errors.
/// Timeouts surface as I/O errors underneath the transport wrapper, so the
/// source chain is inspected rather than the display message.
fn classify_transport(transport: &ureq::Transport) -> ClientError {
    use std::error::Error as _;

    let timed_out = transport
        .source()
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        });
    if timed_out {
        ClientError::Timeout
    } else {
        ClientError::Connection(transport.to_string())
    }
}

/// Client for the attention extraction backend
pub struct ApiClient {
    base_url: String,
    agent: ureq::Agent,
}

impl ApiClient {
    /// Client for an explicit base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self {
            base_url: base_url.into(),
            agent,
        }
    }

    /// Client configured from `ATTNFLOW_BACKEND_URL`, or localhost
    pub fn from_env() -> Self {
        let base_url =
            std::env::var(BACKEND_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`: true when the backend is loaded and ready
    pub fn check_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.agent.get(&url).call() {
            Ok(response) => match response.into_json::<HealthResponse>() {
                Ok(health) => health.status == "ok",
                Err(err) => {
                    warn!("Backend health response was malformed: {err}");
                    false
                }
            },
            Err(err) => {
                warn!(
                    "Could not reach backend at {}: {err}. Make sure the backend server is running.",
                    self.base_url
                );
                false
            }
        }
    }

    /// `POST /process`: extract attention for a text on the backend
    pub fn process_text(&self, text: &str, model: &str) -> Result<ProcessResponse, ClientError> {
        let url = format!("{}/process", self.base_url);
        let request = ProcessRequest {
            text: text.to_string(),
            model_name: model.to_string(),
        };

        match self.agent.post(&url).send_json(&request) {
            Ok(response) => response
                .into_json::<ProcessResponse>()
                .map_err(|err| ClientError::Decode(err.to_string())),
            Err(ureq::Error::Status(status, response)) => {
                let message = response
                    .into_string()
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                Err(ClientError::Api { status, message })
            }
            Err(ureq::Error::Transport(transport)) => Err(classify_transport(&transport)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_classification() {
        assert!(ClientError::Connection("refused".to_string()).is_fallback());
        assert!(ClientError::Timeout.is_fallback());
        assert!(ClientError::Api {
            status: 500,
            message: "model execution failed".to_string()
        }
        .is_fallback());
        assert!(!ClientError::Api {
            status: 400,
            message: "input text is empty".to_string()
        }
        .is_fallback());
        assert!(!ClientError::Decode("eof".to_string()).is_fallback());
    }

    #[test]
    fn test_base_url_sources() {
        let client = ApiClient::new("http://example.com:9000");
        assert_eq!(client.base_url(), "http://example.com:9000");
    }

    #[test]
    fn test_refused_connection_classified_as_connection() {
        // Port 9 is discard; nothing listens there, so the request is
        // refused immediately rather than timing out
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.process_text("hello", "gpt2-small").unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
        assert!(err.is_fallback());
    }
}
