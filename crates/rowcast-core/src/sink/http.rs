//! HTTP event sink.

use super::{Acknowledgement, EventSink};
use crate::config::{EventEncoding, SinkConfig};
use crate::event::{EventEnvelope, STRUCTURED_CONTENT_TYPE};
use crate::{Error, Result, SinkError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info};

/// Longest rejection reason kept from a response body.
const MAX_REASON_BYTES: usize = 512;

/// Posts one envelope per request to a fixed endpoint.
pub struct HttpSink {
    client: Client,
    endpoint: String,
    encoding: EventEncoding,
}

impl HttpSink {
    /// Build the HTTP client. The request timeout bounds a single attempt.
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid sink header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid value for sink header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;

        let endpoint = config.endpoint();
        info!(
            endpoint = %endpoint,
            encoding = ?config.encoding,
            timeout_ms = config.request_timeout_ms,
            "HTTP sink initialized"
        );

        Ok(Self {
            client,
            endpoint,
            encoding: config.encoding,
        })
    }

    fn build_request(
        &self,
        envelope: &EventEnvelope,
    ) -> std::result::Result<reqwest::RequestBuilder, SinkError> {
        let request = self.client.post(&self.endpoint);
        let request = match self.encoding {
            EventEncoding::Structured => {
                let body = envelope.to_structured().map_err(|e| SinkError::Transport {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                })?;
                request.header(CONTENT_TYPE, STRUCTURED_CONTENT_TYPE).body(body)
            }
            EventEncoding::Binary => envelope
                .binary_headers()
                .into_iter()
                .fold(request, |request, (name, value)| request.header(name, value))
                .body(envelope.data_bytes().to_vec()),
        };
        Ok(request)
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn send(&self, envelope: &EventEnvelope) -> std::result::Result<Acknowledgement, SinkError> {
        let request = self.build_request(envelope)?;

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SinkError::Timeout {
                    endpoint: self.endpoint.clone(),
                }
            } else {
                SinkError::Transport {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        debug!(event_id = %envelope.id, status = status.as_u16(), "Sink responded");

        if status.is_success() {
            return Ok(Acknowledgement::Accepted {
                status: status.as_u16(),
            });
        }

        // A body that fails to arrive still leaves the status as the answer.
        let body = response.text().await.unwrap_or_default();
        let reason = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("no reason given")
                .to_string()
        } else {
            truncate(body.trim(), MAX_REASON_BYTES).to_string()
        };

        let status = status.as_u16();
        if Acknowledgement::is_transient_status(status) {
            Ok(Acknowledgement::Unavailable { status, reason })
        } else {
            Ok(Acknowledgement::Rejected { status, reason })
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
