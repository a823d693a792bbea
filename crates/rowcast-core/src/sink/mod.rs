//! Event sinks.
//!
//! A sink answers each envelope with an [`Acknowledgement`], or fails with a
//! [`SinkError`] when no answer arrived. The dispatcher retries transport
//! failures and [`Acknowledgement::Unavailable`] answers.

mod http;

pub use http::HttpSink;

use crate::event::EventEnvelope;
use crate::SinkError;
use async_trait::async_trait;

/// Sink response to one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The sink took the event
    Accepted { status: u16 },
    /// The sink answered but declined the event
    Rejected { status: u16, reason: String },
    /// The sink answered with a transient refusal (throttled or a failing
    /// upstream); worth another attempt
    Unavailable { status: u16, reason: String },
}

impl Acknowledgement {
    /// Statuses answered with [`Acknowledgement::Unavailable`].
    pub fn is_transient_status(status: u16) -> bool {
        matches!(status, 429 | 502 | 503 | 504)
    }
}

/// Destination for event envelopes.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Make a single delivery attempt.
    async fn send(&self, envelope: &EventEnvelope) -> std::result::Result<Acknowledgement, SinkError>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}
