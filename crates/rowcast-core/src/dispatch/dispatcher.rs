//! Envelope construction and delivery.
//!
//! Each envelope is delivered on its own spawned task bounded by the
//! delivery deadline. The task is not tied to the caller: dropping the
//! `dispatch` future, or the publisher reacting to a shutdown signal, leaves
//! an in-flight delivery to finish its attempts.

use super::{DeliveryOutcome, DeliveryReport, RetryPolicy};
use crate::config::Config;
use crate::event::{EventEnvelope, EventIdentity};
use crate::metrics::{ErrorType, PublishMetrics};
use crate::row::Row;
use crate::sink::{Acknowledgement, EventSink};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn, Instrument, Span};

/// Converts rows into envelopes and delivers them to a sink.
pub struct Dispatcher {
    sink: Arc<dyn EventSink>,
    identity: EventIdentity,
    policy: RetryPolicy,
    delivery_timeout: Duration,
    metrics: Arc<PublishMetrics>,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn EventSink>,
        identity: EventIdentity,
        policy: RetryPolicy,
        delivery_timeout: Duration,
        metrics: Arc<PublishMetrics>,
    ) -> Self {
        Self {
            sink,
            identity,
            policy,
            delivery_timeout,
            metrics,
        }
    }

    /// Build a dispatcher from the event, retry and sink sections.
    pub fn from_config(
        config: &Config,
        sink: Arc<dyn EventSink>,
        metrics: Arc<PublishMetrics>,
    ) -> Self {
        Self::new(
            sink,
            EventIdentity::from(&config.event),
            RetryPolicy::from(&config.retry),
            config.sink.delivery_timeout(),
            metrics,
        )
    }

    pub fn identity(&self) -> &EventIdentity {
        &self.identity
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Build an envelope for `row` and deliver it.
    ///
    /// Only a row that cannot be encoded is an error. Every delivery
    /// failure is reported through [`DeliveryReport::outcome`]. Delivery
    /// logs are emitted inside `span`.
    pub async fn dispatch(&self, row: &Row, span: &Span) -> Result<DeliveryReport> {
        let envelope = EventEnvelope::from_row(&self.identity, row)?;
        self.metrics.record_envelope();

        let event_id = envelope.id.clone();
        let delivery = Delivery {
            sink: Arc::clone(&self.sink),
            policy: self.policy.clone(),
            delivery_timeout: self.delivery_timeout,
            metrics: Arc::clone(&self.metrics),
        };

        let started = Instant::now();
        let handle = tokio::spawn(delivery.run(envelope).instrument(span.clone()));

        match handle.await {
            Ok(report) => Ok(report),
            Err(e) => {
                // The outcome of a panicked task is unknown; count it as not acknowledged.
                let _entered = span.enter();
                error!(event_id = %event_id, error = %e, "Delivery task failed");
                let outcome = DeliveryOutcome::Undelivered {
                    reason: format!("delivery task failed: {}", e),
                };
                let elapsed = started.elapsed();
                self.metrics.record_error(ErrorType::Other);
                self.metrics.record_outcome(&outcome, elapsed);
                Ok(DeliveryReport {
                    event_id,
                    outcome,
                    attempts: 0,
                    elapsed,
                })
            }
        }
    }
}

/// Why a single attempt did not settle the envelope.
enum AttemptFailure {
    /// No response arrived
    Transport(String),
    /// The sink answered with a transient refusal
    Refused { status: u16, reason: String },
}

impl AttemptFailure {
    /// Terminal outcome once no further attempt will be made.
    ///
    /// A sink that kept refusing rejected the event; one that never answered
    /// left it undelivered.
    fn into_outcome(self, note: Option<String>) -> DeliveryOutcome {
        match (self, note) {
            (AttemptFailure::Transport(reason), None) => DeliveryOutcome::Undelivered { reason },
            (AttemptFailure::Transport(reason), Some(note)) => DeliveryOutcome::Undelivered {
                reason: format!("{} ({})", reason, note),
            },
            (AttemptFailure::Refused { status, reason }, _) => {
                DeliveryOutcome::Rejected { status, reason }
            }
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Transport(reason) => write!(f, "{}", reason),
            AttemptFailure::Refused { status, reason } => {
                write!(f, "sink answered {}: {}", status, reason)
            }
        }
    }
}

/// State moved into one delivery task.
struct Delivery {
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
    delivery_timeout: Duration,
    metrics: Arc<PublishMetrics>,
}

impl Delivery {
    async fn run(self, envelope: EventEnvelope) -> DeliveryReport {
        let started = Instant::now();
        let deadline = started + self.delivery_timeout;
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            self.metrics.record_attempt();

            let remaining = deadline.saturating_duration_since(Instant::now());
            let failure = match tokio::time::timeout(remaining, self.sink.send(&envelope)).await {
                Ok(Ok(Acknowledgement::Accepted { status })) => {
                    debug!(event_id = %envelope.id, attempt, status, "Event delivered");
                    break DeliveryOutcome::Delivered;
                }
                Ok(Ok(Acknowledgement::Rejected { status, reason })) => {
                    break DeliveryOutcome::Rejected { status, reason };
                }
                Ok(Ok(Acknowledgement::Unavailable { status, reason })) => {
                    AttemptFailure::Refused { status, reason }
                }
                Ok(Err(e)) => AttemptFailure::Transport(e.to_string()),
                Err(_) => {
                    break DeliveryOutcome::Undelivered {
                        reason: format!(
                            "delivery deadline of {}ms exceeded during attempt {}",
                            self.delivery_timeout.as_millis(),
                            attempt
                        ),
                    };
                }
            };

            if !self.policy.has_attempt_after(attempt) {
                break failure.into_outcome(None);
            }

            let delay = self.policy.delay_after(attempt);
            if Instant::now() + delay >= deadline {
                break failure.into_outcome(Some(format!(
                    "delivery deadline reached after attempt {}",
                    attempt
                )));
            }

            warn!(
                event_id = %envelope.id,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Delivery attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let elapsed = started.elapsed();
        match &outcome {
            DeliveryOutcome::Undelivered { reason } => error!(
                event_id = %envelope.id,
                attempts = attempt,
                endpoint = %self.sink.endpoint(),
                reason = %reason,
                "Event undelivered"
            ),
            DeliveryOutcome::Rejected { status, reason } => warn!(
                event_id = %envelope.id,
                attempts = attempt,
                status,
                reason = %reason,
                "Event rejected by sink"
            ),
            _ => {}
        }
        self.metrics.record_outcome(&outcome, elapsed);

        DeliveryReport {
            event_id: envelope.id,
            outcome,
            attempts: attempt,
            elapsed,
        }
    }
}
