//! Terminal delivery classification.

use std::fmt;
use std::time::Duration;

/// How the attempt sequence for one envelope ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink acknowledged the event
    Delivered,
    /// No acknowledgment after exhausting attempts or the delivery deadline
    Undelivered { reason: String },
    /// The sink answered and declined the event
    Rejected { status: u16, reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Undelivered { .. } => "undelivered",
            DeliveryOutcome::Rejected { .. } => "rejected",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Undelivered { reason } => write!(f, "undelivered: {}", reason),
            DeliveryOutcome::Rejected { status, reason } => {
                write!(f, "rejected with status {}: {}", status, reason)
            }
        }
    }
}

/// Result of dispatching one row.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub event_id: String,
    pub outcome: DeliveryOutcome,
    /// Attempts made, first included
    pub attempts: u32,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(DeliveryOutcome::Delivered.to_string(), "delivered");
        assert_eq!(
            DeliveryOutcome::Undelivered {
                reason: "connection refused".into()
            }
            .to_string(),
            "undelivered: connection refused"
        );
        assert_eq!(
            DeliveryOutcome::Rejected {
                status: 400,
                reason: "bad event".into()
            }
            .to_string(),
            "rejected with status 400: bad event"
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert!(DeliveryOutcome::Delivered.is_delivered());
        let rejected = DeliveryOutcome::Rejected {
            status: 422,
            reason: String::new(),
        };
        assert!(!rejected.is_delivered());
        assert_eq!(rejected.as_str(), "rejected");
    }
}
