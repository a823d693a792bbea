//! rowcast core - query-to-event publishing pipeline
//!
//! Runs a query against PostgreSQL, wraps every result row in a CloudEvents
//! envelope and delivers it to an HTTP sink:
//!
//! - Pull-based row streaming, one row in flight at a time
//! - Bounded exponential-backoff retry per envelope
//! - Delivered / undelivered / rejected classification, never fatal to the run
//! - Deliveries finish their retry budget even when shutdown is requested

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod health;
pub mod metrics;
pub mod row;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Publisher, RunSummary};
pub use error::{Error, Result};
pub use error::{SinkError, SourceError};
pub use row::{Row, Value};
