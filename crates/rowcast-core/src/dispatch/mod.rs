//! Event dispatch: row to envelope to sink, with bounded retry.

mod dispatcher;
mod outcome;
mod retry;

pub use dispatcher::Dispatcher;
pub use outcome::{DeliveryOutcome, DeliveryReport};
pub use retry::RetryPolicy;
