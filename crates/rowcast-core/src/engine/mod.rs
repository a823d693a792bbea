//! Publish run orchestration.

mod publisher;

pub use publisher::{Publisher, RunSummary};
