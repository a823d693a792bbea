//! Row stream readers.
//!
//! A [`RowSource`] turns a [`Query`] into a forward-only [`RowStream`].
//! Streams are pull-based: the next row is only requested from the source
//! when the caller asks for it, so memory use does not grow with the size of
//! the result set.

mod memory;
mod postgres;

pub use memory::{MemorySource, ScriptedRow};
pub use postgres::PostgresSource;

use crate::row::Row;
use crate::Result;
use async_trait::async_trait;

/// Query text plus positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// SQL text, parameters referenced as `$1`, `$2`, ...
    pub text: String,
    /// Parameter values, bound as TEXT
    pub params: Vec<String>,
}

impl Query {
    /// Create a query without parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Attach positional parameters.
    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }
}

/// A data source that can execute queries.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Submit a query for execution.
    ///
    /// Fails with [`SourceError::QueryExecution`](crate::SourceError::QueryExecution)
    /// when the source rejects the query.
    async fn open(&self, query: &Query) -> Result<Box<dyn RowStream>>;

    /// Short name used in logs and health reporting.
    fn name(&self) -> &str;
}

/// Lazy, forward-only sequence of rows.
#[async_trait]
pub trait RowStream: Send {
    /// Pull the next row.
    ///
    /// `Ok(None)` marks the end of the stream; implementations keep returning
    /// it without touching the source again. A
    /// [`SourceError::RowRead`](crate::SourceError::RowRead) error affects only
    /// the current row and the stream may be pulled again.
    async fn next_row(&mut self) -> Result<Option<Row>>;
}
