//! In-memory row source.
//!
//! Serves a scripted sequence of rows and read failures. Useful for tests
//! and for embedding the publisher in programs that already hold their data.

use super::{Query, RowSource, RowStream};
use crate::row::Row;
use crate::{Result, SourceError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One scripted pull result.
#[derive(Debug, Clone)]
pub enum ScriptedRow {
    /// A row is returned
    Row(Row),
    /// The pull fails with a row read error
    ReadError(String),
    /// The query aborts mid-stream; nothing further is served
    QueryError(String),
}

impl From<Row> for ScriptedRow {
    fn from(row: Row) -> Self {
        ScriptedRow::Row(row)
    }
}

/// Row source backed by a fixed script.
///
/// Every `open` replays the same script. Pull and open counters are shared
/// between the source and the streams it hands out.
pub struct MemorySource {
    script: Vec<ScriptedRow>,
    open_error: Option<String>,
    opens: Arc<AtomicU64>,
    pulls: Arc<AtomicU64>,
    last_query: Mutex<Option<Query>>,
}

impl MemorySource {
    /// Create a source that serves the given rows.
    pub fn new(rows: Vec<Row>) -> Self {
        Self::scripted(rows.into_iter().map(ScriptedRow::Row).collect())
    }

    /// Create a source from a script of rows and read errors.
    pub fn scripted(script: Vec<ScriptedRow>) -> Self {
        Self {
            script,
            open_error: None,
            opens: Arc::new(AtomicU64::new(0)),
            pulls: Arc::new(AtomicU64::new(0)),
            last_query: Mutex::new(None),
        }
    }

    /// Make every `open` fail as if the source rejected the query.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut source = Self::scripted(Vec::new());
        source.open_error = Some(message.into());
        source
    }

    /// Number of successful and failed `open` calls.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of `next_row` calls across all streams.
    pub fn pulls(&self) -> u64 {
        self.pulls.load(Ordering::Relaxed)
    }

    /// The most recently opened query.
    pub fn last_query(&self) -> Option<Query> {
        self.last_query.lock().clone()
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn open(&self, query: &Query) -> Result<Box<dyn RowStream>> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        *self.last_query.lock() = Some(query.clone());

        if let Some(message) = &self.open_error {
            return Err(SourceError::QueryExecution(message.clone()).into());
        }

        Ok(Box::new(MemoryRowStream {
            remaining: self.script.iter().cloned().collect(),
            pulls: Arc::clone(&self.pulls),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryRowStream {
    remaining: VecDeque<ScriptedRow>,
    pulls: Arc<AtomicU64>,
}

#[async_trait]
impl RowStream for MemoryRowStream {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        self.pulls.fetch_add(1, Ordering::Relaxed);
        match self.remaining.pop_front() {
            Some(ScriptedRow::Row(row)) => Ok(Some(row)),
            Some(ScriptedRow::ReadError(message)) => Err(SourceError::RowRead(message).into()),
            Some(ScriptedRow::QueryError(message)) => {
                self.remaining.clear();
                Err(SourceError::QueryExecution(message).into())
            }
            None => Ok(None),
        }
    }
}
